//! Route-level authorization guards.
//!
//! A [`GuardChain`] is an ordered list of [`Check`]s. Each [`Requirement`]
//! expands into every check it implies, so requiring a permission also
//! requires activation, which also requires authentication:
//!
//! ```text
//! Permission(code) → [NotAnonymous, Activated, HasPermission(code)]
//! Activated        → [NotAnonymous, Activated]
//! Authenticated    → [NotAnonymous]
//! ```
//!
//! Checks run in order and the first failure is the outcome. [`GuardLayer`]
//! applies a chain to a route with `route_layer`:
//!
//! ```rust,ignore
//! Router::new()
//!     .route("/v1/movies", get(list_movies).route_layer(require_permission(&state, "movies:read")))
//! ```

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::{body::Body, http::Request, response::Response};
use futures_util::future::BoxFuture;
use tower::{Layer, Service};

use crate::auth::identity::{IdentityExt, RequestIdentity};
use crate::auth::store::{lookup_with_deadline, PermissionStore};
use crate::http::errors::ApiError;
use crate::http::server::AppState;

/// The strongest guarantee a route needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Authenticated,
    Activated,
    Permission(String),
}

impl Requirement {
    fn checks(&self) -> Vec<Check> {
        match self {
            Requirement::Authenticated => vec![Check::NotAnonymous],
            Requirement::Activated => vec![Check::NotAnonymous, Check::Activated],
            Requirement::Permission(code) => vec![
                Check::NotAnonymous,
                Check::Activated,
                Check::HasPermission(code.clone()),
            ],
        }
    }
}

/// A single authorization step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    NotAnonymous,
    Activated,
    HasPermission(String),
}

impl Check {
    async fn run(
        &self,
        identity: &RequestIdentity,
        permissions: &dyn PermissionStore,
        deadline: Duration,
    ) -> Result<(), ApiError> {
        match self {
            Check::NotAnonymous => match identity {
                RequestIdentity::Anonymous => Err(ApiError::AuthenticationRequired),
                RequestIdentity::User(_) => Ok(()),
            },
            Check::Activated => match identity.user() {
                None => Err(ApiError::AuthenticationRequired),
                Some(user) if !user.activated => Err(ApiError::InactiveAccount),
                Some(_) => Ok(()),
            },
            Check::HasPermission(code) => {
                let user = identity.user().ok_or(ApiError::AuthenticationRequired)?;
                let granted =
                    lookup_with_deadline(deadline, permissions.get_all_for_user(user.id))
                        .await
                        .map_err(ApiError::internal)?;
                if granted.include(code) {
                    Ok(())
                } else {
                    Err(ApiError::NotPermitted)
                }
            }
        }
    }
}

/// Ordered, deduplicated authorization checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuardChain {
    checks: Vec<Check>,
}

impl GuardChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every check `requirement` implies that is not already present.
    pub fn require(mut self, requirement: Requirement) -> Self {
        for check in requirement.checks() {
            if !self.checks.contains(&check) {
                self.checks.push(check);
            }
        }
        self
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Run the checks in order, stopping at the first failure.
    pub async fn evaluate(
        &self,
        identity: &RequestIdentity,
        permissions: &dyn PermissionStore,
        deadline: Duration,
    ) -> Result<(), ApiError> {
        for check in &self.checks {
            check.run(identity, permissions, deadline).await?;
        }
        Ok(())
    }
}

impl From<Requirement> for GuardChain {
    fn from(requirement: Requirement) -> Self {
        GuardChain::new().require(requirement)
    }
}

/// Rejects anonymous requests with 401.
pub fn require_authenticated_user(state: &AppState) -> GuardLayer {
    GuardLayer::new(state.clone(), Requirement::Authenticated)
}

/// Rejects anonymous (401) and inactive (403) users.
pub fn require_activated_user(state: &AppState) -> GuardLayer {
    GuardLayer::new(state.clone(), Requirement::Activated)
}

/// Additionally rejects users without `code` (403).
pub fn require_permission(state: &AppState, code: impl Into<String>) -> GuardLayer {
    GuardLayer::new(state.clone(), Requirement::Permission(code.into()))
}

/// Tower layer running a [`GuardChain`] in front of a route.
#[derive(Clone)]
pub struct GuardLayer {
    state: AppState,
    chain: Arc<GuardChain>,
}

impl GuardLayer {
    pub fn new(state: AppState, chain: impl Into<GuardChain>) -> Self {
        Self {
            state,
            chain: Arc::new(chain.into()),
        }
    }
}

impl<S> Layer<S> for GuardLayer {
    type Service = GuardService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        GuardService {
            inner,
            state: self.state.clone(),
            chain: Arc::clone(&self.chain),
        }
    }
}

#[derive(Clone)]
pub struct GuardService<S> {
    inner: S,
    state: AppState,
    chain: Arc<GuardChain>,
}

impl<S> Service<Request<Body>> for GuardService<S>
where
    S: Service<Request<Body>, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        // Keep the service that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let state = self.state.clone();
        let chain = Arc::clone(&self.chain);

        Box::pin(async move {
            let identity = match request.identity() {
                Ok(identity) => identity.clone(),
                Err(err) => {
                    return Ok(state.error_response(
                        request.method(),
                        request.uri(),
                        ApiError::internal(err),
                    ));
                }
            };

            let outcome = chain
                .evaluate(
                    &identity,
                    state.permissions.as_ref(),
                    state.config.auth.lookup_timeout(),
                )
                .await;
            if let Err(err) = outcome {
                return Ok(state.error_response(request.method(), request.uri(), err));
            }

            inner.call(request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{Permissions, User};
    use crate::auth::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    const DEADLINE: Duration = Duration::from_secs(1);

    fn user(id: i64, activated: bool) -> RequestIdentity {
        RequestIdentity::User(User {
            id,
            name: format!("user-{id}"),
            email: format!("user-{id}@example.com"),
            activated,
        })
    }

    struct FailingPermissions;

    #[async_trait]
    impl PermissionStore for FailingPermissions {
        async fn get_all_for_user(&self, _user_id: i64) -> Result<Permissions, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[test]
    fn requirements_expand_in_dependency_order() {
        let chain = GuardChain::from(Requirement::Permission("movies:write".into()));
        assert_eq!(
            chain.checks(),
            &[
                Check::NotAnonymous,
                Check::Activated,
                Check::HasPermission("movies:write".into())
            ]
        );
    }

    #[test]
    fn require_deduplicates() {
        let chain = GuardChain::new()
            .require(Requirement::Activated)
            .require(Requirement::Authenticated)
            .require(Requirement::Permission("a".into()))
            .require(Requirement::Permission("b".into()));
        assert_eq!(
            chain.checks(),
            &[
                Check::NotAnonymous,
                Check::Activated,
                Check::HasPermission("a".into()),
                Check::HasPermission("b".into())
            ]
        );
    }

    #[tokio::test]
    async fn anonymous_fails_authentication_before_activation() {
        let store = MemoryStore::new();
        let chain = GuardChain::from(Requirement::Activated);

        let outcome = chain
            .evaluate(&RequestIdentity::Anonymous, &store, DEADLINE)
            .await;
        assert_eq!(outcome, Err(ApiError::AuthenticationRequired));
    }

    #[tokio::test]
    async fn inactive_user_is_rejected() {
        let store = MemoryStore::new();
        let chain = GuardChain::from(Requirement::Activated);

        assert_eq!(
            chain.evaluate(&user(1, false), &store, DEADLINE).await,
            Err(ApiError::InactiveAccount)
        );
        assert_eq!(chain.evaluate(&user(1, true), &store, DEADLINE).await, Ok(()));
    }

    #[tokio::test]
    async fn missing_permission_is_not_permitted() {
        let store = MemoryStore::new();
        store.grant_permissions(1, ["movies:read"].into_iter().collect());

        let read = GuardChain::from(Requirement::Permission("movies:read".into()));
        let write = GuardChain::from(Requirement::Permission("movies:write".into()));

        assert_eq!(read.evaluate(&user(1, true), &store, DEADLINE).await, Ok(()));
        assert_eq!(
            write.evaluate(&user(1, true), &store, DEADLINE).await,
            Err(ApiError::NotPermitted)
        );
    }

    #[tokio::test]
    async fn inactive_user_never_reaches_permission_lookup() {
        let chain = GuardChain::from(Requirement::Permission("movies:read".into()));

        // The failing store would turn any lookup into a server error.
        assert_eq!(
            chain
                .evaluate(&user(1, false), &FailingPermissions, DEADLINE)
                .await,
            Err(ApiError::InactiveAccount)
        );
    }

    #[tokio::test]
    async fn permission_lookup_failure_is_internal() {
        let chain = GuardChain::from(Requirement::Permission("movies:read".into()));

        let outcome = chain
            .evaluate(&user(1, true), &FailingPermissions, DEADLINE)
            .await;
        assert!(matches!(outcome, Err(ApiError::Internal(_))));
    }
}
