//! Request identity.
//!
//! The authentication stage binds exactly one [`RequestIdentity`] to each
//! request through its extensions. Later stages and handlers only read it.

use std::collections::HashSet;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, Request},
    response::Response,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::http::errors::ApiError;
use crate::http::server::AppState;

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub activated: bool,
}

/// Permission codes held by a user, e.g. `movies:read`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(&self, code: &str) -> bool {
        self.0.contains(code)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Who is making the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    /// No credentials were presented.
    Anonymous,
    User(User),
}

impl RequestIdentity {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, RequestIdentity::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            RequestIdentity::Anonymous => None,
            RequestIdentity::User(user) => Some(user),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("request identity is already set")]
    AlreadySet,

    #[error("missing identity in request extensions")]
    Missing,
}

/// Bind and read the identity carried by a request.
pub trait IdentityExt {
    /// Bind `identity`. Fails if one is already bound.
    fn set_identity(&mut self, identity: RequestIdentity) -> Result<(), IdentityError>;

    fn identity(&self) -> Result<&RequestIdentity, IdentityError>;
}

impl<B> IdentityExt for Request<B> {
    fn set_identity(&mut self, identity: RequestIdentity) -> Result<(), IdentityError> {
        if self.extensions().get::<RequestIdentity>().is_some() {
            return Err(IdentityError::AlreadySet);
        }
        self.extensions_mut().insert(identity);
        Ok(())
    }

    fn identity(&self) -> Result<&RequestIdentity, IdentityError> {
        self.extensions()
            .get::<RequestIdentity>()
            .ok_or(IdentityError::Missing)
    }
}

/// Handlers take `RequestIdentity` as an extractor. A missing identity means
/// the authentication stage was not wired in front of the route; the
/// rejection is a logged 500.
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(identity) = parts.extensions.get::<RequestIdentity>() {
            return Ok(identity.clone());
        }
        let state = AppState::from_ref(state);
        Err(state.error_response(
            &parts.method,
            &parts.uri,
            ApiError::internal(IdentityError::Missing),
        ))
    }
}
