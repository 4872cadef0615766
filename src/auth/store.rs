//! Storage collaborators consumed by the auth stages.
//!
//! Persistence lives outside this crate. The stages only see the
//! [`UserStore`] and [`PermissionStore`] traits; [`MemoryStore`] is an
//! in-process implementation for development and tests.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::auth::identity::{Permissions, User};

/// Token scope used by the authentication stage.
pub const SCOPE_AUTHENTICATION: &str = "authentication";

/// Token scope used for account activation links.
pub const SCOPE_ACTIVATION: &str = "activation";

/// Length of a plaintext token: 16 random bytes, base32 without padding.
pub const TOKEN_PLAINTEXT_LEN: usize = 26;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record not found")]
    RecordNotFound,

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("storage lookup timed out")]
    Timeout,
}

/// Resolves bearer tokens to users.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// The user owning `token` under `scope`, if the token has not expired.
    async fn get_for_token(&self, scope: &str, token: &str) -> Result<User, StoreError>;

    /// Cheap shape check run before any lookup.
    fn validate_token_format(&self, token: &str) -> bool {
        validate_token_plaintext(token)
    }
}

/// Resolves the permission codes a user holds.
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError>;
}

/// A plaintext token is exactly 26 characters of the base32 alphabet.
pub fn validate_token_plaintext(token: &str) -> bool {
    token.len() == TOKEN_PLAINTEXT_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_uppercase() || (b'2'..=b'7').contains(&b))
}

/// Run a store lookup under `deadline`; an elapsed deadline is [`StoreError::Timeout`].
pub async fn lookup_with_deadline<T, F>(deadline: Duration, lookup: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    tokio::time::timeout(deadline, lookup)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

fn token_hash(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

#[derive(Default)]
struct MemoryTables {
    users: HashMap<i64, User>,
    tokens: HashMap<(String, [u8; 32]), i64>,
    permissions: HashMap<i64, Permissions>,
}

/// In-memory user, token and permission tables. Tokens are stored hashed.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<MemoryTables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        let mut tables = self.write();
        tables.users.insert(user.id, user);
    }

    /// Register `token` for `user_id` under `scope`.
    pub fn insert_token(&self, user_id: i64, scope: &str, token: &str) {
        let mut tables = self.write();
        tables
            .tokens
            .insert((scope.to_owned(), token_hash(token)), user_id);
    }

    pub fn grant_permissions(&self, user_id: i64, permissions: Permissions) {
        let mut tables = self.write();
        tables.permissions.insert(user_id, permissions);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, MemoryTables> {
        self.tables
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, MemoryTables> {
        self.tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_for_token(&self, scope: &str, token: &str) -> Result<User, StoreError> {
        let tables = self.read();
        tables
            .tokens
            .get(&(scope.to_owned(), token_hash(token)))
            .and_then(|user_id| tables.users.get(user_id))
            .cloned()
            .ok_or(StoreError::RecordNotFound)
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn get_all_for_user(&self, user_id: i64) -> Result<Permissions, StoreError> {
        Ok(self
            .read()
            .permissions
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "Y3QMGX3PJ3WLRL2YRTQGQ6KRHU";

    fn alice() -> User {
        User {
            id: 1,
            name: "Alice".into(),
            email: "alice@example.com".into(),
            activated: true,
        }
    }

    #[test]
    fn token_format() {
        assert!(validate_token_plaintext(TOKEN));
        assert!(!validate_token_plaintext(""));
        assert!(!validate_token_plaintext("short"));
        assert!(!validate_token_plaintext("y3qmgx3pj3wlrl2yrtqgq6krhu"));
        assert!(!validate_token_plaintext("Y3QMGX3PJ3WLRL2YRTQGQ6KRH1"));
        assert!(!validate_token_plaintext("Y3QMGX3PJ3WLRL2YRTQGQ6KRHUX"));
    }

    #[tokio::test]
    async fn token_lookup_is_scoped() {
        let store = MemoryStore::new();
        store.insert_user(alice());
        store.insert_token(1, SCOPE_AUTHENTICATION, TOKEN);

        assert_eq!(
            store.get_for_token(SCOPE_AUTHENTICATION, TOKEN).await,
            Ok(alice())
        );
        assert_eq!(
            store.get_for_token(SCOPE_ACTIVATION, TOKEN).await,
            Err(StoreError::RecordNotFound)
        );
    }

    #[tokio::test]
    async fn unknown_user_has_no_permissions() {
        let store = MemoryStore::new();
        assert!(store.get_all_for_user(42).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_maps_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(())
        };
        assert_eq!(
            lookup_with_deadline(Duration::from_secs(1), slow).await,
            Err(StoreError::Timeout)
        );

        let fast = async { Ok::<_, StoreError>(5) };
        assert_eq!(lookup_with_deadline(Duration::from_secs(1), fast).await, Ok(5));
    }
}
