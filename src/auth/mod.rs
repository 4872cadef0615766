//! Authentication and authorization subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization header
//!     → authenticate.rs (bearer token → RequestIdentity, via UserStore)
//!     → identity.rs (bound once into request extensions)
//!     → guard.rs (route-level checks: authenticated → activated → permitted)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Authentication only resolves identity; enforcement is per route
//! - Stronger requirements imply the weaker ones
//! - Every store lookup runs under a deadline

pub mod authenticate;
pub mod guard;
pub mod identity;
pub mod store;

pub use authenticate::authenticate;
pub use guard::{
    require_activated_user, require_authenticated_user, require_permission, GuardChain,
    GuardLayer, Requirement,
};
pub use identity::{IdentityError, IdentityExt, Permissions, RequestIdentity, User};
pub use store::{MemoryStore, PermissionStore, StoreError, UserStore};
