// School Finance Platform - Session/Role Resolution Core
//
// Given an authenticated identity, determines which tenant (school) and
// which role that identity maps to, caches the mapping across restarts,
// tolerates transient backend failures through retry/backoff and timeout
// fallback, and exposes a stable, race-free authorization context for
// the CRUD layers to read.
//
// The CRUD layers themselves (students, fees, invoices, payments) live
// elsewhere; they consume this crate through `AuthContext` snapshots and
// the `route_decision` guard.

pub mod auth_context;
pub mod config;
pub mod directory;
pub mod error;
pub mod identity;
pub mod resolver;
pub mod route_guard;
pub mod session_cache;
pub mod session_refresher;
pub mod test_dependencies;
pub mod traits;
pub mod types;

pub use auth_context::AuthContext;
pub use config::AuthConfig;
pub use error::{AuthError, IdentityError, LookupError};
pub use resolver::Resolver;
pub use route_guard::{route_decision, RouteDecision};
pub use session_cache::{CachedAssignment, SessionCache};
pub use session_refresher::SessionRefresher;
pub use traits::{BaseIdentityStore, BaseRoleDirectory};
pub use types::{
    AuthEvent, AuthSnapshot, AuthState, DirectoryRecord, Identity, Registry, Role,
    RoleAssignment, Session,
};
