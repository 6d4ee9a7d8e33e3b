// Trait definitions for the external collaborators.
//
// These are INFRASTRUCTURE seams only - no resolution logic. The auth
// context and resolver are written against these traits so they can be
// exercised with the mocks in `test_dependencies`.
//
// Naming convention: Base* for trait names (e.g., BaseIdentityStore).

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{IdentityError, LookupError};
use crate::types::{AuthEvent, DirectoryRecord, Registry, Session};

// =============================================================================
// Identity Store (authentication backend)
// =============================================================================

/// The authentication backend that issues sessions and notifies on
/// auth-state changes. Treated as a black box.
#[async_trait]
pub trait BaseIdentityStore: Send + Sync {
    /// The session currently held by the store, if any.
    async fn current_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Authenticate with email/password. Emits `AuthEvent::SignedIn` on
    /// success.
    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, IdentityError>;

    /// End the active session. Emits `AuthEvent::SignedOut`.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Exchange the refresh token for a new session. Emits
    /// `AuthEvent::TokenRefreshed` on success.
    async fn refresh_session(&self) -> Result<Session, IdentityError>;

    /// Change the password of the authenticated user.
    async fn update_password(&self, new_password: &str) -> Result<(), IdentityError>;

    /// Subscribe to auth-state change notifications.
    fn subscribe(&self) -> broadcast::Receiver<AuthEvent>;
}

// =============================================================================
// Role Directory (registry lookups)
// =============================================================================

/// Read-only access to the three role registries, each keyed by email.
///
/// A lookup may return more than one row for an email; that is a
/// data-integrity anomaly the resolver handles deterministically
/// (first row wins). Implementations should cap results at two rows so
/// the anomaly stays observable without fetching unbounded data.
#[async_trait]
pub trait BaseRoleDirectory: Send + Sync {
    async fn find_by_email(
        &self,
        registry: Registry,
        email: &str,
    ) -> Result<Vec<DirectoryRecord>, LookupError>;
}
