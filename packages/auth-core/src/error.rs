use thiserror::Error;

/// Errors from the identity store.
///
/// `InvalidCredentials` and `InvalidRefreshToken` are authoritative: the
/// backend has rejected the attempt and retrying is pointless. An invalid
/// refresh token on the active session triggers a full sign-out.
#[derive(Error, Debug, Clone)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("invalid or expired refresh token")]
    InvalidRefreshToken,

    #[error("no active session")]
    NoSession,

    #[error("identity store transport error: {0}")]
    Transport(String),
}

impl IdentityError {
    /// Whether a refresh failure with this error means the session is
    /// gone for good and the user must be signed out.
    pub fn is_refresh_fatal(&self) -> bool {
        matches!(
            self,
            IdentityError::InvalidRefreshToken | IdentityError::InvalidCredentials
        )
    }
}

/// Errors from a role directory lookup.
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    /// Network failure, request timeout, rate-limit style rejection.
    /// Retried with backoff inside the resolver; never user-visible.
    #[error("transient lookup failure: {0}")]
    Transient(String),

    /// Malformed query, schema mismatch, permission failure. Aborts the
    /// registry check immediately; the resolver falls through to the
    /// next registry.
    #[error("lookup query failed: {0}")]
    Query(String),
}

impl LookupError {
    pub fn is_transient(&self) -> bool {
        matches!(self, LookupError::Transient(_))
    }
}

/// Errors surfaced by auth context actions (`sign_in`, `change_password`).
///
/// The context itself never throws: resolution failures degrade to the
/// sub_admin fallback and refresh failures settle into sign-out. Only
/// credential-bearing actions propagate structured errors to the UI.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
