use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Roles recognized by the platform, in precedence order.
///
/// Precedence matters: when an email appears in more than one registry
/// (a data-integrity anomaly), the highest-precedence role wins.
/// `SubAdmin` is not a registry role - it is the fail-safe fallback for
/// an authenticated identity with no recognized assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    SchoolAdmin,
    FinanceStaff,
    SubAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::SchoolAdmin => "school_admin",
            Role::FinanceStaff => "finance_staff",
            Role::SubAdmin => "sub_admin",
        }
    }

    /// Whether this role is scoped to a single tenant (school).
    pub fn requires_tenant(&self) -> bool {
        matches!(self, Role::SchoolAdmin | Role::FinanceStaff)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three registry tables of the role directory, in lookup precedence
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Registry {
    SuperAdmins,
    SchoolAdmins,
    FinanceStaff,
}

impl Registry {
    /// Lookup order. This is a correctness requirement, not an
    /// optimization: it defines which role wins on inconsistent data.
    pub const PRECEDENCE: [Registry; 3] = [
        Registry::SuperAdmins,
        Registry::SchoolAdmins,
        Registry::FinanceStaff,
    ];

    pub fn role(&self) -> Role {
        match self {
            Registry::SuperAdmins => Role::SuperAdmin,
            Registry::SchoolAdmins => Role::SchoolAdmin,
            Registry::FinanceStaff => Role::FinanceStaff,
        }
    }

    pub fn table_name(&self) -> &'static str {
        match self {
            Registry::SuperAdmins => "super_admins",
            Registry::SchoolAdmins => "school_admins",
            Registry::FinanceStaff => "finance_staff",
        }
    }
}

/// A single row from a registry lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub id: String,
    pub tenant_id: Option<String>,
}

/// The resolved role/tenant mapping for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub role: Role,
    /// The school this assignment is scoped to. `None` for super_admin
    /// and sub_admin.
    pub tenant_id: Option<String>,
    /// Registry row id the assignment came from, when one exists.
    pub directory_id: Option<String>,
}

impl RoleAssignment {
    /// The fail-safe fallback: authenticated, but no recognized
    /// assignment. Least-privileged by construction.
    pub fn sub_admin() -> Self {
        Self {
            role: Role::SubAdmin,
            tenant_id: None,
            directory_id: None,
        }
    }

    pub fn from_record(registry: Registry, record: &DirectoryRecord) -> Self {
        Self {
            role: registry.role(),
            tenant_id: record.tenant_id.clone(),
            directory_id: Some(record.id.clone()),
        }
    }
}

/// An authenticated principal issued by the identity store.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub issued_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// A session issued by the identity store. The auth context holds a copy
/// for display/refresh purposes only; it never mutates tokens directly.
#[derive(Debug, Clone)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

/// Auth-state notifications emitted by the identity store.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}

/// Coarse lifecycle state of the auth context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No identity.
    Anonymous,
    /// Identity known, role not yet resolved.
    Resolving,
    /// Identity and role known.
    Ready,
}

/// The single source of truth exposed to the rest of the application.
///
/// Published through a `tokio::sync::watch` channel; consumers read
/// role/tenant from here to branch UI and scope queries. Role and tenant
/// are only ever set by the resolution pipeline.
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub identity: Option<Identity>,
    pub role: Option<Role>,
    pub tenant_id: Option<String>,
    pub loading: bool,
    pub session: Option<Session>,
}

impl AuthSnapshot {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn state(&self) -> AuthState {
        match (&self.identity, &self.role, self.loading) {
            (None, _, _) => AuthState::Anonymous,
            (Some(_), _, true) => AuthState::Resolving,
            (Some(_), Some(_), false) => AuthState::Ready,
            // Identity present, nothing resolved, not loading: a sign-out
            // is settling or the context has not initialized yet.
            (Some(_), None, false) => AuthState::Resolving,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert_eq!(Registry::PRECEDENCE[0].role(), Role::SuperAdmin);
        assert_eq!(Registry::PRECEDENCE[1].role(), Role::SchoolAdmin);
        assert_eq!(Registry::PRECEDENCE[2].role(), Role::FinanceStaff);
    }

    #[test]
    fn test_role_wire_names() {
        let json = serde_json::to_string(&Role::SchoolAdmin).unwrap();
        assert_eq!(json, "\"school_admin\"");
        let back: Role = serde_json::from_str("\"finance_staff\"").unwrap();
        assert_eq!(back, Role::FinanceStaff);
    }

    #[test]
    fn test_tenant_scoping() {
        assert!(!Role::SuperAdmin.requires_tenant());
        assert!(Role::SchoolAdmin.requires_tenant());
        assert!(Role::FinanceStaff.requires_tenant());
        assert!(!Role::SubAdmin.requires_tenant());
    }

    #[test]
    fn test_sub_admin_fallback_shape() {
        let fallback = RoleAssignment::sub_admin();
        assert_eq!(fallback.role, Role::SubAdmin);
        assert!(fallback.tenant_id.is_none());
        assert!(fallback.directory_id.is_none());
    }
}
