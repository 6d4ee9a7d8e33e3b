use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::LookupError;
use crate::session_cache::SessionCache;
use crate::traits::BaseRoleDirectory;
use crate::types::{DirectoryRecord, Registry, Role, RoleAssignment};

/// Resolves an email to a role assignment by querying the role directory
/// in precedence order.
///
/// `resolve` never fails: on total failure (every registry erroring or
/// the overall budget elapsing) it degrades to the least-privileged
/// `sub_admin` assignment. Unresolved identities get the minimal view,
/// never an elevated one.
pub struct Resolver {
    directory: Arc<dyn BaseRoleDirectory>,
    cache: Arc<SessionCache>,
    overall_timeout: Duration,
    lookup_attempts: u32,
    backoff_base: Duration,
    break_glass_email: Option<String>,
}

impl Resolver {
    pub fn new(
        directory: Arc<dyn BaseRoleDirectory>,
        cache: Arc<SessionCache>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            directory,
            cache,
            overall_timeout: config.resolve_timeout,
            lookup_attempts: config.lookup_attempts.max(1),
            backoff_base: config.backoff_base,
            break_glass_email: config.break_glass_email.clone(),
        }
    }

    /// Resolve `email` to a role assignment.
    ///
    /// Queries the registries sequentially in precedence order
    /// (super_admins, school_admins, finance_staff), short-circuiting on
    /// the first match, the whole pass racing an overall timeout. On
    /// timeout, a fresh cached assignment for this email wins over the
    /// sub_admin fallback. Successful matches are written through to the
    /// session cache before returning.
    pub async fn resolve(&self, email: &str) -> RoleAssignment {
        if email.is_empty() {
            debug!("resolve called with empty email; returning sub_admin fallback");
            return RoleAssignment::sub_admin();
        }

        // Operational escape hatch: configuration-driven, off by default,
        // audited on every use. Bypasses the directory entirely.
        if self.break_glass_email.as_deref() == Some(email) {
            warn!(
                email = %email,
                "break-glass identity resolved to super_admin without directory lookup"
            );
            return RoleAssignment {
                role: Role::SuperAdmin,
                tenant_id: None,
                directory_id: None,
            };
        }

        match timeout(self.overall_timeout, self.resolve_uncached(email)).await {
            Ok(assignment) => {
                if assignment.role != Role::SubAdmin {
                    self.cache.put(email, &assignment);
                }
                assignment
            }
            Err(_) => {
                warn!(
                    email = %email,
                    budget_ms = self.overall_timeout.as_millis() as u64,
                    "role resolution timed out; falling back"
                );
                match self.cache.get(email) {
                    Some(cached) => {
                        info!(email = %email, role = %cached.role, "using cached assignment after timeout");
                        cached.assignment()
                    }
                    None => RoleAssignment::sub_admin(),
                }
            }
        }
    }

    async fn resolve_uncached(&self, email: &str) -> RoleAssignment {
        for registry in Registry::PRECEDENCE {
            match self.query_with_retry(registry, email).await {
                Ok(rows) => {
                    if let Some(record) = first_record(registry, email, &rows) {
                        let assignment = RoleAssignment::from_record(registry, record);
                        debug!(
                            email = %email,
                            role = %assignment.role,
                            tenant = assignment.tenant_id.as_deref().unwrap_or("-"),
                            "role resolved"
                        );
                        return assignment;
                    }
                }
                Err(e) => {
                    // Exhausted retries or a non-retryable failure: this
                    // registry yields nothing, fall through to the next.
                    warn!(
                        registry = registry.table_name(),
                        email = %email,
                        "registry check failed: {}", e
                    );
                }
            }
        }

        debug!(email = %email, "no registry match; returning sub_admin fallback");
        RoleAssignment::sub_admin()
    }

    /// One registry query with up to `lookup_attempts` tries.
    ///
    /// Only transient errors are retried; the backoff doubles per
    /// attempt starting at `backoff_base`.
    async fn query_with_retry(
        &self,
        registry: Registry,
        email: &str,
    ) -> Result<Vec<DirectoryRecord>, LookupError> {
        let mut delay = self.backoff_base;
        let mut attempt = 1;

        loop {
            match self.directory.find_by_email(registry, email).await {
                Ok(rows) => return Ok(rows),
                Err(e) if e.is_transient() && attempt < self.lookup_attempts => {
                    debug!(
                        registry = registry.table_name(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        "transient lookup failure, retrying: {}", e
                    );
                    sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Pick the row an anomalous multi-row result resolves to.
///
/// More than one row for an email is a data-integrity anomaly; the first
/// row wins deterministically and resolution proceeds. A tenant-scoped
/// role without a tenant id is logged for the same reason.
fn first_record<'a>(
    registry: Registry,
    email: &str,
    rows: &'a [DirectoryRecord],
) -> Option<&'a DirectoryRecord> {
    if rows.len() > 1 {
        warn!(
            registry = registry.table_name(),
            email = %email,
            rows = rows.len(),
            "multiple registry rows for one email; taking the first"
        );
    }
    let record = rows.first()?;
    if registry.role().requires_tenant() && record.tenant_id.is_none() {
        warn!(
            registry = registry.table_name(),
            email = %email,
            "tenant-scoped registry row has no tenant id"
        );
    }
    Some(record)
}
