use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Role, RoleAssignment};

/// A cached role/tenant mapping for one identity.
///
/// Valid only while fresh (24h window by default) and only for the email
/// it was written for. Removed on explicit sign-out; the whole cache is
/// discarded when the deployment domain changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAssignment {
    pub email: String,
    pub role: Role,
    pub tenant_id: Option<String>,
    pub directory_id: Option<String>,
    pub cached_at: DateTime<Utc>,
}

impl CachedAssignment {
    pub fn assignment(&self) -> RoleAssignment {
        RoleAssignment {
            role: self.role,
            tenant_id: self.tenant_id.clone(),
            directory_id: self.directory_id.clone(),
        }
    }
}

/// On-disk shape of the cache file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    domain: String,
    entries: HashMap<String, CachedAssignment>,
}

/// Freshness-windowed, domain-aware cache of resolved assignments.
///
/// Short-circuits resolution at session-init time to avoid redundant
/// registry lookups and UI flicker during navigation. It is purely an
/// optimization: always safe to discard, never a source of truth. A
/// corrupt or cross-domain file starts the cache empty rather than
/// erroring.
///
/// Writes are last-writer-wins; the auth context's in-flight guard means
/// only one resolution ever writes for a given identity at a time.
pub struct SessionCache {
    path: PathBuf,
    domain: String,
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, CachedAssignment>>,
}

impl SessionCache {
    /// Open (or create) the cache at `path`, scoped to `domain`.
    ///
    /// A persisted file belonging to a different deployment domain is
    /// universally invalid and cleared before any lookup - this is what
    /// prevents stale cross-environment role leakage.
    pub fn open(path: PathBuf, domain: &str, ttl: Duration) -> Self {
        let entries = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) if file.domain == domain => file.entries,
                Ok(file) => {
                    debug!(
                        stored = %file.domain,
                        current = %domain,
                        "session cache belongs to a different domain; clearing"
                    );
                    HashMap::new()
                }
                Err(e) => {
                    warn!("session cache file unreadable, starting empty: {}", e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path,
            domain: domain.to_string(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(24)),
            entries: Mutex::new(entries),
        }
    }

    /// A fresh cached assignment for `email`, or `None`.
    ///
    /// Stale entries and email mismatches are misses. Stale entries are
    /// not removed here; the next `put` overwrites them.
    pub fn get(&self, email: &str) -> Option<CachedAssignment> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(email)?;

        if entry.email != email {
            return None;
        }
        if Utc::now().signed_duration_since(entry.cached_at) >= self.ttl {
            debug!(email = %email, "cached assignment is stale; treating as miss");
            return None;
        }

        Some(entry.clone())
    }

    /// Store the assignment for `email`, overwriting any previous entry.
    pub fn put(&self, email: &str, assignment: &RoleAssignment) {
        let entry = CachedAssignment {
            email: email.to_string(),
            role: assignment.role,
            tenant_id: assignment.tenant_id.clone(),
            directory_id: assignment.directory_id.clone(),
            cached_at: Utc::now(),
        };

        let mut entries = self.entries.lock().unwrap();
        entries.insert(email.to_string(), entry);
        self.persist(&entries);
    }

    /// Remove the entry for `email`, or clear everything when `None`.
    pub fn invalidate(&self, email: Option<&str>) {
        let mut entries = self.entries.lock().unwrap();
        match email {
            Some(email) => {
                entries.remove(email);
            }
            None => entries.clear(),
        }
        self.persist(&entries);
    }

    /// Best-effort write-through. A failed write only costs the
    /// optimization, so it is logged and ignored.
    fn persist(&self, entries: &HashMap<String, CachedAssignment>) {
        let file = CacheFile {
            domain: self.domain.clone(),
            entries: entries.clone(),
        };
        let result = serde_json::to_vec_pretty(&file)
            .map_err(std::io::Error::other)
            .and_then(|bytes| std::fs::write(&self.path, bytes));
        if let Err(e) = result {
            warn!("failed to persist session cache: {}", e);
        }
    }
}
