use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the session/role-resolution core, loaded from
/// environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Base URL of the identity store (GoTrue-style auth API).
    pub identity_url: String,
    /// Public API key sent with identity store requests.
    pub identity_api_key: String,
    /// Postgres connection string for the role directory registries.
    pub database_url: String,
    /// Deployment domain the session cache is scoped to. A cache file
    /// written under a different domain is cleared before any lookup.
    pub deploy_domain: String,
    /// Where the session cache file lives.
    pub cache_path: PathBuf,
    /// Freshness window for cached assignments.
    pub cache_ttl: Duration,
    /// Overall budget for one resolution (the resolver-internal race).
    pub resolve_timeout: Duration,
    /// Attempts per registry query.
    pub lookup_attempts: u32,
    /// Initial backoff delay; doubles per retry.
    pub backoff_base: Duration,
    /// Ceiling on how long the context may sit in `resolving` before it
    /// forces the sub_admin fallback. Layered under `resolve_timeout`.
    pub breaker_timeout: Duration,
    /// Delay before the in-flight guard resets after a resolution
    /// settles, so a near-simultaneous duplicate event is still dropped.
    pub resolution_grace: Duration,
    /// Scheduled session refresh period.
    pub refresh_interval: Duration,
    /// Minimum gap between successful refreshes (debounce).
    pub refresh_min_gap: Duration,
    /// Minimum gap before a foreground-visibility event refreshes.
    pub foreground_min_gap: Duration,
    /// Operational break-glass identity resolved to super_admin without
    /// a directory lookup. Off unless explicitly configured; every use
    /// is audit-logged. A temporary escape hatch, not a security feature.
    pub break_glass_email: Option<String>,
}

impl AuthConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        // Local/dev deployments get a shorter resolution budget than
        // production network latency warrants.
        let dev = env::var("AUTH_ENV")
            .map(|v| v == "dev")
            .unwrap_or(false);
        let default_resolve_secs = if dev { 5 } else { 10 };

        let resolve_timeout = match env::var("RESOLVE_TIMEOUT_SECS") {
            Ok(v) => Duration::from_secs(
                v.parse().context("RESOLVE_TIMEOUT_SECS must be a valid number")?,
            ),
            Err(_) => Duration::from_secs(default_resolve_secs),
        };

        Ok(Self {
            identity_url: env::var("IDENTITY_URL")
                .context("IDENTITY_URL must be set")?,
            identity_api_key: env::var("IDENTITY_API_KEY")
                .context("IDENTITY_API_KEY must be set")?,
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            deploy_domain: env::var("DEPLOY_DOMAIN")
                .context("DEPLOY_DOMAIN must be set")?,
            cache_path: env::var("SESSION_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(".session-cache.json")),
            resolve_timeout,
            break_glass_email: env::var("BREAK_GLASS_EMAIL").ok(),
            ..Self::default()
        })
    }
}

impl Default for AuthConfig {
    /// Development defaults. Production deployments load everything via
    /// `from_env`.
    fn default() -> Self {
        Self {
            identity_url: "http://localhost:9999".to_string(),
            identity_api_key: String::new(),
            database_url: "postgres://localhost/school_finance".to_string(),
            deploy_domain: "localhost".to_string(),
            cache_path: PathBuf::from(".session-cache.json"),
            cache_ttl: Duration::from_secs(24 * 60 * 60),
            resolve_timeout: Duration::from_secs(10),
            lookup_attempts: 3,
            backoff_base: Duration::from_secs(1),
            breaker_timeout: Duration::from_secs(3),
            resolution_grace: Duration::from_millis(250),
            refresh_interval: Duration::from_secs(45 * 60),
            refresh_min_gap: Duration::from_secs(30 * 60),
            foreground_min_gap: Duration::from_secs(10 * 60),
            break_glass_email: None,
        }
    }
}
