//! The auth context - the stateful coordinator of the session core.
//!
//! Owns the current identity, role, tenant id and loading flag, and
//! publishes them through a `watch` channel as the single source of
//! truth for route guards and dashboards.
//!
//! # Lifecycle
//!
//! ```text
//! anonymous ──identity──► resolving ──resolver/cache──► ready
//!     ▲                       │                           │
//!     └────────────────── sign-out ──────────────────────┘
//! ```
//!
//! # Race guards
//!
//! Auth-state events can fire in near-simultaneous bursts. Three guards
//! keep the state race-free:
//!
//! - an atomic in-flight flag: at most one resolver invocation at a
//!   time. Duplicate triggers for the same identity are dropped (not
//!   queued); a trigger for a *different* identity instead supersedes
//!   the in-flight pass, whose result is stale either way. The flag
//!   resets only after the owning pass settles plus a short grace delay
//! - an epoch counter: a resolution result is applied only if no newer
//!   identity change, sign-out or forced fallback has settled the state
//!   in the meantime (timeouts abandon I/O rather than aborting it, so
//!   late results must be detectable and discarded)
//! - a circuit breaker, armed per resolution pass: if that pass is still
//!   the active one and still `resolving` past a bounded ceiling, the
//!   state is forced to `ready` with the sub_admin fallback rather than
//!   leaving the UI stuck loading. Layered under, and independent of,
//!   the resolver's own timeout.
//!
//! Multi-tab/multi-process consistency is out of scope: each process
//! runs its own context over a last-writer-wins cache file.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::resolver::Resolver;
use crate::session_cache::SessionCache;
use crate::traits::BaseIdentityStore;
use crate::types::{AuthEvent, AuthSnapshot, RoleAssignment, Session};

pub struct AuthContext {
    identity_store: Arc<dyn BaseIdentityStore>,
    resolver: Arc<Resolver>,
    cache: Arc<SessionCache>,
    state_tx: watch::Sender<AuthSnapshot>,
    /// In-flight guard: at most one resolver invocation at a time.
    resolving: AtomicBool,
    /// Bumped whenever the state settles out from under an in-flight
    /// resolution (identity change, sign-out, breaker fallback).
    epoch: AtomicU64,
    /// Generation of the pass currently holding the in-flight guard.
    /// The grace-delayed guard reset and the circuit breaker act only
    /// on their own pass, never on one that superseded it.
    pass: AtomicU64,
    breaker_timeout: Duration,
    resolution_grace: Duration,
    /// Handle to ourselves for the tasks we spawn (breaker, resolution).
    weak_self: Weak<AuthContext>,
}

impl AuthContext {
    pub fn new(
        identity_store: Arc<dyn BaseIdentityStore>,
        resolver: Arc<Resolver>,
        cache: Arc<SessionCache>,
        config: &AuthConfig,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(AuthSnapshot::anonymous());
        Arc::new_cyclic(|weak| Self {
            identity_store,
            resolver,
            cache,
            state_tx,
            resolving: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            pass: AtomicU64::new(0),
            breaker_timeout: config.breaker_timeout,
            resolution_grace: config.resolution_grace,
            weak_self: weak.clone(),
        })
    }

    /// An owning handle for spawned tasks. The context is only ever
    /// handed out as an `Arc`, so the upgrade cannot fail while a
    /// method is executing.
    fn strong(&self) -> Arc<Self> {
        self.weak_self.upgrade().expect("AuthContext outlived its Arc")
    }

    /// Subscribe to state changes. The receiver always holds the latest
    /// snapshot.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state_tx.subscribe()
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state_tx.borrow().clone()
    }

    /// Restore state from the identity store's current session, if any.
    /// Called once at startup, before `spawn`.
    pub async fn initialize(&self) {
        match self.identity_store.current_session().await {
            Ok(Some(session)) => {
                info!(email = %session.identity.email, "restoring existing session");
                self.on_identity(session).await;
            }
            Ok(None) => {
                debug!("no existing session");
            }
            Err(e) => {
                warn!("failed to read current session at startup: {}", e);
            }
        }
    }

    /// Run the auth-event loop until the identity store's event channel
    /// closes.
    pub fn spawn(&self) -> JoinHandle<()> {
        let ctx = self.strong();
        let mut events = self.identity_store.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => ctx.handle_event(event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        // Dropped events are duplicates of state we will
                        // re-derive from the next one.
                        warn!(missed = n, "auth event stream lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    pub async fn handle_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                self.on_identity(session).await;
            }
            AuthEvent::SignedOut => self.clear_state(),
        }
    }

    /// A new (or re-announced) identity from the identity store.
    ///
    /// Fresh cache hit: straight to `ready` without invoking the
    /// resolver - this is the flicker-avoidance path. Otherwise enter
    /// `resolving` and invoke the resolver exactly once per identity:
    /// same-identity triggers while a resolution is in flight are
    /// dropped, a changed identity supersedes the in-flight pass.
    async fn on_identity(&self, session: Session) {
        let email = session.identity.email.clone();

        let identity_changed = {
            let snap = self.state_tx.borrow();
            snap.identity
                .as_ref()
                .map(|i| i.email != email)
                .unwrap_or(true)
        };
        if identity_changed {
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }

        if let Some(cached) = self.cache.get(&email) {
            debug!(email = %email, role = %cached.role, "fresh cached assignment; skipping resolution");
            if identity_changed {
                // Release the guard of any pass this hit supersedes; the
                // epoch bump above already keeps its result out.
                self.pass.fetch_add(1, Ordering::SeqCst);
                self.resolving.store(false, Ordering::SeqCst);
            }
            self.state_tx.send_replace(AuthSnapshot {
                identity: Some(session.identity.clone()),
                role: Some(cached.role),
                tenant_id: cached.tenant_id.clone(),
                loading: false,
                session: Some(session),
            });
            return;
        }

        if identity_changed {
            // A different identity supersedes an in-flight pass rather
            // than being dropped: its result is stale either way, and
            // the new identity still needs a resolution of its own.
            self.resolving.store(true, Ordering::SeqCst);
        } else if self
            .resolving
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(email = %email, "resolution already in flight; dropping duplicate trigger");
            return;
        }
        let pass = self.pass.fetch_add(1, Ordering::SeqCst) + 1;

        self.state_tx.send_replace(AuthSnapshot {
            identity: Some(session.identity.clone()),
            role: None,
            tenant_id: None,
            loading: true,
            session: Some(session),
        });

        let epoch = self.epoch.load(Ordering::SeqCst);

        // Circuit breaker: bounded time in `resolving`, whatever the
        // resolver is doing.
        let breaker = self.strong();
        let breaker_email = email.clone();
        tokio::spawn(async move {
            tokio::time::sleep(breaker.breaker_timeout).await;
            breaker.force_fallback_if_still_resolving(pass, &breaker_email);
        });

        let ctx = self.strong();
        tokio::spawn(async move {
            let assignment = ctx.resolver.resolve(&email).await;
            ctx.apply_resolution(epoch, &email, assignment);

            // Grace delay before the guard resets, so a duplicate event
            // racing the reset is still dropped. A superseding pass owns
            // the guard now and releases it on its own schedule.
            let guard = Arc::clone(&ctx);
            tokio::spawn(async move {
                tokio::time::sleep(guard.resolution_grace).await;
                if guard.pass.load(Ordering::SeqCst) == pass {
                    guard.resolving.store(false, Ordering::SeqCst);
                }
            });
        });
    }

    /// Apply a settled resolution, unless the state has moved on.
    fn apply_resolution(&self, epoch: u64, email: &str, assignment: RoleAssignment) {
        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(email = %email, "discarding stale resolution result");
            return;
        }
        self.state_tx.send_if_modified(|snap| {
            let current = snap
                .identity
                .as_ref()
                .map(|i| i.email == email)
                .unwrap_or(false);
            if !current {
                debug!(email = %email, "resolution result no longer matches current identity");
                return false;
            }
            snap.role = Some(assignment.role);
            snap.tenant_id = assignment.tenant_id.clone();
            snap.loading = false;
            true
        });
    }

    /// The circuit breaker body: force `ready` with the sub_admin
    /// fallback if this pass is still the active one and still loading.
    /// Keyed to the pass, not the epoch: an identity switch bumps the
    /// epoch, and the switched-to pass must stay covered.
    fn force_fallback_if_still_resolving(&self, pass: u64, email: &str) {
        if self.pass.load(Ordering::SeqCst) != pass {
            return;
        }
        let forced = self.state_tx.send_if_modified(|snap| {
            if !snap.loading || snap.identity.is_none() {
                return false;
            }
            let fallback = RoleAssignment::sub_admin();
            snap.role = Some(fallback.role);
            snap.tenant_id = fallback.tenant_id;
            snap.loading = false;
            true
        });
        if forced {
            warn!(
                email = %email,
                ceiling_ms = self.breaker_timeout.as_millis() as u64,
                "role resolution exceeded ceiling; forcing sub_admin fallback"
            );
            // The forced fallback settles this pass; a late resolver
            // result must not overwrite it.
            self.epoch.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Drop to `anonymous` and remove the cache entry for the identity
    /// that just signed out.
    fn clear_state(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let email = self.state_tx.borrow().identity.as_ref().map(|i| i.email.clone());
        if let Some(email) = &email {
            self.cache.invalidate(Some(email));
            info!(email = %email, "signed out; state cleared");
        }
        self.state_tx.send_replace(AuthSnapshot::anonymous());
    }

    // =========================================================================
    // Actions exposed to the UI layer
    // =========================================================================

    /// Authenticate with email/password. State flows through the
    /// identity store's auth event, handled by the event loop; only the
    /// credential error surfaces here for inline display.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        self.identity_store
            .sign_in_with_password(email, password)
            .await?;
        Ok(())
    }

    /// End the session. Local state clears immediately; the store's
    /// SignedOut event is a no-op echo.
    pub async fn sign_out(&self) {
        if let Err(e) = self.identity_store.sign_out().await {
            // Local state clears regardless; the backend session will
            // age out on its own.
            warn!("identity store sign-out failed: {}", e);
        }
        self.clear_state();
    }

    /// Change the authenticated user's password.
    pub async fn change_password(&self, new_password: &str) -> Result<(), AuthError> {
        self.identity_store.update_password(new_password).await?;
        Ok(())
    }

    /// Refresh the session token if a session exists. Returns whether a
    /// refresh happened. A fatally rejected refresh token signs the user
    /// out rather than retrying forever.
    pub async fn refresh_session_if_needed(&self) -> bool {
        if self.state_tx.borrow().session.is_none() {
            return false;
        }
        match self.identity_store.refresh_session().await {
            Ok(session) => {
                debug!(email = %session.identity.email, "session refreshed");
                true
            }
            Err(e) if e.is_refresh_fatal() => {
                warn!("refresh token rejected; signing out: {}", e);
                // Best effort: the refresh token is already dead
                // server-side.
                if let Err(e) = self.identity_store.sign_out().await {
                    debug!("sign-out after fatal refresh failed: {}", e);
                }
                self.clear_state();
                false
            }
            Err(e) => {
                warn!("session refresh failed: {}", e);
                false
            }
        }
    }
}
