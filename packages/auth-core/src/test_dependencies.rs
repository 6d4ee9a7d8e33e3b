// Mock collaborators for testing.
//
// Provides scriptable stand-ins for the identity store and role
// directory so the resolver, auth context and refresher can be exercised
// without a backend.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{IdentityError, LookupError};
use crate::traits::{BaseIdentityStore, BaseRoleDirectory};
use crate::types::{AuthEvent, DirectoryRecord, Identity, Registry, Session};

/// Build a throwaway session for `email`.
pub fn test_session(email: &str) -> Session {
    Session {
        identity: Identity {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            issued_at: Utc::now(),
            metadata: serde_json::Value::Null,
        },
        access_token: format!("access-{}", Uuid::new_v4()),
        refresh_token: format!("refresh-{}", Uuid::new_v4()),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    }
}

// =============================================================================
// Mock Role Directory
// =============================================================================

pub struct MockRoleDirectory {
    records: Mutex<HashMap<(Registry, String), Vec<DirectoryRecord>>>,
    /// Errors consumed one per call, per registry, before standing
    /// records are consulted.
    error_scripts: Mutex<HashMap<Registry, Vec<LookupError>>>,
    /// An error returned on every call to a registry.
    persistent_errors: Mutex<HashMap<Registry, LookupError>>,
    /// Simulated backend latency per call.
    response_delay: Mutex<Option<Duration>>,
    calls: Arc<Mutex<Vec<(Registry, String)>>>,
}

impl MockRoleDirectory {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            error_scripts: Mutex::new(HashMap::new()),
            persistent_errors: Mutex::new(HashMap::new()),
            response_delay: Mutex::new(None),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Add a standing registry row for an email.
    pub fn with_record(
        self,
        registry: Registry,
        email: &str,
        id: &str,
        tenant_id: Option<&str>,
    ) -> Self {
        self.records
            .lock()
            .unwrap()
            .entry((registry, email.to_string()))
            .or_default()
            .push(DirectoryRecord {
                id: id.to_string(),
                tenant_id: tenant_id.map(str::to_string),
            });
        self
    }

    /// Script errors for a registry, consumed one per call.
    pub fn with_errors(self, registry: Registry, errors: Vec<LookupError>) -> Self {
        let mut scripts = self.error_scripts.lock().unwrap();
        scripts.entry(registry).or_default().extend(errors);
        drop(scripts);
        self
    }

    /// Make every call to a registry fail with this error.
    pub fn with_persistent_error(self, registry: Registry, error: LookupError) -> Self {
        self.persistent_errors.lock().unwrap().insert(registry, error);
        self
    }

    /// Delay every response, to simulate a slow backend.
    pub fn with_response_delay(self, delay: Duration) -> Self {
        *self.response_delay.lock().unwrap() = Some(delay);
        self
    }

    /// A handle to the recorded calls, usable after the mock has been
    /// moved into a resolver.
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<(Registry, String)>>> {
        Arc::clone(&self.calls)
    }
}

impl Default for MockRoleDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseRoleDirectory for MockRoleDirectory {
    async fn find_by_email(
        &self,
        registry: Registry,
        email: &str,
    ) -> Result<Vec<DirectoryRecord>, LookupError> {
        let delay = *self.response_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .lock()
            .unwrap()
            .push((registry, email.to_string()));

        if let Some(error) = self.persistent_errors.lock().unwrap().get(&registry) {
            return Err(error.clone());
        }

        let scripted = {
            let mut scripts = self.error_scripts.lock().unwrap();
            scripts.get_mut(&registry).and_then(|queue| {
                if queue.is_empty() {
                    None
                } else {
                    Some(queue.remove(0))
                }
            })
        };
        if let Some(error) = scripted {
            return Err(error);
        }

        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&(registry, email.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

// =============================================================================
// Mock Identity Store
// =============================================================================

pub struct MockIdentityStore {
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
    next_sign_in_error: Mutex<Option<IdentityError>>,
    next_refresh_error: Mutex<Option<IdentityError>>,
    refresh_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl MockIdentityStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(None),
            events,
            next_sign_in_error: Mutex::new(None),
            next_refresh_error: Mutex::new(None),
            refresh_calls: AtomicUsize::new(0),
            sign_out_calls: AtomicUsize::new(0),
        }
    }

    /// Seed a pre-existing session, as if restored from storage.
    pub fn set_session(&self, session: Session) {
        *self.session.lock().unwrap() = Some(session);
    }

    pub fn fail_next_sign_in(&self, error: IdentityError) {
        *self.next_sign_in_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_refresh(&self, error: IdentityError) {
        *self.next_refresh_error.lock().unwrap() = Some(error);
    }

    /// Emit an auth event as the real store would.
    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

impl Default for MockIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseIdentityStore for MockIdentityStore {
    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<Session, IdentityError> {
        if let Some(error) = self.next_sign_in_error.lock().unwrap().take() {
            return Err(error);
        }
        let session = test_session(email);
        *self.session.lock().unwrap() = Some(session.clone());
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().unwrap() = None;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn refresh_session(&self) -> Result<Session, IdentityError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.next_refresh_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut guard = self.session.lock().unwrap();
        let session = guard.as_ref().ok_or(IdentityError::NoSession)?;
        let refreshed = Session {
            identity: session.identity.clone(),
            access_token: format!("access-{}", Uuid::new_v4()),
            refresh_token: format!("refresh-{}", Uuid::new_v4()),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        *guard = Some(refreshed.clone());
        drop(guard);
        self.emit(AuthEvent::TokenRefreshed(refreshed.clone()));
        Ok(refreshed)
    }

    async fn update_password(&self, _new_password: &str) -> Result<(), IdentityError> {
        if self.session.lock().unwrap().is_none() {
            return Err(IdentityError::NoSession);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
