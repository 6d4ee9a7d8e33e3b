// End-to-end tests of the session/role-resolution core, wired with the
// mock identity store and role directory.

use std::sync::Arc;
use std::time::Duration;

use auth_core::test_dependencies::{test_session, MockIdentityStore, MockRoleDirectory};
use auth_core::types::{AuthEvent, AuthSnapshot, AuthState, Registry, Role};
use auth_core::{
    route_decision, AuthConfig, AuthContext, BaseIdentityStore, LookupError, Resolver,
    RoleAssignment, RouteDecision, SessionCache, SessionRefresher,
};

struct Harness {
    context: Arc<AuthContext>,
    store: Arc<MockIdentityStore>,
    cache: Arc<SessionCache>,
    directory_calls: Arc<std::sync::Mutex<Vec<(Registry, String)>>>,
    config: AuthConfig,
    _dir: tempfile::TempDir,
}

fn harness(directory: MockRoleDirectory) -> Harness {
    harness_with_config(
        directory,
        AuthConfig {
            backoff_base: Duration::from_millis(10),
            resolution_grace: Duration::from_millis(50),
            ..AuthConfig::default()
        },
    )
}

fn harness_with_config(directory: MockRoleDirectory, config: AuthConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(SessionCache::open(
        dir.path().join("cache.json"),
        "app.example.com",
        config.cache_ttl,
    ));
    let directory_calls = directory.calls_handle();
    let resolver = Arc::new(Resolver::new(
        Arc::new(directory),
        Arc::clone(&cache),
        &config,
    ));
    let store = Arc::new(MockIdentityStore::new());
    let context = AuthContext::new(
        store.clone() as Arc<dyn BaseIdentityStore>,
        resolver,
        Arc::clone(&cache),
        &config,
    );
    Harness {
        context,
        store,
        cache,
        directory_calls,
        config,
        _dir: dir,
    }
}

async fn settled(context: &Arc<AuthContext>) -> AuthSnapshot {
    let mut rx = context.subscribe();
    loop {
        let snap = rx.borrow_and_update().clone();
        if snap.state() != AuthState::Resolving || snap.identity.is_none() {
            return snap;
        }
        rx.changed().await.unwrap();
    }
}

#[tokio::test]
async fn school_admin_sign_in_reaches_ready_with_tenant() {
    let h = harness(
        MockRoleDirectory::new().with_record(Registry::SchoolAdmins, "a@x.com", "row-1", Some("T1")),
    );
    h.context.spawn();

    h.context.sign_in("a@x.com", "secret").await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let snap = settled(&h.context).await;
    assert_eq!(snap.state(), AuthState::Ready);
    assert_eq!(snap.role, Some(Role::SchoolAdmin));
    assert_eq!(snap.tenant_id.as_deref(), Some("T1"));

    // Route guard: the school-admin dashboard renders, the super-admin
    // one does not.
    assert_eq!(
        route_decision(&snap, &[Role::SchoolAdmin]),
        RouteDecision::Render
    );
    assert_eq!(
        route_decision(&snap, &[Role::SuperAdmin]),
        RouteDecision::RedirectToUnauthorized
    );
}

#[tokio::test]
async fn unprovisioned_identity_settles_as_sub_admin() {
    let h = harness(MockRoleDirectory::new());
    h.context
        .handle_event(AuthEvent::SignedIn(test_session("b@x.com")))
        .await;

    let snap = settled(&h.context).await;
    assert_eq!(snap.role, Some(Role::SubAdmin));
    assert!(snap.tenant_id.is_none());
}

#[tokio::test]
async fn resolution_is_idempotent_and_cache_suppresses_requeries() {
    let h = harness(
        MockRoleDirectory::new().with_record(Registry::FinanceStaff, "f@x.com", "fs-1", Some("T2")),
    );

    h.context
        .handle_event(AuthEvent::SignedIn(test_session("f@x.com")))
        .await;
    let first = settled(&h.context).await;
    let calls_after_first = h.directory_calls.lock().unwrap().len();

    h.context
        .handle_event(AuthEvent::TokenRefreshed(test_session("f@x.com")))
        .await;
    let second = settled(&h.context).await;

    assert_eq!(first.role, second.role);
    assert_eq!(first.tenant_id, second.tenant_id);
    assert_eq!(
        h.directory_calls.lock().unwrap().len(),
        calls_after_first,
        "warm cache must not re-query the registries"
    );
}

#[tokio::test(start_paused = true)]
async fn total_failure_with_fresh_cache_falls_back_to_cached_role() {
    // Every registry throws transient errors on every attempt and the
    // overall budget elapses mid-retry; the fresh cached assignment for
    // this email wins over the sub_admin fallback.
    let directory = MockRoleDirectory::new()
        .with_persistent_error(Registry::SuperAdmins, LookupError::Transient("net down".into()))
        .with_persistent_error(Registry::SchoolAdmins, LookupError::Transient("net down".into()))
        .with_persistent_error(Registry::FinanceStaff, LookupError::Transient("net down".into()))
        .with_response_delay(Duration::from_secs(4));
    let config = AuthConfig {
        resolve_timeout: Duration::from_secs(10),
        backoff_base: Duration::from_secs(1),
        ..AuthConfig::default()
    };

    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(SessionCache::open(
        dir.path().join("cache.json"),
        "app.example.com",
        config.cache_ttl,
    ));
    cache.put(
        "c@x.com",
        &RoleAssignment {
            role: Role::SchoolAdmin,
            tenant_id: Some("T1".to_string()),
            directory_id: Some("row-1".to_string()),
        },
    );

    let resolver = Resolver::new(Arc::new(directory), Arc::clone(&cache), &config);
    let assignment = resolver.resolve("c@x.com").await;
    assert_eq!(assignment.role, Role::SchoolAdmin);
    assert_eq!(assignment.tenant_id.as_deref(), Some("T1"));
}

#[tokio::test(start_paused = true)]
async fn total_failure_without_cache_degrades_to_sub_admin() {
    let directory = MockRoleDirectory::new()
        .with_persistent_error(Registry::SuperAdmins, LookupError::Transient("net down".into()))
        .with_persistent_error(Registry::SchoolAdmins, LookupError::Transient("net down".into()))
        .with_persistent_error(Registry::FinanceStaff, LookupError::Transient("net down".into()))
        .with_response_delay(Duration::from_secs(4));
    let config = AuthConfig {
        resolve_timeout: Duration::from_secs(10),
        breaker_timeout: Duration::from_secs(60),
        backoff_base: Duration::from_secs(1),
        ..AuthConfig::default()
    };
    let h = harness_with_config(directory, config);

    h.context
        .handle_event(AuthEvent::SignedIn(test_session("c@x.com")))
        .await;
    let snap = settled(&h.context).await;
    assert_eq!(snap.role, Some(Role::SubAdmin));
    assert!(snap.tenant_id.is_none());
}

#[tokio::test]
async fn sign_out_resets_everything() {
    let h = harness(
        MockRoleDirectory::new().with_record(Registry::SchoolAdmins, "a@x.com", "row-1", Some("T1")),
    );

    h.context
        .handle_event(AuthEvent::SignedIn(test_session("a@x.com")))
        .await;
    settled(&h.context).await;
    assert!(h.cache.get("a@x.com").is_some());

    h.context.sign_out().await;

    let snap = h.context.snapshot();
    assert_eq!(snap.state(), AuthState::Anonymous);
    assert!(snap.identity.is_none());
    assert!(snap.role.is_none());
    assert!(snap.tenant_id.is_none());
    assert!(!snap.loading);
    assert!(h.cache.get("a@x.com").is_none());
    assert_eq!(
        route_decision(&snap, &[Role::SchoolAdmin]),
        RouteDecision::RedirectToLogin
    );
}

#[tokio::test]
async fn refresher_debounces_within_thirty_minutes() {
    let h = harness(
        MockRoleDirectory::new().with_record(Registry::SchoolAdmins, "a@x.com", "row-1", Some("T1")),
    );
    h.store.set_session(test_session("a@x.com"));
    h.context
        .handle_event(AuthEvent::SignedIn(test_session("a@x.com")))
        .await;
    settled(&h.context).await;

    let refresher = SessionRefresher::new(Arc::clone(&h.context), &h.config);

    // First tick refreshes; an immediate second tick is inside the
    // debounce window and must do nothing.
    refresher.on_tick().await;
    assert_eq!(h.store.refresh_calls(), 1);
    refresher.on_tick().await;
    assert_eq!(h.store.refresh_calls(), 1, "debounced tick must skip");

    // Same for a foreground event right after a refresh.
    refresher.notify_foreground();
    refresher.on_foreground().await;
    assert_eq!(h.store.refresh_calls(), 1);
}

#[tokio::test]
async fn cross_identity_switch_resolves_the_new_email() {
    let h = harness(
        MockRoleDirectory::new()
            .with_record(Registry::SchoolAdmins, "a@x.com", "row-1", Some("T1"))
            .with_record(Registry::SuperAdmins, "root@x.com", "sa-1", None),
    );

    h.context
        .handle_event(AuthEvent::SignedIn(test_session("a@x.com")))
        .await;
    settled(&h.context).await;

    // Wait out the guard's grace delay before the next burst.
    tokio::time::sleep(Duration::from_millis(150)).await;

    h.context
        .handle_event(AuthEvent::SignedIn(test_session("root@x.com")))
        .await;
    let snap = settled(&h.context).await;
    assert_eq!(snap.role, Some(Role::SuperAdmin));
    assert!(snap.tenant_id.is_none());
    assert_eq!(
        snap.identity.as_ref().map(|i| i.email.as_str()),
        Some("root@x.com")
    );
}
