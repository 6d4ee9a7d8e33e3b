//! Background session refresher.
//!
//! Keeps the session token alive without user interaction:
//!
//! - a scheduled tick roughly every 45 minutes, which only refreshes if
//!   at least 30 minutes have passed since the last successful refresh
//!   (debounce against overlapping timers)
//! - an opportunistic refresh when the application regains foreground
//!   visibility, throttled to once per 10 minutes
//!
//! The refresher only talks to the auth context; a refresh whose token
//! is fatally rejected ends in a full sign-out there, never in a silent
//! retry loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::auth_context::AuthContext;
use crate::config::AuthConfig;

pub struct SessionRefresher {
    context: Arc<AuthContext>,
    interval: Duration,
    min_gap: Duration,
    foreground_min_gap: Duration,
    /// Single in-flight refresh, same guard pattern as the context's
    /// resolution guard.
    refreshing: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
    foreground_tx: mpsc::Sender<()>,
    foreground_rx: Mutex<Option<mpsc::Receiver<()>>>,
    weak_self: std::sync::Weak<SessionRefresher>,
}

impl SessionRefresher {
    pub fn new(context: Arc<AuthContext>, config: &AuthConfig) -> Arc<Self> {
        let (foreground_tx, foreground_rx) = mpsc::channel(4);
        Arc::new_cyclic(|weak| Self {
            context,
            interval: config.refresh_interval,
            min_gap: config.refresh_min_gap,
            foreground_min_gap: config.foreground_min_gap,
            refreshing: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
            foreground_tx,
            foreground_rx: Mutex::new(Some(foreground_rx)),
            weak_self: weak.clone(),
        })
    }

    /// Signal that the application regained foreground visibility.
    /// Cheap and non-blocking; coalesces when the channel is full.
    pub fn notify_foreground(&self) {
        let _ = self.foreground_tx.try_send(());
    }

    /// Run the refresher's timer/event loop for the life of the
    /// process. Panics if called twice.
    pub fn spawn(&self) -> JoinHandle<()> {
        let refresher = self
            .weak_self
            .upgrade()
            .expect("SessionRefresher outlived its Arc");
        let mut foreground_rx = self
            .foreground_rx
            .lock()
            .unwrap()
            .take()
            .expect("SessionRefresher::spawn called twice");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresher.interval);
            // The immediate first tick would refresh right after sign-in.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => refresher.on_tick().await,
                    event = foreground_rx.recv() => match event {
                        Some(()) => refresher.on_foreground().await,
                        None => break,
                    },
                }
            }
        })
    }

    /// Scheduled-timer firing: refresh only if the debounce window has
    /// passed.
    pub async fn on_tick(&self) {
        if self.gap_elapsed(self.min_gap) {
            debug!("scheduled session refresh");
            self.try_refresh().await;
        } else {
            debug!("scheduled refresh skipped; refreshed too recently");
        }
    }

    /// Foreground-visibility firing: a longer-idle user gets a fresher
    /// token, a recently refreshed one is left alone.
    pub async fn on_foreground(&self) {
        if self.gap_elapsed(self.foreground_min_gap) {
            debug!("foreground visibility regained; refreshing session");
            self.try_refresh().await;
        } else {
            debug!("foreground refresh skipped; refreshed too recently");
        }
    }

    fn gap_elapsed(&self, gap: Duration) -> bool {
        self.last_refresh
            .lock()
            .unwrap()
            .map(|at| at.elapsed() >= gap)
            .unwrap_or(true)
    }

    async fn try_refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("refresh already in flight; skipping");
            return;
        }

        if self.context.refresh_session_if_needed().await {
            *self.last_refresh.lock().unwrap() = Some(Instant::now());
        }

        self.refreshing.store(false, Ordering::SeqCst);
    }
}
