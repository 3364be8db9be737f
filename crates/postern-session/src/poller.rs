//! Background session refresh loop.
//!
//! Refresh failures feed an exponential backoff; a success collapses the
//! next delay back to the base interval. Jitter is applied to the slept
//! value only, so the failure-derived sequence stays deterministic and
//! testable.

use async_trait::async_trait;
use postern_core::{apply_jitter, exponential_interval, PollingConfig, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Refreshes whatever session is currently active.
///
/// Returning `Ok` when no session is active keeps the loop in its
/// steady-state cadence.
#[async_trait]
pub trait SessionRefresher: Send + Sync {
    /// Refresh the active session's token, if one exists.
    async fn refresh_active_session(&self) -> Result<()>;
}

#[async_trait]
impl<T: SessionRefresher + ?Sized> SessionRefresher for Arc<T> {
    async fn refresh_active_session(&self) -> Result<()> {
        (**self).refresh_active_session().await
    }
}

/// Loop-owned mutable state.
#[derive(Debug, Default)]
struct PollingState {
    consecutive_failures: u32,
    is_running: bool,
}

struct PollerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Idempotent start/stop wrapper around the refresh task.
pub struct SessionPoller {
    config: PollingConfig,
    refresher: Arc<dyn SessionRefresher>,
    state: Arc<Mutex<PollingState>>,
    handle: Mutex<Option<PollerHandle>>,
}

impl SessionPoller {
    /// Create a poller; nothing runs until [`SessionPoller::start`].
    pub fn new(config: PollingConfig, refresher: Arc<dyn SessionRefresher>) -> Self {
        Self {
            config,
            refresher,
            state: Arc::new(Mutex::new(PollingState::default())),
            handle: Mutex::new(None),
        }
    }

    /// Whether the loop is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_running
    }

    /// Current consecutive failure count (drives the backoff).
    pub async fn consecutive_failures(&self) -> u32 {
        self.state.lock().await.consecutive_failures
    }

    /// Start the refresh loop. A no-op while already running.
    pub async fn start(&self) {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            debug!("poller already running, start ignored");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::clone(&self.state);
        let refresher = Arc::clone(&self.refresher);
        let config = self.config;

        state.lock().await.is_running = true;
        let task = tokio::spawn(Self::run_loop(config, refresher, state, shutdown_rx));
        *handle = Some(PollerHandle {
            shutdown: shutdown_tx,
            task,
        });
        info!(
            base_interval_ms = self.config.base_interval_ms,
            max_interval_ms = self.config.max_interval_ms,
            "session polling started"
        );
    }

    /// Stop the refresh loop and reap its task. A no-op while stopped.
    pub async fn stop(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            debug!("poller not running, stop ignored");
            return;
        };
        // Wake the loop out of its sleep; the task exits at the next
        // cancellation check.
        let _ = handle.shutdown.send(true);
        if handle.task.await.is_err() {
            warn!("poller task ended abnormally during stop");
        }
        self.state.lock().await.is_running = false;
        info!("session polling stopped");
    }

    async fn run_loop(
        config: PollingConfig,
        refresher: Arc<dyn SessionRefresher>,
        state: Arc<Mutex<PollingState>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let base = Duration::from_millis(config.base_interval_ms);
        let max = Duration::from_millis(config.max_interval_ms);

        loop {
            if *shutdown.borrow() {
                break;
            }

            match refresher.refresh_active_session().await {
                Ok(()) => {
                    let mut state = state.lock().await;
                    if state.consecutive_failures > 0 {
                        debug!(
                            failures = state.consecutive_failures,
                            "session refresh recovered, backoff reset"
                        );
                    }
                    state.consecutive_failures = 0;
                }
                Err(err) => {
                    // Errors feed the backoff, never the caller.
                    let mut state = state.lock().await;
                    state.consecutive_failures = state.consecutive_failures.saturating_add(1);
                    warn!(
                        failures = state.consecutive_failures,
                        error = %err,
                        "session refresh failed"
                    );
                }
            }

            let failures = state.lock().await.consecutive_failures;
            let interval = exponential_interval(base, failures, max);
            let delay = apply_jitter(interval, &mut rand::thread_rng());

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        state.lock().await.is_running = false;
    }
}
