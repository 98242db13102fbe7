//! [`ReconnectManager`] — re-establishes the center link with exponential
//! back-off.
//!
//! `trigger()` is safe to call from every failure site: a compare-and-swap
//! on the reconnecting flag guarantees at most one attempt loop at a time,
//! and later triggers while a loop is running are no-ops. The loop keeps
//! invoking the installed [`Reconnect`] attempt until it succeeds, the
//! retry budget is exhausted, or [`stop`](ReconnectManager::stop) is
//! called.
//!
//! The attempt itself is not cancellable: a dial that hangs blocks the
//! current pass until the OS gives up. `stop()` is observed between
//! attempts and during the back-off sleep.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

// ---

use aerolink_domain::LinkError;

// ---

use super::stats::{ErrorKind, ErrorStatistics};

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    // ---
    pub enabled: bool,

    /// Attempt budget; `-1` retries forever.
    pub max_retries: i32,

    pub initial_delay: Duration,

    /// Back-off ceiling.
    pub max_delay: Duration,

    pub backoff_multiplier: f64,
}

// ---

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
        }
    }
}

// ---

/// Next back-off delay: multiply, clamp to the ceiling.
fn next_backoff(delay: Duration, config: &ReconnectConfig) -> Duration {
    delay.mul_f64(config.backoff_multiplier).min(config.max_delay)
}

// ---------------------------------------------------------------------------
// Reconnect
// ---------------------------------------------------------------------------

/// One reconnection attempt. Installed once, at construction.
///
/// Implementations re-establish whatever the owner considers "connected"
/// (for the agent: dial uplink, rewire downlink, restart receiving) and
/// report success. They must tear down any partial progress on failure.
#[async_trait]
pub trait Reconnect: Send + Sync {
    // ---
    async fn attempt(&self) -> bool;
}

// ---------------------------------------------------------------------------
// ReconnectManager
// ---------------------------------------------------------------------------

pub struct ReconnectManager {
    // ---
    config: ReconnectConfig,

    callback: Arc<dyn Reconnect>,

    reconnecting: Arc<AtomicBool>,

    retry_count: Arc<AtomicU32>,

    stop_tx: watch::Sender<bool>,

    task: Mutex<Option<JoinHandle<()>>>,

    stats: Option<Arc<ErrorStatistics>>,
}

// ---

impl ReconnectManager {
    // ---
    pub fn new(config: ReconnectConfig, callback: Arc<dyn Reconnect>) -> Self {
        // ---
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            callback,
            reconnecting: Arc::new(AtomicBool::new(false)),
            retry_count: Arc::new(AtomicU32::new(0)),
            stop_tx,
            task: Mutex::new(None),
            stats: None,
        }
    }

    // ---

    /// Count terminal exhaustion in the given registry.
    pub fn with_stats(mut self, stats: Arc<ErrorStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    // ---

    /// Start the attempt loop unless one is already running (or the
    /// manager is disabled).
    pub async fn trigger(&self) {
        // ---
        if !self.config.enabled {
            return;
        }

        if self
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // A loop is already running; this trigger is a no-op.
            return;
        }

        let config = self.config.clone();
        let callback = self.callback.clone();
        let reconnecting = self.reconnecting.clone();
        let retry_count = self.retry_count.clone();
        let stop_rx = self.stop_tx.subscribe();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            reconnect_loop(config, callback, reconnecting, retry_count, stop_rx, stats).await;
        });
        *self.task.lock().await = Some(handle);
    }

    // ---

    /// Signal the loop to stop and wait for it to exit.
    pub async fn stop(&self) {
        // ---
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        // Allow a later trigger after an explicit stop.
        let _ = self.stop_tx.send_replace(false);
        self.reconnecting.store(false, Ordering::SeqCst);
    }

    // ---

    /// Clear state after the owner reconnected through some other path.
    pub fn reset(&self) {
        // ---
        self.reconnecting.store(false, Ordering::SeqCst);
        self.retry_count.store(0, Ordering::SeqCst);
        let _ = self.stop_tx.send_replace(false);
    }

    // ---

    pub fn is_reconnecting(&self) -> bool {
        self.reconnecting.load(Ordering::SeqCst)
    }

    // ---

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// reconnect_loop
// ---------------------------------------------------------------------------

async fn reconnect_loop(
    config: ReconnectConfig,
    callback: Arc<dyn Reconnect>,
    reconnecting: Arc<AtomicBool>,
    retry_count: Arc<AtomicU32>,
    mut stop_rx: watch::Receiver<bool>,
    stats: Option<Arc<ErrorStatistics>>,
) {
    // ---
    retry_count.store(0, Ordering::SeqCst);
    let mut delay = config.initial_delay;

    loop {
        if *stop_rx.borrow() {
            tracing::info!("reconnect loop stopped");
            break;
        }

        let made = retry_count.load(Ordering::SeqCst);
        if config.max_retries >= 0 && made >= config.max_retries as u32 {
            let err = LinkError::ReconnectExhausted;
            if let Some(stats) = &stats {
                stats.record(ErrorKind::ReconnectExhausted, &err.to_string());
            }
            tracing::error!(max_retries = config.max_retries, "{err}, giving up");
            break;
        }

        let attempt_no = retry_count.fetch_add(1, Ordering::SeqCst) + 1;
        if config.max_retries >= 0 {
            tracing::info!(attempt = attempt_no, max = config.max_retries, "reconnecting");
        } else {
            tracing::info!(attempt = attempt_no, "reconnecting");
        }

        if callback.attempt().await {
            tracing::info!(attempts = attempt_no, "reconnection successful");
            retry_count.store(0, Ordering::SeqCst);
            break;
        }

        tracing::warn!(delay_ms = delay.as_millis() as u64, "reconnection failed, backing off");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => {
                if *stop_rx.borrow() {
                    tracing::info!("reconnect loop stopped during back-off");
                    break;
                }
            }
        }

        delay = next_backoff(delay, &config);
    }

    reconnecting.store(false, Ordering::SeqCst);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
