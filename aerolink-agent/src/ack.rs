//! [`MessageAckManager`] — tracks downlink messages awaiting acknowledgment
//! and drives timeout retries.
//!
//! # Lifecycle per entry
//!
//! ```text
//! register ──> Pending ──ack──> Acknowledged ──sweep──> removed
//!                 │
//!                 └─timeout─> retries left?  yes ─> Pending (count+1, clock reset)
//!                                            no  ─> TimedOut ──same sweep──> removed
//! ```
//!
//! Retries fire at a fixed interval (no backoff at this layer). Once
//! retries are exhausted the failure is terminal and silent: one error log
//! line, the entry disappears, and no error propagates upstream. The caller
//! never learns that a specific command was ultimately dropped.
//!
//! # Locking
//!
//! The map sits behind one mutex. A sweep collects every due message under
//! the lock, releases it, and only then invokes the retry callback, so a
//! callback is free to call back into the manager without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

// ---

use tokio::time::Instant;

// ---

use aerolink_domain::{AckStatus, DownlinkMessage, LinkError};

// ---

use super::stats::{ErrorKind, ErrorStatistics};

// ---------------------------------------------------------------------------
// AckConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AckConfig {
    // ---
    /// Retry invocations per message before giving up.
    pub max_retries: u32,

    /// Age at which an unacknowledged entry becomes due.
    pub timeout: Duration,
}

// ---

impl Default for AckConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_millis(5000),
        }
    }
}

// ---------------------------------------------------------------------------
// PendingMessage
// ---------------------------------------------------------------------------

/// Bookkeeping for one registered downlink message.
#[derive(Debug, Clone)]
struct PendingMessage {
    // ---
    message: DownlinkMessage,

    /// Registration time, reset on every retry.
    send_time: Instant,

    retry_count: u32,

    status: AckStatus,
}

// ---------------------------------------------------------------------------
// MessageAckManager
// ---------------------------------------------------------------------------

type RetryCallback = Box<dyn Fn(DownlinkMessage) + Send + Sync>;

// ---

pub struct MessageAckManager {
    // ---
    config: AckConfig,

    pending: Mutex<HashMap<String, PendingMessage>>,

    /// Source for synthesized message ids (`msg_%08d`).
    id_counter: AtomicU64,

    retry_callback: Mutex<Option<RetryCallback>>,

    stats: Option<std::sync::Arc<ErrorStatistics>>,
}

// ---

impl MessageAckManager {
    // ---
    pub fn new(config: AckConfig) -> Self {
        Self {
            config,
            pending: Mutex::new(HashMap::new()),
            id_counter: AtomicU64::new(0),
            retry_callback: Mutex::new(None),
            stats: None,
        }
    }

    // ---

    /// Count terminal timeouts in the given registry.
    pub fn with_stats(mut self, stats: std::sync::Arc<ErrorStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    // ---

    /// Install the retry callback. Invoked once per due message, after the
    /// internal lock has been released.
    pub fn set_retry_callback<F>(&self, callback: F)
    where
        F: Fn(DownlinkMessage) + Send + Sync + 'static,
    {
        *self.retry_callback.lock().unwrap() = Some(Box::new(callback));
    }

    // ---

    /// Register a message for acknowledgment tracking.
    ///
    /// Uses `msg.request_id` when non-empty, otherwise synthesizes a
    /// monotonically increasing id. Returns the id actually used. A second
    /// registration under the same id replaces the first (at most one
    /// pending entry per request id).
    pub fn register_pending(&self, msg: &DownlinkMessage) -> String {
        // ---
        let msg_id = if msg.request_id.is_empty() {
            self.generate_message_id()
        } else {
            msg.request_id.clone()
        };

        let mut message = msg.clone();
        message.request_id = msg_id.clone();

        let entry = PendingMessage {
            message,
            send_time: Instant::now(),
            retry_count: 0,
            status: AckStatus::Pending,
        };

        self.pending.lock().unwrap().insert(msg_id.clone(), entry);
        tracing::debug!(msg_id, "registered pending message");
        msg_id
    }

    // ---

    /// Mark a message acknowledged.
    ///
    /// Unknown ids return `false` with a log line, not an error: the ack
    /// may belong to an entry already swept, or to a message this side
    /// never registered.
    pub fn acknowledge(&self, message_id: &str) -> bool {
        // ---
        let mut pending = self.pending.lock().unwrap();
        match pending.get_mut(message_id) {
            Some(entry) => {
                entry.status = AckStatus::Acknowledged;
                tracing::debug!(message_id, "message acknowledged");
                true
            }
            None => {
                tracing::warn!(message_id, "ack for unknown message");
                false
            }
        }
    }

    // ---

    /// Cooperative sweep, called on every worker tick.
    ///
    /// Retries every due entry with retries remaining, removes everything
    /// acknowledged or exhausted. Retry callbacks run after the lock is
    /// released.
    pub fn update(&self) {
        // ---
        let due = self.sweep();

        if due.is_empty() {
            return;
        }
        let callback = self.retry_callback.lock().unwrap();
        if let Some(cb) = callback.as_ref() {
            for msg in due {
                cb(msg);
            }
        }
    }

    // ---

    /// Status of a message id.
    ///
    /// Any id not currently present reports `Pending`: a never-registered
    /// id and one already swept after its final timeout are
    /// indistinguishable here.
    pub fn status(&self, message_id: &str) -> AckStatus {
        // ---
        self.pending
            .lock()
            .unwrap()
            .get(message_id)
            .map(|e| e.status)
            .unwrap_or(AckStatus::Pending)
    }

    // ---

    /// Entries still awaiting acknowledgment or sweep.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    // ---

    fn generate_message_id(&self) -> String {
        let id = self.id_counter.fetch_add(1, Ordering::Relaxed);
        format!("msg_{id:08}")
    }

    // ---

    /// Advance every entry's state machine under the lock; return the
    /// messages whose retry callback must fire.
    fn sweep(&self) -> Vec<DownlinkMessage> {
        // ---
        let now = Instant::now();
        let mut due = Vec::new();

        let mut pending = self.pending.lock().unwrap();
        pending.retain(|msg_id, entry| {
            if entry.status == AckStatus::Acknowledged {
                return false;
            }

            if now.duration_since(entry.send_time) < self.config.timeout {
                return true;
            }

            if entry.retry_count < self.config.max_retries {
                entry.retry_count += 1;
                entry.send_time = now;
                tracing::info!(
                    msg_id,
                    attempt = entry.retry_count,
                    max = self.config.max_retries,
                    "retrying unacknowledged message"
                );
                due.push(entry.message.clone());
                true
            } else {
                entry.status = AckStatus::TimedOut;
                let err = LinkError::AckTimeout(msg_id.clone());
                if let Some(stats) = &self.stats {
                    stats.record(ErrorKind::AckTimeout, &err.to_string());
                }
                tracing::error!("{err}; dropping");
                false
            }
        });
        drop(pending);

        due
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use aerolink_domain::DownlinkKind;

    use super::*;

    // ---

    fn command(request_id: &str) -> DownlinkMessage {
        DownlinkMessage {
            kind: DownlinkKind::Command,
            uav_id: "uav0".into(),
            payload: r#"{"type":"ARM"}"#.into(),
            request_id: request_id.into(),
        }
    }

    // ---

    #[tokio::test]
    async fn register_returns_request_id() {
        // ---
        let manager = MessageAckManager::new(AckConfig::default());
        assert_eq!(manager.register_pending(&command("req123")), "req123");
    }

    // ---

    #[tokio::test]
    async fn register_synthesizes_missing_id() {
        // ---
        let manager = MessageAckManager::new(AckConfig::default());
        let first = manager.register_pending(&command(""));
        let second = manager.register_pending(&command(""));
        assert_eq!(first, "msg_00000000");
        assert_eq!(second, "msg_00000001");
    }

    // ---

    #[tokio::test]
    async fn ack_before_timeout_suppresses_retry() {
        // ---
        let config = AckConfig {
            max_retries: 3,
            timeout: Duration::from_millis(100),
        };
        let manager = MessageAckManager::new(config);

        let retries = Arc::new(AtomicUsize::new(0));
        let counter = retries.clone();
        manager.set_retry_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.register_pending(&command("r1"));
        assert!(manager.acknowledge("r1"));
        assert_eq!(manager.status("r1"), AckStatus::Acknowledged);

        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 0);
        // Acknowledged entry is swept.
        assert_eq!(manager.pending_count(), 0);
    }

    // ---

    #[tokio::test]
    async fn ack_for_unknown_id_is_false() {
        // ---
        let manager = MessageAckManager::new(AckConfig::default());
        assert!(!manager.acknowledge("ghost"));
        assert_eq!(manager.status("ghost"), AckStatus::Pending);
    }

    // ---

    /// maxRetries=2, timeout=100ms, no ack: retries at ~100ms and ~200ms,
    /// removal at ~300ms, no further callbacks.
    #[tokio::test(start_paused = true)]
    async fn retry_cadence_then_terminal_drop() {
        // ---
        let config = AckConfig {
            max_retries: 2,
            timeout: Duration::from_millis(100),
        };
        let manager = MessageAckManager::new(config);

        let retries = Arc::new(AtomicUsize::new(0));
        let counter = retries.clone();
        manager.set_retry_callback(move |msg| {
            assert_eq!(msg.request_id, "req-42");
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.register_pending(&command("req-42"));

        // Just before the first timeout nothing fires.
        tokio::time::advance(Duration::from_millis(99)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 0);

        // ~100 ms: first retry.
        tokio::time::advance(Duration::from_millis(1)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 1);
        assert_eq!(manager.pending_count(), 1);

        // ~200 ms: second retry.
        tokio::time::advance(Duration::from_millis(100)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 2);

        // ~300 ms: retries exhausted, entry removed silently.
        tokio::time::advance(Duration::from_millis(100)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 2);
        assert_eq!(manager.pending_count(), 0);
        assert_eq!(manager.status("req-42"), AckStatus::Pending);

        // Nothing ever fires again.
        tokio::time::advance(Duration::from_millis(500)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    // ---

    /// A retry resets the entry's clock: the next retry is a full timeout
    /// after the previous one, not after registration.
    #[tokio::test(start_paused = true)]
    async fn retry_interval_is_fixed_not_cumulative() {
        // ---
        let config = AckConfig {
            max_retries: 3,
            timeout: Duration::from_millis(100),
        };
        let manager = MessageAckManager::new(config);

        let retries = Arc::new(AtomicUsize::new(0));
        let counter = retries.clone();
        manager.set_retry_callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        manager.register_pending(&command("r1"));

        tokio::time::advance(Duration::from_millis(100)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 1);

        // 50 ms later the entry is not yet due again.
        tokio::time::advance(Duration::from_millis(50)).await;
        manager.update();
        assert_eq!(retries.load(Ordering::SeqCst), 1);
    }

    // ---

    /// The callback may re-enter the manager; the sweep must not hold the
    /// lock across the invocation.
    #[tokio::test(start_paused = true)]
    async fn retry_callback_may_reenter_manager() {
        // ---
        let config = AckConfig {
            max_retries: 1,
            timeout: Duration::from_millis(50),
        };
        let manager = Arc::new(MessageAckManager::new(config));

        let inner = manager.clone();
        manager.set_retry_callback(move |msg| {
            // Reentrant call: query and re-register under another id.
            let _ = inner.status(&msg.request_id);
            inner.register_pending(&command("reentrant"));
        });

        manager.register_pending(&command("r1"));
        tokio::time::advance(Duration::from_millis(50)).await;
        manager.update();

        assert_eq!(manager.pending_count(), 2);
    }
}
