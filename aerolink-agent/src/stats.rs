//! Per-kind failure counters.
//!
//! Most failures on this link are absorbed rather than propagated, so they
//! are counted here where an embedder or operator console can see what the
//! log lines summarize. Owned by the agent and handed out as an `Arc`;
//! there is no process-wide instance.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Failure taxonomy, one counter per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // ---
    /// Dial failure.
    Connect,

    /// Write error on an established connection.
    Send,

    /// Read error or peer close; ends the receive loop.
    Receive,

    /// Per-message terminal failure after retry exhaustion.
    AckTimeout,

    /// Agent-level terminal failure: reconnect budget spent.
    ReconnectExhausted,
}

// ---------------------------------------------------------------------------
// ErrorStats
// ---------------------------------------------------------------------------

/// Snapshot of one counter.
#[derive(Debug, Clone, Default)]
pub struct ErrorStats {
    // ---
    pub count: u64,

    /// Unix seconds of the most recent occurrence.
    pub last_unix_secs: u64,

    pub last_message: String,
}

// ---------------------------------------------------------------------------
// ErrorStatistics
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ErrorStatistics {
    // ---
    stats: Mutex<HashMap<ErrorKind, ErrorStats>>,
}

// ---

impl ErrorStatistics {
    // ---
    pub fn new() -> Self {
        Self::default()
    }

    // ---

    /// Count one occurrence; `message` replaces the stored last message
    /// when non-empty.
    pub fn record(&self, kind: ErrorKind, message: &str) {
        // ---
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut stats = self.stats.lock().unwrap();
        let entry = stats.entry(kind).or_default();
        entry.count += 1;
        entry.last_unix_secs = now;
        if !message.is_empty() {
            entry.last_message = message.to_string();
        }
    }

    // ---

    pub fn count(&self, kind: ErrorKind) -> u64 {
        self.stats
            .lock()
            .unwrap()
            .get(&kind)
            .map(|s| s.count)
            .unwrap_or(0)
    }

    // ---

    /// Copy of all counters.
    pub fn snapshot(&self) -> HashMap<ErrorKind, ErrorStats> {
        self.stats.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn records_count_and_last_message() {
        // ---
        let stats = ErrorStatistics::new();
        assert_eq!(stats.count(ErrorKind::Send), 0);

        stats.record(ErrorKind::Send, "broken pipe");
        stats.record(ErrorKind::Send, "");
        stats.record(ErrorKind::Connect, "refused");

        assert_eq!(stats.count(ErrorKind::Send), 2);
        assert_eq!(stats.count(ErrorKind::Connect), 1);

        let snapshot = stats.snapshot();
        // An empty message leaves the previous one in place.
        assert_eq!(snapshot[&ErrorKind::Send].last_message, "broken pipe");
        assert!(snapshot[&ErrorKind::Send].last_unix_secs > 0);
    }
}
