//! Telemetry model and the in-process publisher handle.
//!
//! The reliability core treats telemetry as opaque: the only contract is
//! that a [`TelemetryMessage`] serializes to a single-line JSON object.
//! The field set mirrors what the onboard flight-state source produces.
//!
//! [`TelemetryPublisher`] is the seam between the SDK side (sensor nodes
//! publishing samples) and the agent worker (forwarding them uplink). It is
//! an explicit, context-owned handle, passed by value where needed. Fan-out
//! rides on [`tokio::sync::broadcast`]: dropping a receiver unsubscribes,
//! and a slow subscriber loses the oldest samples rather than blocking the
//! publisher.

use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// TelemetryMessage
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Attitude {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Velocity {
    pub vx: f64,
    pub vy: f64,
    pub vz: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Battery {
    pub percent: f64,
    pub voltage_mv: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Gps {
    pub fix_type: u8,
    pub num_sat: u8,
}

// ---

/// One flight-state sample.
///
/// Serializes to the uplink wire schema consumed by the Cluster Center:
/// a flat object with `uav_id`, `timestamp_ns`, the nested sub-objects,
/// `link_quality`, and `flight_mode`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetryMessage {
    // ---
    pub uav_id: String,

    pub timestamp_ns: i64,

    pub position: Position,

    pub attitude: Attitude,

    pub velocity: Velocity,

    pub battery: Battery,

    pub gps: Gps,

    /// 0 ..= 100, as reported by the radio.
    pub link_quality: u8,

    pub flight_mode: String,
}

// ---------------------------------------------------------------------------
// TelemetryPublisher
// ---------------------------------------------------------------------------

/// Cheap-clone pub/sub handle for telemetry samples.
///
/// Sensor-side code calls [`publish`](Self::publish); the agent worker
/// holds a receiver from [`subscribe`](Self::subscribe).
#[derive(Clone)]
pub struct TelemetryPublisher {
    // ---
    tx: broadcast::Sender<TelemetryMessage>,
}

// ---

impl TelemetryPublisher {
    // ---
    /// Create a publisher whose subscribers each buffer up to `capacity`
    /// samples before the oldest are dropped.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    // ---

    /// Subscribe to all samples published after this call.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryMessage> {
        self.tx.subscribe()
    }

    // ---

    /// Publish one sample to every live subscriber.
    ///
    /// Returns the number of subscribers that received it; zero when nobody
    /// is listening (not an error: unobserved samples are simply dropped).
    pub fn publish(&self, msg: TelemetryMessage) -> usize {
        self.tx.send(msg).unwrap_or(0)
    }

    // ---

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ---

impl Default for TelemetryPublisher {
    fn default() -> Self {
        Self::new(64)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
