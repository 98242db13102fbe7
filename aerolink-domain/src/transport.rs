//! Uplink transport seam.
//!
//! The agent core is transport-agnostic: anything that can dial the Cluster
//! Center and write newline-delimited frames can carry the uplink. The TCP
//! implementation lives in `aerolink-tcp`; an MQTT variant would implement
//! the same trait with pub/sub underneath.
//!
//! # Duplex reuse
//!
//! The TCP wire model uses one connection for both directions. Rather than
//! letting the downlink side fish a raw descriptor out of a concrete uplink
//! type, `connect()` itself surfaces the capability: a transport that shares
//! its connection returns `Some(FrameSource)`, the receive half, ready to
//! be handed to the downlink client. A transport that delivers downlink
//! traffic out of band (MQTT-style) returns `None` and the downlink side is
//! wired independently.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::Result;
use super::telemetry::TelemetryMessage;

// ---------------------------------------------------------------------------
// FrameSource
// ---------------------------------------------------------------------------

/// Receive half of a shared duplex connection.
///
/// Yields raw bytes; the downlink client reassembles newline-delimited
/// frames from it. The holder owns the read side only: dropping it never
/// closes the transport's write side.
pub type FrameSource = Box<dyn AsyncRead + Send + Unpin>;

// ---------------------------------------------------------------------------
// UplinkTransport
// ---------------------------------------------------------------------------

/// Agent → center transport.
///
/// All operations are component-level: there is no per-call timeout on an
/// individual `connect()` or send. Cancellation happens at the owning
/// component (`NodeAgent::stop`), not here.
#[async_trait]
pub trait UplinkTransport: Send {
    // ---
    /// Dial the configured center endpoint.
    ///
    /// On success the transport is connected and, when it shares one
    /// connection for both directions, the downlink receive half is
    /// returned for reuse. Dialing an already-connected transport drops
    /// the old connection first.
    async fn connect(&mut self) -> Result<Option<FrameSource>>;

    /// Serialize one telemetry sample to a single JSON line and send it.
    ///
    /// On a write error the transport disconnects itself and returns
    /// [`LinkError::Send`](super::LinkError::Send); triggering reconnection
    /// is the caller's responsibility.
    async fn send_telemetry(&mut self, msg: &TelemetryMessage) -> Result<()>;

    /// Send an already-serialized frame (ack, status report) + newline.
    ///
    /// Same failure contract as [`send_telemetry`](Self::send_telemetry).
    async fn send_raw(&mut self, line: &str) -> Result<()>;

    /// Whether the last connect succeeded and no send has failed since.
    fn is_connected(&self) -> bool;

    /// Drop the connection. Idempotent. The transport owns the write half;
    /// the socket itself closes once the downlink side has also released
    /// its receive half.
    async fn disconnect(&mut self);
}
