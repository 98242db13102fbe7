//! [`DownlinkClient`] — receive loop over the shared connection's read half.
//!
//! The client never dials. It is handed a
//! [`FrameSource`](aerolink_domain::FrameSource) by whoever owns the uplink
//! connection, reassembles newline-delimited frames from the raw byte
//! stream, classifies each via [`framing`](crate::framing), and forwards
//! the result as a [`DownlinkEvent`] on an mpsc channel. The consumer
//! (the agent worker) does ack registration and dispatch; this task only
//! reads and parses.
//!
//! A read error or peer close ends the task with a log line. Reconnection
//! is not triggered from here: the uplink send path notices the dead
//! connection and drives recovery, after which a fresh read half is handed
//! to [`connect`](DownlinkClient::connect) again.

use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

// ---

use aerolink_domain::{DownlinkMessage, FrameSource, LinkError, Result};

// ---

use super::framing::{parse_frame, Frame};
use super::stats::{ErrorKind, ErrorStatistics};

// ---------------------------------------------------------------------------
// DownlinkEvent
// ---------------------------------------------------------------------------

/// One classified arrival, forwarded to the agent worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownlinkEvent {
    // ---
    Message(DownlinkMessage),

    /// `ACK:` frame carrying this request id.
    Ack(String),
}

// ---------------------------------------------------------------------------
// DownlinkClient
// ---------------------------------------------------------------------------

pub struct DownlinkClient {
    // ---
    events: mpsc::Sender<DownlinkEvent>,

    /// Read half parked here between `connect` and `start_receiving`.
    source: Option<FrameSource>,

    /// Stop signal + handle of the running receive task, if any.
    receiver: Option<(watch::Sender<bool>, JoinHandle<()>)>,

    stats: Option<std::sync::Arc<ErrorStatistics>>,
}

// ---

impl DownlinkClient {
    // ---
    /// `events` is where every classified frame is delivered.
    pub fn new(events: mpsc::Sender<DownlinkEvent>) -> Self {
        Self {
            events,
            source: None,
            receiver: None,
            stats: None,
        }
    }

    // ---

    /// Count receive failures in the given registry.
    pub fn with_stats(mut self, stats: std::sync::Arc<ErrorStatistics>) -> Self {
        self.stats = Some(stats);
        self
    }

    // ---

    /// Accept the shared connection's read half.
    ///
    /// This client never opens a connection of its own; calling this
    /// without a fresh handle from the uplink side is the only way in.
    pub fn connect(&mut self, source: FrameSource) -> Result<()> {
        // ---
        if self.source.is_some() || self.receiver.is_some() {
            return Err(LinkError::Connection(
                "downlink already connected; disconnect first".into(),
            ));
        }
        self.source = Some(source);
        tracing::info!("downlink attached to shared connection");
        Ok(())
    }

    // ---

    /// Spawn the receive task. Idempotent: a second call while a task is
    /// running succeeds without spawning another.
    pub fn start_receiving(&mut self, uav_id: &str) -> Result<()> {
        // ---
        if self.receiver.is_some() {
            return Ok(());
        }

        let source = self.source.take().ok_or_else(|| {
            LinkError::Connection("downlink not connected, cannot start receiving".into())
        })?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let events = self.events.clone();
        let uav_id = uav_id.to_string();
        let stats = self.stats.clone();

        let handle = tokio::spawn(async move {
            receive_loop(source, events, stop_rx, uav_id, stats).await;
        });
        self.receiver = Some((stop_tx, handle));
        tracing::info!("downlink receive task started");
        Ok(())
    }

    // ---

    /// Signal the receive task and wait for it to exit. Prompt: the task
    /// is always parked in `select!`, never in an uncancellable read.
    pub async fn stop_receiving(&mut self) {
        // ---
        if let Some((stop_tx, handle)) = self.receiver.take() {
            let _ = stop_tx.send(true);
            let _ = handle.await;
            tracing::info!("downlink receive task stopped");
        }
    }

    // ---

    /// Forget the connection state. Does not close the socket: the read
    /// half dies with the receive task, the write half belongs to the
    /// uplink client.
    pub fn disconnect(&mut self) {
        // ---
        if self.source.take().is_some() || self.receiver.is_some() {
            tracing::info!("downlink detached");
        }
    }

    // ---

    /// Whether a receive task is currently running.
    pub fn is_receiving(&self) -> bool {
        self.receiver.is_some()
    }
}

// ---------------------------------------------------------------------------
// receive_loop
// ---------------------------------------------------------------------------

async fn receive_loop(
    mut source: FrameSource,
    events: mpsc::Sender<DownlinkEvent>,
    mut stop_rx: watch::Receiver<bool>,
    uav_id: String,
    stats: Option<std::sync::Arc<ErrorStatistics>>,
) {
    // ---
    let mut acc: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                // A closed stop channel means the owner is gone; treat it
                // as a stop rather than spinning on the dead receiver.
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }

            read = source.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        tracing::info!(uav_id, "center closed the connection");
                        break;
                    }
                    Ok(n) => {
                        acc.extend_from_slice(&chunk[..n]);
                        for line in drain_frames(&mut acc) {
                            deliver(&events, &line).await;
                        }
                    }
                    Err(e) => {
                        let err = LinkError::Receive(e.to_string());
                        if let Some(stats) = &stats {
                            stats.record(ErrorKind::Receive, &err.to_string());
                        }
                        tracing::warn!(uav_id, "{err}; receive loop ending");
                        break;
                    }
                }
            }
        }
    }
}

// ---

/// Split every complete `\n`-terminated frame out of `acc`, leaving any
/// trailing partial frame in place for the next read.
fn drain_frames(acc: &mut Vec<u8>) -> Vec<String> {
    // ---
    let mut frames = Vec::new();
    while let Some(pos) = acc.iter().position(|&b| b == b'\n') {
        let frame: Vec<u8> = acc.drain(..=pos).take(pos).collect();
        if frame.is_empty() {
            continue;
        }
        match String::from_utf8(frame) {
            Ok(line) => frames.push(line),
            Err(e) => tracing::warn!("dropping non-UTF-8 frame: {e}"),
        }
    }
    frames
}

// ---

async fn deliver(events: &mpsc::Sender<DownlinkEvent>, line: &str) {
    // ---
    let event = match parse_frame(line) {
        Some(Frame::Message(msg)) => DownlinkEvent::Message(msg),
        Some(Frame::Ack(id)) => DownlinkEvent::Ack(id),
        // Traffic belonging to another logical stream; not ours, not an error.
        None => return,
    };

    if events.send(event).await.is_err() {
        tracing::debug!("downlink event channel closed, dropping frame");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
