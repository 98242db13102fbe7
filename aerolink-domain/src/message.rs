//! Downlink message model.
//!
//! Everything the Cluster Center sends toward the agent is one of three
//! kinds of newline-delimited frame; after prefix classification and field
//! extraction each becomes a [`DownlinkMessage`]. The JSON payload itself
//! stays opaque to the reliability core and is handed to the registered
//! handler verbatim.

// ---------------------------------------------------------------------------
// DownlinkKind
// ---------------------------------------------------------------------------

/// Frame classification of a downlink message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownlinkKind {
    // ---
    /// Immediate flight command (`CMD:` frame).
    Command,

    /// Mission definition for the external mission engine (`MISSION:` frame).
    Mission,

    /// Dataflow definition for the external flow executor (`FLOW:` frame).
    Flow,
}

// ---

impl DownlinkKind {
    // ---
    /// Human-readable name used in log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            DownlinkKind::Command => "Command",
            DownlinkKind::Mission => "Mission",
            DownlinkKind::Flow => "Flow",
        }
    }
}

// ---------------------------------------------------------------------------
// DownlinkMessage
// ---------------------------------------------------------------------------

/// Fallback uav id applied when the payload carries none.
pub const DEFAULT_UAV_ID: &str = "uav0";

/// One parsed downlink frame.
///
/// `uav_id` and `request_id` are extracted from the JSON payload when
/// present; otherwise `uav_id` falls back to [`DEFAULT_UAV_ID`] and
/// `request_id` is synthesized from the wall clock. A synthesized id still
/// drives local retry bookkeeping, but cannot be correlated by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkMessage {
    // ---
    pub kind: DownlinkKind,

    pub uav_id: String,

    /// Raw JSON text after the frame prefix, forwarded to handlers verbatim.
    pub payload: String,

    pub request_id: String,
}

// ---------------------------------------------------------------------------
// AckStatus
// ---------------------------------------------------------------------------

/// Acknowledgment state of a registered downlink message.
///
/// `Acknowledged` and `TimedOut` are transient: entries in either state are
/// removed by the next ack-manager sweep, so the long-lived set only ever
/// contains `Pending` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    // ---
    Pending,
    Acknowledged,
    TimedOut,
}
