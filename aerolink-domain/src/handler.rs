//! Collaborator seams for downlink execution.
//!
//! The agent core never interprets a downlink payload; it classifies and
//! dispatches. These traits are the boundary to the external executors:
//! flight-command encoding, the behavior-tree mission engine, and the
//! dataflow executor all live behind them.
//!
//! Handler results are fire-and-forget: a `false` return is logged by the
//! dispatcher and goes no further. Handlers may be re-invoked with the same
//! message when its acknowledgment times out, so implementations should
//! treat execution as idempotent.

use async_trait::async_trait;

use super::message::DownlinkMessage;

// ---------------------------------------------------------------------------
// CommandHandler
// ---------------------------------------------------------------------------

/// Executes `CMD:` messages (e.g. `{"type":"ARM","targetAlt":10.0}`).
#[async_trait]
pub trait CommandHandler: Send + Sync {
    // ---
    /// Returns whether the command was accepted for execution.
    async fn handle_command(&self, msg: &DownlinkMessage) -> bool;
}

// ---------------------------------------------------------------------------
// MissionHandler
// ---------------------------------------------------------------------------

/// Executes `MISSION:` messages and advances the mission engine.
#[async_trait]
pub trait MissionHandler: Send + Sync {
    // ---
    /// Returns whether the mission definition was accepted.
    async fn handle_mission(&self, msg: &DownlinkMessage) -> bool;

    /// Advance the running mission, if any. Called on every worker tick.
    async fn update(&self);
}

// ---------------------------------------------------------------------------
// FlowHandler
// ---------------------------------------------------------------------------

/// Executes `FLOW:` messages and advances the flow executor.
///
/// Status reporting does not go through this trait: the embedder's flow
/// engine sends [`FlowStatus`] values on the channel obtained from
/// `NodeAgent::flow_status_tx`, and the agent serializes them uplink.
#[async_trait]
pub trait FlowHandler: Send + Sync {
    // ---
    /// Returns whether the flow definition was accepted.
    async fn handle_flow(&self, msg: &DownlinkMessage) -> bool;

    /// Advance the running flow, if any. Called on every worker tick.
    async fn update(&self);
}

// ---------------------------------------------------------------------------
// FlowStatus
// ---------------------------------------------------------------------------

/// One flow lifecycle event, reported uplink as a `flow_status` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStatus {
    // ---
    pub flow_id: String,

    /// Lifecycle string understood by the center: `started`, `running`,
    /// `completed`, `failed`, `stopped`.
    pub status: String,

    /// Populated on `failed`.
    pub error: Option<String>,
}
