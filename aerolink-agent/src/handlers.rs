//! Null default executors for the collaborator seams.
//!
//! A bare agent (no flight stack wired in) still needs something behind
//! each seam: these log the message and report success, matching what the
//! real executors do before a flight connection is attached. Integration
//! tests substitute recording handlers.

use async_trait::async_trait;

use aerolink_domain::{CommandHandler, DownlinkMessage, FlowHandler, MissionHandler};

// ---------------------------------------------------------------------------
// NullCommandHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NullCommandHandler;

// ---

#[async_trait]
impl CommandHandler for NullCommandHandler {
    async fn handle_command(&self, msg: &DownlinkMessage) -> bool {
        tracing::info!(
            uav_id = %msg.uav_id,
            request_id = %msg.request_id,
            "command received (no flight service attached): {}",
            msg.payload
        );
        true
    }
}

// ---------------------------------------------------------------------------
// NullMissionHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NullMissionHandler;

// ---

#[async_trait]
impl MissionHandler for NullMissionHandler {
    // ---
    async fn handle_mission(&self, msg: &DownlinkMessage) -> bool {
        tracing::info!(
            uav_id = %msg.uav_id,
            request_id = %msg.request_id,
            "mission received (no mission engine attached)"
        );
        true
    }

    async fn update(&self) {}
}

// ---------------------------------------------------------------------------
// NullFlowHandler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct NullFlowHandler;

// ---

#[async_trait]
impl FlowHandler for NullFlowHandler {
    // ---
    async fn handle_flow(&self, msg: &DownlinkMessage) -> bool {
        tracing::info!(
            uav_id = %msg.uav_id,
            request_id = %msg.request_id,
            "flow received (no flow executor attached)"
        );
        true
    }

    async fn update(&self) {}
}
