//! AeroLink edge agent.
//!
//! Bridges the onboard SDK (telemetry publisher, command/mission/flow
//! executors) to a remote Cluster Center over one duplex TCP connection,
//! with application-level acknowledgment, timeout-driven retry, and
//! exponential-backoff reconnection.
//!
//! # Structure
//!
//! - [`framing`]   — newline/prefix frame codec
//! - [`downlink`]  — receive loop over the shared read half
//! - [`ack`]       — pending-message tracking and timed retries
//! - [`reconnect`] — backoff-driven reconnection
//! - [`stats`]     — per-kind error counters
//! - [`handlers`]  — null default executors for the collaborator seams
//! - [`agent`]     — the [`NodeAgent`] orchestrator
//! - [`config`]    — [`AgentConfig`]

mod ack;
mod agent;
mod config;
mod downlink;
mod framing;
mod handlers;
mod reconnect;
mod stats;

// --- config
pub use config::{AckOriginator, AgentConfig};

// --- framing
pub use framing::{encode_ack, encode_flow_status, parse_frame, Frame};

// --- downlink
pub use downlink::{DownlinkClient, DownlinkEvent};

// --- ack
pub use ack::{AckConfig, MessageAckManager};

// --- reconnect
pub use reconnect::{Reconnect, ReconnectConfig, ReconnectManager};

// --- stats
pub use stats::{ErrorKind, ErrorStatistics, ErrorStats};

// --- handlers
pub use handlers::{NullCommandHandler, NullFlowHandler, NullMissionHandler};

// --- agent
pub use agent::{AgentState, Handlers, NodeAgent};
