//! Agent configuration.
//!
//! One struct serves both surfaces: `clap` derive for the daemon binary
//! and a plain `Default` for library embedders. Defaults mirror the values
//! the Cluster Center deployment ships with.

use std::net::SocketAddr;

use clap::Parser;

// ---------------------------------------------------------------------------
// AckOriginator
// ---------------------------------------------------------------------------

/// Which side emits `ACK:` frames for downlink messages.
///
/// The protocol itself does not fix the direction. Center tooling
/// historically self-acks right after sending a command; set `Agent` to
/// have this side acknowledge receipt instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AckOriginator {
    // ---
    /// The center acks its own sends; the agent only consumes `ACK:` frames.
    Center,

    /// The agent sends `ACK:<requestId>` upon receiving each downlink
    /// message; a successfully emitted ack also completes the local
    /// pending-message tracking.
    Agent,
}

// ---------------------------------------------------------------------------
// AgentConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Parser)]
#[command(name = "aerolink-agent", about = "AeroLink edge agent daemon")]
pub struct AgentConfig {
    // ---
    /// Identity reported in telemetry and matched against downlink messages.
    #[arg(long, default_value = "uav0")]
    pub uav_id: String,

    /// TCP address of the Cluster Center.
    #[arg(long, default_value = "127.0.0.1:8888")]
    pub center: SocketAddr,

    /// Interval between synthetic telemetry samples (demo binary only;
    /// embedders publish at their own cadence).
    #[arg(long, default_value_t = 1000)]
    pub telemetry_interval_ms: u64,

    /// Reconnect automatically when the link drops.
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub enable_auto_reconnect: bool,

    /// Reconnect attempt budget; -1 retries forever.
    #[arg(long, default_value_t = 5)]
    pub max_reconnect_retries: i32,

    /// First reconnect back-off delay; doubles up to 30 s.
    #[arg(long, default_value_t = 1000)]
    pub reconnect_initial_delay_ms: u64,

    /// Retry budget per unacknowledged downlink message.
    #[arg(long, default_value_t = 3)]
    pub ack_max_retries: u32,

    /// Age at which an unacknowledged message is retried.
    #[arg(long, default_value_t = 5000)]
    pub ack_timeout_ms: u64,

    /// Which side emits `ACK:` frames.
    #[arg(long, value_enum, default_value = "center")]
    pub ack_originator: AckOriginator,

    /// Log level for the daemon: trace, debug, info, warn, or error.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

// ---

impl Default for AgentConfig {
    fn default() -> Self {
        // ---
        Self {
            uav_id: "uav0".into(),
            center: "127.0.0.1:8888".parse().unwrap(),
            telemetry_interval_ms: 1000,
            enable_auto_reconnect: true,
            max_reconnect_retries: 5,
            reconnect_initial_delay_ms: 1000,
            ack_max_retries: 3,
            ack_timeout_ms: 5000,
            ack_originator: AckOriginator::Center,
            log_level: "info".into(),
        }
    }
}
