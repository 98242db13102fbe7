//! TCP duplex transport for the AeroLink edge agent.
//!
//! One TCP connection carries both directions: [`TcpUplink`] dials the
//! center, keeps the write half for telemetry and status frames, and hands
//! the read half back from `connect()` as the downlink
//! [`FrameSource`](aerolink_domain::FrameSource).

mod uplink;

// --- public API
pub use uplink::TcpUplink;
