//! Core traits and types for the AeroLink edge agent.
//!
//! This crate defines the vocabulary of the system. All other crates depend
//! on `aerolink-domain` and speak its types. No I/O implementations live
//! here.
//!
//! # Structure
//!
//! - [`error`]     — [`LinkError`] and [`Result<T>`] alias
//! - [`message`]   — [`DownlinkMessage`], [`DownlinkKind`], [`AckStatus`]
//! - [`telemetry`] — [`TelemetryMessage`] and the [`TelemetryPublisher`] handle
//! - [`transport`] — [`UplinkTransport`] trait and the [`FrameSource`] handle
//! - [`handler`]   — [`CommandHandler`], [`MissionHandler`], [`FlowHandler`] seams

mod error;
mod handler;
mod message;
mod telemetry;
mod transport;

// --- error
pub use error::{LinkError, Result};

// --- message
pub use message::{AckStatus, DownlinkKind, DownlinkMessage, DEFAULT_UAV_ID};

// --- telemetry
pub use telemetry::{
    // ---
    Attitude,
    Battery,
    Gps,
    Position,
    TelemetryMessage,
    TelemetryPublisher,
    Velocity,
};

// --- transport
pub use transport::{FrameSource, UplinkTransport};

// --- handler
pub use handler::{CommandHandler, FlowHandler, FlowStatus, MissionHandler};
