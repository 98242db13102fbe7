//! AeroLink agent daemon.
//!
//! Connects the edge side to a Cluster Center and keeps the link alive.
//! Until a flight stack is wired in, telemetry is synthesized at the
//! configured interval so the full uplink/downlink/ack path can be
//! exercised against a real center (or the `center-mock` demo).
//!
//! Usage:
//!   aerolink-agent --uav-id uav0 --center 127.0.0.1:8888

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ---

use clap::Parser;
use tracing::info;

// ---

use aerolink_agent::{AgentConfig, NodeAgent};
use aerolink_domain::{Battery, Gps, Position, TelemetryMessage, TelemetryPublisher};

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = AgentConfig::parse();

    let no_color = std::env::var("EMACS").is_ok()
        || std::env::var("NO_COLOR").is_ok()
        || std::env::var("CARGO_TERM_COLOR").as_deref() == Ok("never")
        || !std::io::IsTerminal::is_terminal(&std::io::stdout());

    let level: tracing::Level = cfg.log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt()
        .with_target(false)
        .with_ansi(!no_color)
        .with_max_level(level)
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        uav_id = %cfg.uav_id,
        center = %cfg.center,
        "aerolink-agent starting",
    );

    let publisher = TelemetryPublisher::default();
    let mut agent = NodeAgent::new(cfg.clone(), publisher.clone());

    // A failed start leaves the agent Stopped with the back-off loop dialing
    // in the background. The worker only exists after a successful start(),
    // so keep retrying once each back-off pass has ended.
    while let Err(e) = agent.start().await {
        tracing::warn!("start failed: {e}");
        if !cfg.enable_auto_reconnect {
            anyhow::bail!("cannot reach center at {} and auto-reconnect is off", cfg.center);
        }
        while agent.is_reconnecting() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }

    // Synthetic flight-state source, stands in for the onboard publisher.
    let feeder = tokio::spawn(synthesize_telemetry(
        publisher.clone(),
        cfg.uav_id.clone(),
        Duration::from_millis(cfg.telemetry_interval_ms),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    feeder.abort();
    agent.stop().await;

    Ok(())
}

// ---------------------------------------------------------------------------
// Synthetic telemetry
// ---------------------------------------------------------------------------

async fn synthesize_telemetry(publisher: TelemetryPublisher, uav_id: String, interval: Duration) {
    // ---
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;
        seq += 1;

        let now_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);

        // A gentle orbit so center-side plots show movement.
        let phase = ((seq % 360) as f64).to_radians();
        publisher.publish(TelemetryMessage {
            uav_id: uav_id.clone(),
            timestamp_ns: now_ns,
            position: Position {
                lat: 31.0 + 0.001 * phase.sin(),
                lon: 121.0 + 0.001 * phase.cos(),
                alt: 50.0,
            },
            battery: Battery {
                percent: 100.0 - (seq as f64 * 0.01).min(80.0),
                voltage_mv: 12_000,
            },
            gps: Gps {
                fix_type: 3,
                num_sat: 14,
            },
            link_quality: 90,
            flight_mode: "GUIDED".into(),
            ..Default::default()
        });
    }
}
