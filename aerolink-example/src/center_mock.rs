//! Minimal Cluster Center stand-in for manual end-to-end runs.
//!
//! Accepts one agent at a time, prints every uplink line it receives, and
//! every few seconds sends a `CMD:` frame with a fresh request id followed
//! immediately by its own `ACK:` (the center-originated ack convention).
//! Point an `aerolink-agent` at it:
//!
//! ```text
//! center-mock --bind 127.0.0.1:8888
//! aerolink-agent --center 127.0.0.1:8888
//! ```
//!
//! Dropping and restarting the mock mid-run is the quickest way to watch
//! the agent's back-off and reconnect behavior.

use std::net::SocketAddr;
use std::time::Duration;

// ---

use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "center-mock", about = "Mock Cluster Center for AeroLink demos")]
struct Config {
    // ---
    /// TCP address to listen on for agent connections.
    #[arg(long, default_value = "127.0.0.1:8888")]
    bind: SocketAddr,

    /// Seconds between command frames sent to the agent. 0 disables them.
    #[arg(long, default_value_t = 5)]
    command_interval_secs: u64,
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---

    let cfg = Config::parse();

    tracing_subscriber::fmt().with_target(false).init();

    let listener = tokio::net::TcpListener::bind(cfg.bind).await?;
    info!(bind = %cfg.bind, "center-mock listening");

    let mut session: u64 = 0;
    loop {
        let (conn, peer) = listener.accept().await?;
        session += 1;
        info!(%peer, session, "agent connected");
        serve_agent(conn, cfg.command_interval_secs, session).await;
        info!(session, "agent disconnected");
    }
}

// ---------------------------------------------------------------------------
// serve_agent
// ---------------------------------------------------------------------------

/// Drive one agent connection until it drops: print everything uplink,
/// run the command ticker as a sibling task on the write half.
async fn serve_agent(conn: TcpStream, command_interval_secs: u64, session: u64) {
    // ---
    let (read_half, write_half) = conn.into_split();

    let commander = (command_interval_secs > 0)
        .then(|| tokio::spawn(send_commands(write_half, command_interval_secs, session)));

    let mut lines = BufReader::new(read_half).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => print_uplink(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("read failed: {e}");
                break;
            }
        }
    }

    if let Some(commander) = commander {
        commander.abort();
    }
}

// ---

/// Periodically send a `CMD:` frame followed by its own `ACK:` (the
/// convention this center tooling uses). Exits on the first write error.
async fn send_commands(
    mut write_half: tokio::net::tcp::OwnedWriteHalf,
    interval_secs: u64,
    session: u64,
) {
    // ---
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // consume the immediate first tick
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;
        seq += 1;
        let request_id = format!("req-{session}-{seq}");
        let frame = format!(
            "CMD:{{\"type\":\"SET_SPEED\",\"speed\":{},\"requestId\":\"{request_id}\"}}\nACK:{request_id}\n",
            5 + (seq % 10)
        );
        if write_half.write_all(frame.as_bytes()).await.is_err() {
            warn!("write failed, commander exiting");
            return;
        }
        info!(request_id, "sent command + self-ack");
    }
}

// ---

fn print_uplink(line: &str) {
    // ---
    match serde_json::from_str::<serde_json::Value>(line) {
        Ok(value) if value["type"] == "flow_status" => {
            info!(
                flow_id = %value["flow_id"],
                status = %value["status"],
                "flow status from agent"
            );
        }
        Ok(value) if value.get("uav_id").is_some() => {
            info!(
                uav_id = %value["uav_id"],
                battery = %value["battery"]["percent"],
                link_quality = %value["link_quality"],
                "telemetry"
            );
        }
        _ => info!("uplink: {line}"),
    }
}
