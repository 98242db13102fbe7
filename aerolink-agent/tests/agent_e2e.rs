//! End-to-end tests: a real [`NodeAgent`] over real TCP against an
//! in-process Cluster Center stand-in.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

// ---

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

// ---

use aerolink_agent::{AckOriginator, AgentConfig, AgentState, Handlers, NodeAgent};
use aerolink_domain::{
    //
    AckStatus,
    CommandHandler,
    DownlinkMessage,
    FlowHandler,
    FlowStatus,
    MissionHandler,
    TelemetryMessage,
    TelemetryPublisher,
};
use aerolink_tcp::TcpUplink;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);

// ---

async fn bind_center() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

// ---

/// Short timeouts everywhere so failure paths run inside test budgets.
fn fast_config(center: SocketAddr) -> AgentConfig {
    AgentConfig {
        uav_id: "uav-test".into(),
        center,
        telemetry_interval_ms: 50,
        enable_auto_reconnect: true,
        max_reconnect_retries: 50,
        reconnect_initial_delay_ms: 50,
        ack_max_retries: 3,
        ack_timeout_ms: 200,
        ack_originator: AckOriginator::Center,
        log_level: "info".into(),
    }
}

// ---

fn sample() -> TelemetryMessage {
    TelemetryMessage {
        uav_id: "uav-test".into(),
        link_quality: 77,
        ..Default::default()
    }
}

// ---

async fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    line
}

// ---

/// Handler that forwards every message to the test body.
struct Recorder {
    tx: mpsc::Sender<DownlinkMessage>,
}

#[async_trait]
impl CommandHandler for Recorder {
    async fn handle_command(&self, msg: &DownlinkMessage) -> bool {
        self.tx.send(msg.clone()).await.is_ok()
    }
}

#[async_trait]
impl MissionHandler for Recorder {
    async fn handle_mission(&self, msg: &DownlinkMessage) -> bool {
        self.tx.send(msg.clone()).await.is_ok()
    }
    async fn update(&self) {}
}

#[async_trait]
impl FlowHandler for Recorder {
    async fn handle_flow(&self, msg: &DownlinkMessage) -> bool {
        self.tx.send(msg.clone()).await.is_ok()
    }
    async fn update(&self) {}
}

// ---

/// Agent wired with recording handlers for all three kinds.
fn recording_agent(
    config: AgentConfig,
    publisher: TelemetryPublisher,
) -> (NodeAgent, mpsc::Receiver<DownlinkMessage>) {
    let (tx, rx) = mpsc::channel(64);
    let handlers = Handlers {
        command: Arc::new(Recorder { tx: tx.clone() }),
        mission: Arc::new(Recorder { tx: tx.clone() }),
        flow: Arc::new(Recorder { tx }),
    };
    let uplink = Box::new(TcpUplink::new(config.center));
    let agent = NodeAgent::with_parts(config, publisher, uplink, handlers);
    (agent, rx)
}

// ---------------------------------------------------------------------------
// Telemetry uplink
// ---------------------------------------------------------------------------

#[tokio::test]
async fn telemetry_arrives_as_json_lines() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let mut agent = NodeAgent::new(fast_config(addr), publisher.clone());

    agent.start().await.unwrap();
    assert_eq!(agent.state(), AgentState::Running);

    let (conn, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(conn);

    publisher.publish(sample());

    let line = read_line(&mut reader).await;
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["uav_id"], "uav-test");
    assert_eq!(value["link_quality"], 77);

    agent.stop().await;
    assert_eq!(agent.state(), AgentState::Stopped);
}

// ---------------------------------------------------------------------------
// Downlink dispatch + acknowledgment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn command_dispatches_and_prompt_ack_suppresses_retry() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let (mut agent, mut handled) = recording_agent(fast_config(addr), publisher);

    agent.start().await.unwrap();
    let (mut conn, _) = listener.accept().await.unwrap();

    conn.write_all(b"CMD:{\"type\":\"ARM\",\"requestId\":\"r1\"}\n")
        .await
        .unwrap();

    let msg = timeout(WAIT, handled.recv()).await.unwrap().unwrap();
    assert_eq!(msg.request_id, "r1");
    assert_eq!(msg.payload, r#"{"type":"ARM","requestId":"r1"}"#);

    // Ack well inside the 200 ms timeout: the handler must never see r1 again.
    conn.write_all(b"ACK:r1\n").await.unwrap();

    let retry = timeout(Duration::from_millis(1200), handled.recv()).await;
    assert!(retry.is_err(), "acknowledged message was re-dispatched");
    assert_eq!(agent.message_status("r1"), AckStatus::Pending); // swept away

    agent.stop().await;
}

// ---

#[tokio::test]
async fn unacknowledged_command_is_redispatched_then_dropped() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let (mut agent, mut handled) = recording_agent(fast_config(addr), publisher);

    agent.start().await.unwrap();
    let (mut conn, _) = listener.accept().await.unwrap();

    conn.write_all(b"CMD:{\"type\":\"LAND\",\"requestId\":\"r-noack\"}\n")
        .await
        .unwrap();

    // Initial dispatch plus up to 3 retries at ~200 ms apart, then silence.
    let mut deliveries = 0;
    while let Ok(Some(msg)) = timeout(Duration::from_millis(1500), handled.recv()).await {
        assert_eq!(msg.request_id, "r-noack");
        deliveries += 1;
    }
    assert!(
        (2..=4).contains(&deliveries),
        "expected retries then terminal drop, saw {deliveries} deliveries"
    );

    // Entry is gone: absent ids read back as Pending.
    assert_eq!(agent.message_status("r-noack"), AckStatus::Pending);

    agent.stop().await;
}

// ---

#[tokio::test]
async fn mission_and_flow_frames_reach_their_handlers() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let (mut agent, mut handled) = recording_agent(fast_config(addr), publisher);

    agent.start().await.unwrap();
    let (mut conn, _) = listener.accept().await.unwrap();

    conn.write_all(
        b"MISSION:{\"id\":\"m1\",\"requestId\":\"rm\"}\nFLOW:{\"flow_id\":\"f1\",\"requestId\":\"rf\"}\n",
    )
    .await
    .unwrap();

    let first = timeout(WAIT, handled.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, handled.recv()).await.unwrap().unwrap();
    assert_eq!(first.kind.as_str(), "Mission");
    assert_eq!(first.request_id, "rm");
    assert_eq!(second.kind.as_str(), "Flow");
    assert_eq!(second.request_id, "rf");

    // Acks so teardown happens with an empty pending set.
    conn.write_all(b"ACK:rm\nACK:rf\n").await.unwrap();
    agent.stop().await;
}

// ---

#[tokio::test]
async fn agent_originated_ack_reaches_center() {
    // ---
    let (listener, addr) = bind_center().await;
    let mut config = fast_config(addr);
    config.ack_originator = AckOriginator::Agent;

    let publisher = TelemetryPublisher::new(64);
    let (mut agent, mut handled) = recording_agent(config, publisher);

    agent.start().await.unwrap();
    let (conn, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = conn.into_split();

    write_half
        .write_all(b"CMD:{\"type\":\"ARM\",\"requestId\":\"r7\"}\n")
        .await
        .unwrap();
    timeout(WAIT, handled.recv()).await.unwrap().unwrap();

    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    timeout(WAIT, reader.read_line(&mut line)).await.unwrap().unwrap();
    assert_eq!(line, "ACK:r7\n");

    // The emitted ack completes local tracking: no retry re-dispatch.
    let retry = timeout(Duration::from_millis(700), handled.recv()).await;
    assert!(retry.is_err(), "self-acked message was re-dispatched");

    agent.stop().await;
}

// ---------------------------------------------------------------------------
// Flow status reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flow_status_is_reported_uplink() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let mut agent = NodeAgent::new(fast_config(addr), publisher);

    agent.start().await.unwrap();
    let (conn, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(conn);

    agent
        .flow_status_tx()
        .send(FlowStatus {
            flow_id: "flow_001".into(),
            status: "completed".into(),
            error: None,
        })
        .await
        .unwrap();

    let line = read_line(&mut reader).await;
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["type"], "flow_status");
    assert_eq!(value["uav_id"], "uav-test");
    assert_eq!(value["flow_id"], "flow_001");
    assert_eq!(value["status"], "completed");

    agent.stop().await;
}

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_is_prompt_idempotent_and_closes_the_socket_once() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let mut agent = NodeAgent::new(fast_config(addr), publisher);

    agent.start().await.unwrap();
    let (conn, _) = listener.accept().await.unwrap();
    let mut reader = BufReader::new(conn);

    timeout(WAIT, agent.stop()).await.expect("stop() hung");
    assert_eq!(agent.state(), AgentState::Stopped);

    // Center observes exactly one clean EOF.
    let mut line = String::new();
    let n = timeout(WAIT, reader.read_line(&mut line)).await.unwrap().unwrap();
    assert_eq!(n, 0);

    // Second stop: no block, no error.
    timeout(Duration::from_millis(100), agent.stop())
        .await
        .expect("second stop() must be a no-op");
}

// ---------------------------------------------------------------------------
// Reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn center_drop_triggers_reconnect_and_telemetry_resumes() {
    // ---
    let (listener, addr) = bind_center().await;
    let publisher = TelemetryPublisher::new(64);
    let mut agent = NodeAgent::new(fast_config(addr), publisher.clone());

    agent.start().await.unwrap();
    let (conn1, _) = listener.accept().await.unwrap();

    // Continuous publisher: drives both the failure detection after the
    // drop and the traffic on the restored link.
    let feeder_pub = publisher.clone();
    let feeder = tokio::spawn(async move {
        loop {
            feeder_pub.publish(sample());
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    });

    let mut reader = BufReader::new(conn1);
    let _ = read_line(&mut reader).await; // link works
    drop(reader); // center drops the agent mid-stream

    // The agent notices on a failed send, backs off, and dials again.
    let (conn2, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("agent never reconnected")
        .unwrap();

    let mut reader2 = BufReader::new(conn2);
    let line = read_line(&mut reader2).await;
    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["uav_id"], "uav-test");

    feeder.abort();
    agent.stop().await;
}

// ---

#[tokio::test]
async fn failed_start_triggers_backoff_and_reports_error() {
    // ---
    // Bind then drop: the port exists but nothing listens on it.
    let (listener, addr) = bind_center().await;
    drop(listener);

    let publisher = TelemetryPublisher::new(64);
    let mut agent = NodeAgent::new(fast_config(addr), publisher);

    let err = agent.start().await.unwrap_err();
    assert!(matches!(err, aerolink_domain::LinkError::Connection(_)));
    assert_eq!(agent.state(), AgentState::Stopped);
    assert!(agent.is_reconnecting());
    assert!(agent.error_stats().count(aerolink_agent::ErrorKind::Connect) >= 1);
}
