//! [`NodeAgent`] — wires the uplink transport, downlink receiver, ack
//! manager, and reconnect manager into one supervised whole.
//!
//! # Task model
//!
//! ```text
//! telemetry publisher ──broadcast──┐
//! downlink receive task ──mpsc─────┤
//! ack retry callback ──mpsc────────┼──> worker task (select! + 10 Hz tick)
//! flow engine status ──mpsc────────┘         │
//!                                            └──> uplink (mutex-shared with
//!                                                 the reconnect attempt)
//! ```
//!
//! One worker task consumes everything; the downlink task only reads and
//! parses. At most one reconnect attempt loop exists at a time. All tasks
//! stop through `watch` signals and are awaited on shutdown, so
//! [`stop`](NodeAgent::stop) returns only after every component is down.
//!
//! # Retry semantics
//!
//! An unacknowledged downlink message is retried by re-dispatching it to
//! its handler: "retry" means "make sure it happened", not "ask the center
//! to resend". Handlers must therefore tolerate re-execution of the same
//! request id.

use std::sync::Arc;
use std::time::Duration;

// ---

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// ---

use aerolink_domain::{
    //
    AckStatus,
    DownlinkKind,
    DownlinkMessage,
    FlowStatus,
    LinkError,
    Result,
    TelemetryMessage,
    TelemetryPublisher,
    UplinkTransport,
};
use aerolink_tcp::TcpUplink;

// ---

use super::ack::{AckConfig, MessageAckManager};
use super::config::{AckOriginator, AgentConfig};
use super::downlink::{DownlinkClient, DownlinkEvent};
use super::framing::{encode_ack, encode_flow_status};
use super::handlers::{NullCommandHandler, NullFlowHandler, NullMissionHandler};
use super::reconnect::{Reconnect, ReconnectConfig, ReconnectManager};
use super::stats::{ErrorKind, ErrorStatistics};

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

/// Lifecycle of the agent. `Starting`/`Stopping` are transient states
/// observable only while `start()`/`stop()` are in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    // ---
    Stopped,
    Starting,
    Running,
    Stopping,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// The external executors behind the three downlink message kinds.
pub struct Handlers {
    // ---
    pub command: Arc<dyn aerolink_domain::CommandHandler>,
    pub mission: Arc<dyn aerolink_domain::MissionHandler>,
    pub flow: Arc<dyn aerolink_domain::FlowHandler>,
}

// ---

impl Default for Handlers {
    fn default() -> Self {
        Self {
            command: Arc::new(NullCommandHandler),
            mission: Arc::new(NullMissionHandler),
            flow: Arc::new(NullFlowHandler),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeAgent
// ---------------------------------------------------------------------------

/// Worker-side receive ends. Parked here between runs so the agent can be
/// restarted after `stop()` without losing queued traffic.
struct WorkerChannels {
    // ---
    events: mpsc::Receiver<DownlinkEvent>,
    retries: mpsc::Receiver<DownlinkMessage>,
    flow_status: mpsc::Receiver<FlowStatus>,
}

// ---

/// Everything shared between the public handle, the worker task, and the
/// reconnect attempt.
struct AgentInner {
    // ---
    config: AgentConfig,
    uplink: Mutex<Box<dyn UplinkTransport>>,
    downlink: Mutex<DownlinkClient>,
    ack: Arc<MessageAckManager>,
    reconnect: Option<ReconnectManager>,
    handlers: Handlers,
    stats: Arc<ErrorStatistics>,
    channels: Mutex<WorkerChannels>,
}

// ---

pub struct NodeAgent {
    // ---
    inner: Arc<AgentInner>,
    publisher: TelemetryPublisher,
    state_tx: watch::Sender<AgentState>,
    stop_tx: watch::Sender<bool>,
    worker: Option<JoinHandle<()>>,
    flow_status_tx: mpsc::Sender<FlowStatus>,
}

// ---

impl NodeAgent {
    // ---
    /// Agent over the standard TCP duplex transport, with null executors.
    pub fn new(config: AgentConfig, publisher: TelemetryPublisher) -> Self {
        let uplink = Box::new(TcpUplink::new(config.center));
        Self::with_parts(config, publisher, uplink, Handlers::default())
    }

    // ---

    /// Fully injected construction: any transport, any executors.
    pub fn with_parts(
        config: AgentConfig,
        publisher: TelemetryPublisher,
        uplink: Box<dyn UplinkTransport>,
        handlers: Handlers,
    ) -> Self {
        // ---
        let (event_tx, event_rx) = mpsc::channel(64);
        let (retry_tx, retry_rx) = mpsc::channel(64);
        let (flow_status_tx, flow_status_rx) = mpsc::channel(16);

        let stats = Arc::new(ErrorStatistics::new());

        let ack = Arc::new(
            MessageAckManager::new(AckConfig {
                max_retries: config.ack_max_retries,
                timeout: Duration::from_millis(config.ack_timeout_ms),
            })
            .with_stats(stats.clone()),
        );
        // Retry = re-dispatch: due messages flow back to the worker, which
        // re-runs the original handler.
        ack.set_retry_callback(move |msg| {
            if retry_tx.try_send(msg).is_err() {
                tracing::warn!("retry channel full, dropping retry");
            }
        });

        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<AgentInner>| {
            // ---
            let reconnect = if config.enable_auto_reconnect {
                let relink = Relink {
                    inner: weak.clone(),
                    uav_id: config.uav_id.clone(),
                };
                Some(
                    ReconnectManager::new(
                        ReconnectConfig {
                            enabled: true,
                            max_retries: config.max_reconnect_retries,
                            initial_delay: Duration::from_millis(config.reconnect_initial_delay_ms),
                            ..ReconnectConfig::default()
                        },
                        Arc::new(relink),
                    )
                    .with_stats(stats.clone()),
                )
            } else {
                None
            };

            AgentInner {
                config,
                uplink: Mutex::new(uplink),
                downlink: Mutex::new(DownlinkClient::new(event_tx).with_stats(stats.clone())),
                ack,
                reconnect,
                handlers,
                stats,
                channels: Mutex::new(WorkerChannels {
                    events: event_rx,
                    retries: retry_rx,
                    flow_status: flow_status_rx,
                }),
            }
        });

        let (state_tx, _) = watch::channel(AgentState::Stopped);
        let (stop_tx, _) = watch::channel(false);

        Self {
            inner,
            publisher,
            state_tx,
            stop_tx,
            worker: None,
            flow_status_tx,
        }
    }

    // ---

    /// Connect both directions and spawn the worker.
    ///
    /// On a dial failure the reconnect manager is triggered (when enabled)
    /// and the agent stays `Stopped`. While that back-off loop is running a
    /// second `start()` is refused, so exactly one party dials at a time.
    pub async fn start(&mut self) -> Result<()> {
        // ---
        if self.state() != AgentState::Stopped || self.is_reconnecting() {
            tracing::warn!("start() while already running or reconnecting");
            return Err(LinkError::AlreadyRunning);
        }
        self.state_tx.send_replace(AgentState::Starting);

        // Uplink dial.
        let source = {
            let mut uplink = self.inner.uplink.lock().await;
            match uplink.connect().await {
                Ok(source) => source,
                Err(e) => {
                    tracing::error!(center = %self.inner.config.center, "failed to connect: {e}");
                    self.inner.stats.record(ErrorKind::Connect, &e.to_string());
                    self.inner.trigger_reconnect("initial connect failed").await;
                    self.state_tx.send_replace(AgentState::Stopped);
                    return Err(e);
                }
            }
        };

        // Downlink rides the same connection.
        let source = match source {
            Some(source) => source,
            None => {
                self.inner.uplink.lock().await.disconnect().await;
                self.state_tx.send_replace(AgentState::Stopped);
                return Err(LinkError::Connection(
                    "transport provided no shared downlink handle".into(),
                ));
            }
        };

        {
            let mut downlink = self.inner.downlink.lock().await;
            // A background relink may have left a receive task on a previous
            // connection; reap it before rewiring.
            downlink.stop_receiving().await;
            downlink.disconnect();
            if let Err(e) = downlink.connect(source) {
                self.inner.uplink.lock().await.disconnect().await;
                self.state_tx.send_replace(AgentState::Stopped);
                return Err(e);
            }
            if let Err(e) = downlink.start_receiving(&self.inner.config.uav_id) {
                downlink.disconnect();
                self.inner.uplink.lock().await.disconnect().await;
                self.state_tx.send_replace(AgentState::Stopped);
                return Err(e);
            }
        }

        // Worker. Subscribe here, not inside the task, so samples published
        // the instant start() returns are already buffered for it.
        let (stop_tx, stop_rx) = watch::channel(false);
        self.stop_tx = stop_tx;
        let telemetry_rx = self.publisher.subscribe();
        tracing::info!("worker subscribed to telemetry publisher");
        let inner = self.inner.clone();
        self.worker = Some(tokio::spawn(worker_loop(inner, telemetry_rx, stop_rx)));

        self.state_tx.send_replace(AgentState::Running);
        tracing::info!(
            uav_id = %self.inner.config.uav_id,
            center = %self.inner.config.center,
            "agent started"
        );
        Ok(())
    }

    // ---

    /// Tear everything down in order: worker, reconnect loop, downlink,
    /// uplink. No-op when already stopped; safe to call repeatedly.
    pub async fn stop(&mut self) {
        // ---
        if self.state() == AgentState::Stopped {
            return;
        }
        self.state_tx.send_replace(AgentState::Stopping);

        let _ = self.stop_tx.send(true);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }

        if let Some(reconnect) = &self.inner.reconnect {
            reconnect.stop().await;
        }

        {
            let mut downlink = self.inner.downlink.lock().await;
            downlink.stop_receiving().await;
            downlink.disconnect();
        }
        self.inner.uplink.lock().await.disconnect().await;

        self.state_tx.send_replace(AgentState::Stopped);
        tracing::info!("agent stopped");
    }

    // ---

    pub fn state(&self) -> AgentState {
        *self.state_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == AgentState::Running
    }

    /// Observe lifecycle transitions.
    pub fn state_changes(&self) -> watch::Receiver<AgentState> {
        self.state_tx.subscribe()
    }

    // ---

    /// Channel for the embedder's flow engine to report lifecycle events;
    /// the agent serializes each one uplink as a `flow_status` line.
    pub fn flow_status_tx(&self) -> mpsc::Sender<FlowStatus> {
        self.flow_status_tx.clone()
    }

    // ---

    /// Acknowledgment status of a downlink message (see
    /// [`MessageAckManager::status`] for the absent-id semantics).
    pub fn message_status(&self, request_id: &str) -> AckStatus {
        self.inner.ack.status(request_id)
    }

    // ---

    /// Whether a reconnect attempt loop is currently running.
    pub fn is_reconnecting(&self) -> bool {
        self.inner
            .reconnect
            .as_ref()
            .map(|r| r.is_reconnecting())
            .unwrap_or(false)
    }

    // ---

    /// Failure counters recorded so far.
    pub fn error_stats(&self) -> Arc<ErrorStatistics> {
        self.inner.stats.clone()
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn worker_loop(
    inner: Arc<AgentInner>,
    mut telemetry_rx: broadcast::Receiver<TelemetryMessage>,
    mut stop_rx: watch::Receiver<bool>,
) {
    // ---
    let mut channels = inner.channels.lock().await;
    let WorkerChannels {
        events,
        retries,
        flow_status,
    } = &mut *channels;

    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }

            sample = telemetry_rx.recv() => {
                match sample {
                    Ok(msg) => inner.forward_telemetry(&msg).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "telemetry subscriber lagged, samples dropped");
                    }
                    // The agent handle holds a publisher clone, so this is
                    // reachable only while the handle is being dropped, at
                    // which point the stop arm fires too.
                    Err(broadcast::error::RecvError::Closed) => {}
                }
            }

            event = events.recv() => {
                match event {
                    Some(DownlinkEvent::Message(msg)) => inner.on_downlink_message(msg).await,
                    Some(DownlinkEvent::Ack(id)) => {
                        inner.ack.acknowledge(&id);
                    }
                    None => {}
                }
            }

            retry = retries.recv() => {
                if let Some(msg) = retry {
                    tracing::info!(
                        request_id = %msg.request_id,
                        "re-dispatching unacknowledged message"
                    );
                    inner.dispatch(&msg).await;
                }
            }

            status = flow_status.recv() => {
                if let Some(status) = status {
                    inner.report_flow_status(&status).await;
                }
            }

            _ = ticker.tick() => {
                inner.handlers.mission.update().await;
                inner.handlers.flow.update().await;
                inner.ack.update();
            }
        }
    }

    // Dropping the receiver unsubscribes from the publisher.
    drop(telemetry_rx);
    tracing::info!("worker unsubscribed from telemetry publisher, exiting");
}

// ---------------------------------------------------------------------------
// AgentInner
// ---------------------------------------------------------------------------

impl AgentInner {
    // ---
    /// Push one telemetry sample uplink. Failures do not propagate: the
    /// sample is dropped (no buffering while disconnected) and reconnection
    /// is kicked off if it is not already underway.
    async fn forward_telemetry(&self, msg: &TelemetryMessage) {
        // ---
        let mut uplink = self.uplink.lock().await;
        if !uplink.is_connected() {
            drop(uplink);
            self.trigger_reconnect("uplink disconnected").await;
            return;
        }

        if let Err(e) = uplink.send_telemetry(msg).await {
            self.stats.record(ErrorKind::Send, &e.to_string());
            drop(uplink);
            self.trigger_reconnect("telemetry send failed").await;
        }
    }

    // ---

    async fn trigger_reconnect(&self, why: &str) {
        // ---
        if let Some(reconnect) = &self.reconnect {
            if !reconnect.is_reconnecting() {
                tracing::warn!("{why}, triggering reconnect");
                reconnect.trigger().await;
            }
        }
    }

    // ---

    /// Every inbound message is registered for acknowledgment tracking,
    /// acked back when this side originates acks, then dispatched by kind.
    async fn on_downlink_message(&self, msg: DownlinkMessage) {
        // ---
        let msg_id = self.ack.register_pending(&msg);

        if self.config.ack_originator == AckOriginator::Agent {
            let mut uplink = self.uplink.lock().await;
            match uplink.send_raw(&encode_ack(&msg_id)).await {
                Ok(()) => {
                    drop(uplink);
                    // Receipt has been signaled; local tracking is complete.
                    // (With the center originating acks, this happens when
                    // its ACK frame arrives instead.)
                    self.ack.acknowledge(&msg_id);
                }
                Err(e) => {
                    self.stats.record(ErrorKind::Send, &e.to_string());
                    drop(uplink);
                    self.trigger_reconnect("ack send failed").await;
                }
            }
        }

        self.dispatch(&msg).await;
    }

    // ---

    /// Type switch to the external executors. Fire-and-forget: a handler's
    /// verdict is logged and goes nowhere else.
    async fn dispatch(&self, msg: &DownlinkMessage) {
        // ---
        let handled = match msg.kind {
            DownlinkKind::Command => self.handlers.command.handle_command(msg).await,
            DownlinkKind::Mission => self.handlers.mission.handle_mission(msg).await,
            DownlinkKind::Flow => self.handlers.flow.handle_flow(msg).await,
        };

        if !handled {
            tracing::warn!(
                kind = msg.kind.as_str(),
                request_id = %msg.request_id,
                "handler rejected message"
            );
        }
    }

    // ---

    async fn report_flow_status(&self, status: &FlowStatus) {
        // ---
        let mut uplink = self.uplink.lock().await;
        if !uplink.is_connected() {
            tracing::warn!(
                flow_id = %status.flow_id,
                "cannot report flow status: uplink disconnected"
            );
            return;
        }

        let line = encode_flow_status(&self.config.uav_id, status);
        match uplink.send_raw(&line).await {
            Ok(()) => {
                tracing::info!(flow_id = %status.flow_id, status = %status.status, "flow status reported");
            }
            Err(e) => {
                self.stats.record(ErrorKind::Send, &e.to_string());
                drop(uplink);
                self.trigger_reconnect("flow status send failed").await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Relink
// ---------------------------------------------------------------------------

/// The reconnect attempt: re-dial uplink, hand the fresh read half to the
/// downlink client, restart receiving. Any failed sub-step tears down what
/// was opened and reports failure so the back-off loop continues.
struct Relink {
    // ---
    /// Weak: the reconnect manager lives inside `AgentInner`, and a strong
    /// reference here would keep the whole agent alive in a cycle.
    inner: std::sync::Weak<AgentInner>,

    uav_id: String,
}

// ---

#[async_trait]
impl Reconnect for Relink {
    // ---
    async fn attempt(&self) -> bool {
        // ---
        let inner = match self.inner.upgrade() {
            Some(inner) => inner,
            None => {
                // Agent is gone; report success so the back-off loop winds
                // down instead of retrying into the void.
                tracing::debug!("agent dropped, ending reconnect loop");
                return true;
            }
        };

        let mut uplink = inner.uplink.lock().await;
        let source = match uplink.connect().await {
            Ok(Some(source)) => source,
            Ok(None) => {
                tracing::error!("transport provided no shared downlink handle");
                uplink.disconnect().await;
                return false;
            }
            Err(e) => {
                tracing::warn!("reconnect dial failed: {e}");
                inner.stats.record(ErrorKind::Connect, &e.to_string());
                return false;
            }
        };

        let mut downlink = inner.downlink.lock().await;
        // Reap the receive task still attached to the dead connection.
        downlink.stop_receiving().await;
        downlink.disconnect();

        if let Err(e) = downlink.connect(source) {
            tracing::warn!("downlink rewire failed: {e}");
            uplink.disconnect().await;
            return false;
        }
        if let Err(e) = downlink.start_receiving(&self.uav_id) {
            tracing::warn!("downlink restart failed: {e}");
            downlink.disconnect();
            uplink.disconnect().await;
            return false;
        }

        tracing::info!("reconnection successful");
        true
    }
}
