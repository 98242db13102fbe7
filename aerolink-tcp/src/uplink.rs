//! [`TcpUplink`] — dials the Cluster Center and owns the send side of the
//! shared connection.
//!
//! # Ownership of the socket
//!
//! `connect()` splits the stream: the write half stays here, the read half
//! is returned to the caller for the downlink receive loop. Each half closes
//! its own direction when dropped, so the descriptor is released exactly
//! once per side regardless of which component observes a failure first.
//! There is no path on which the downlink side can close the send
//! direction.

use std::net::SocketAddr;

// ---

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;

// ---

use aerolink_domain::{
    //
    FrameSource,
    LinkError,
    Result,
    TelemetryMessage,
    UplinkTransport,
};

// ---------------------------------------------------------------------------
// TcpUplink
// ---------------------------------------------------------------------------

pub struct TcpUplink {
    // ---
    center: SocketAddr,

    /// Write half of the live connection. `None` while disconnected.
    writer: Option<OwnedWriteHalf>,
}

// ---

impl TcpUplink {
    // ---
    pub fn new(center: SocketAddr) -> Self {
        Self {
            center,
            writer: None,
        }
    }

    // ---

    /// Write one frame (`line` + `\n`). On any write error the connection
    /// is dropped before the error is returned, so `is_connected()` turns
    /// false and the caller can trigger reconnection.
    async fn send_line(&mut self, line: &str) -> Result<()> {
        // ---
        let writer = match self.writer.as_mut() {
            Some(w) => w,
            None => return Err(LinkError::Send("uplink not connected".into())),
        };

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        if let Err(e) = writer.write_all(frame.as_bytes()).await {
            tracing::error!(center = %self.center, "uplink write failed: {e}");
            self.writer = None;
            return Err(LinkError::Send(e.to_string()));
        }
        Ok(())
    }
}

// ---

#[async_trait]
impl UplinkTransport for TcpUplink {
    // ---
    async fn connect(&mut self) -> Result<Option<FrameSource>> {
        // ---
        // Reconnect path: release the previous write half first.
        if self.writer.is_some() {
            tracing::debug!("uplink reconnecting, dropping previous connection");
            self.writer = None;
        }

        let stream = TcpStream::connect(self.center)
            .await
            .map_err(|e| LinkError::Connection(format!("dial {}: {e}", self.center)))?;

        // Telemetry frames are small and latency-sensitive; flush each
        // write without Nagle delay.
        stream
            .set_nodelay(true)
            .map_err(|e| LinkError::Connection(format!("set_nodelay: {e}")))?;

        let (read_half, write_half) = stream.into_split();
        self.writer = Some(write_half);

        tracing::info!(center = %self.center, "uplink connected");
        Ok(Some(Box::new(read_half) as FrameSource))
    }

    // ---

    async fn send_telemetry(&mut self, msg: &TelemetryMessage) -> Result<()> {
        // ---
        let json = serde_json::to_string(msg)
            .map_err(|e| LinkError::Send(format!("telemetry serialize: {e}")))?;
        self.send_line(&json).await
    }

    // ---

    async fn send_raw(&mut self, line: &str) -> Result<()> {
        self.send_line(line).await
    }

    // ---

    fn is_connected(&self) -> bool {
        self.writer.is_some()
    }

    // ---

    async fn disconnect(&mut self) {
        // ---
        if self.writer.take().is_some() {
            tracing::info!(center = %self.center, "uplink disconnected");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;

    // ---

    async fn local_center() -> (TcpListener, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    // ---

    #[tokio::test]
    async fn connect_returns_shared_read_half() {
        // ---
        let (listener, addr) = local_center().await;
        let mut uplink = TcpUplink::new(addr);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let source = uplink.connect().await.unwrap();
        assert!(source.is_some());
        assert!(uplink.is_connected());

        // Center → agent bytes arrive on the returned half.
        let mut center_side = accept.await.unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut center_side, b"hello\n")
            .await
            .unwrap();

        let mut reader = BufReader::new(source.unwrap());
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "hello\n");
    }

    // ---

    #[tokio::test]
    async fn telemetry_arrives_as_one_json_line() {
        // ---
        let (listener, addr) = local_center().await;
        let mut uplink = TcpUplink::new(addr);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        uplink.connect().await.unwrap();
        let center_side = accept.await.unwrap();

        let msg = TelemetryMessage {
            uav_id: "uav3".into(),
            ..Default::default()
        };
        uplink.send_telemetry(&msg).await.unwrap();
        uplink.send_raw("ACK:r9").await.unwrap();

        let mut reader = BufReader::new(center_side);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["uav_id"], "uav3");

        line.clear();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line, "ACK:r9\n");
    }

    // ---

    #[tokio::test]
    async fn send_while_disconnected_fails() {
        // ---
        let mut uplink = TcpUplink::new("127.0.0.1:1".parse().unwrap());
        let err = uplink.send_raw("x").await.unwrap_err();
        assert!(matches!(err, LinkError::Send(_)));
    }

    // ---

    #[tokio::test]
    async fn send_failure_disconnects() {
        // ---
        let (listener, addr) = local_center().await;
        let mut uplink = TcpUplink::new(addr);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        uplink.connect().await.unwrap();

        // Center closes the connection hard.
        let center_side = accept.await.unwrap();
        drop(center_side);

        // The first write after a peer close may be buffered by the kernel;
        // keep writing until the failure surfaces.
        let mut failed = false;
        for _ in 0..50 {
            if uplink.send_raw("probe").await.is_err() {
                failed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(failed);
        assert!(!uplink.is_connected());
    }

    // ---

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        // ---
        let (listener, addr) = local_center().await;
        let mut uplink = TcpUplink::new(addr);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        uplink.connect().await.unwrap();
        let _center_side = accept.await.unwrap();

        uplink.disconnect().await;
        uplink.disconnect().await;
        assert!(!uplink.is_connected());
    }

    // ---

    #[tokio::test]
    async fn dropping_read_half_leaves_uplink_writable() {
        // ---
        let (listener, addr) = local_center().await;
        let mut uplink = TcpUplink::new(addr);

        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let source = uplink.connect().await.unwrap();
        drop(source); // downlink side releases its half

        let mut center_side = accept.await.unwrap();
        uplink.send_raw("still-alive").await.unwrap();

        let mut buf = vec![0u8; 32];
        let n = center_side.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"still-alive\n");
    }
}
