//! Wire framing for the Cluster Center link.
//!
//! Every frame is one newline-terminated UTF-8 line on the shared TCP
//! connection. Downlink frames are prefix-tagged:
//!
//! ```text
//! CMD:<json>\n        immediate flight command
//! MISSION:<json>\n    mission definition
//! FLOW:<json>\n       dataflow definition
//! ACK:<requestId>\n   acknowledgment, bare id, no payload
//! ```
//!
//! Uplink frames are either a telemetry JSON line (serialized by the
//! transport) or an already-built line from the encoders below.
//!
//! The `<json>` body should carry string `uavId` and `requestId` fields.
//! Both are tolerated absent: `uavId` falls back to [`DEFAULT_UAV_ID`] and
//! `requestId` is synthesized from the wall clock. Malformed JSON never
//! aborts anything: the frame is still classified and dispatched with
//! those defaults, payload preserved verbatim.

use std::time::{SystemTime, UNIX_EPOCH};

// ---

use aerolink_domain::{DownlinkKind, DownlinkMessage, FlowStatus, LinkError, DEFAULT_UAV_ID};

// ---------------------------------------------------------------------------
// Prefixes
// ---------------------------------------------------------------------------

pub const CMD_PREFIX: &str = "CMD:";
pub const MISSION_PREFIX: &str = "MISSION:";
pub const FLOW_PREFIX: &str = "FLOW:";
pub const ACK_PREFIX: &str = "ACK:";

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One classified downlink frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    // ---
    Message(DownlinkMessage),

    /// Acknowledgment for the carried request id.
    Ack(String),
}

// ---------------------------------------------------------------------------
// parse_frame
// ---------------------------------------------------------------------------

/// Classify one complete line (without its terminating `\n`).
///
/// Returns `None` for anything that is not a recognized downlink frame.
/// That is not an error: the shared connection also carries traffic for
/// other logical streams, which this side simply ignores.
pub fn parse_frame(line: &str) -> Option<Frame> {
    // ---
    if line.is_empty() {
        return None;
    }

    if let Some(id) = line.strip_prefix(ACK_PREFIX) {
        let id = id.trim_end_matches(['\r', '\n']);
        return Some(Frame::Ack(id.to_string()));
    }

    let (kind, payload) = if let Some(rest) = line.strip_prefix(CMD_PREFIX) {
        (DownlinkKind::Command, rest)
    } else if let Some(rest) = line.strip_prefix(MISSION_PREFIX) {
        (DownlinkKind::Mission, rest)
    } else if let Some(rest) = line.strip_prefix(FLOW_PREFIX) {
        (DownlinkKind::Flow, rest)
    } else {
        return None;
    };

    Some(Frame::Message(parse_message(kind, payload)))
}

// ---

/// Extract `uavId`/`requestId` from the payload, applying defaults.
///
/// A parse failure is recovered locally: the message still goes out with
/// the default uav id and a synthesized request id, payload untouched.
fn parse_message(kind: DownlinkKind, payload: &str) -> DownlinkMessage {
    // ---
    let (uav_id, request_id) = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(body) => {
            let uav_id = body["uavId"]
                .as_str()
                .unwrap_or(DEFAULT_UAV_ID)
                .to_string();
            let request_id = match body["requestId"].as_str() {
                Some(id) => id.to_string(),
                None => synthesize_request_id(),
            };
            (uav_id, request_id)
        }
        Err(e) => {
            let err = LinkError::Parse(e.to_string());
            tracing::warn!(kind = kind.as_str(), "{err}; dispatching with defaults");
            (DEFAULT_UAV_ID.to_string(), synthesize_request_id())
        }
    };

    DownlinkMessage {
        kind,
        uav_id,
        payload: payload.to_string(),
        request_id,
    }
}

// ---

/// Wall-clock-derived fallback id. Cannot be correlated by the sender (it
/// never saw it), but keeps local ack bookkeeping consistent.
fn synthesize_request_id() -> String {
    // ---
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("req_{millis}")
}

// ---------------------------------------------------------------------------
// Encoders
// ---------------------------------------------------------------------------

/// Build an `ACK:` frame for `request_id` (newline appended by the sender).
pub fn encode_ack(request_id: &str) -> String {
    format!("{ACK_PREFIX}{request_id}")
}

// ---

/// Build a `flow_status` report line.
///
/// ```text
/// {"type":"flow_status","uav_id":…,"flow_id":…,"status":…[,"error":…],"timestamp":…}
/// ```
pub fn encode_flow_status(uav_id: &str, status: &FlowStatus) -> String {
    // ---
    let mut body = serde_json::json!({
        "type": "flow_status",
        "uav_id": uav_id,
        "flow_id": status.flow_id,
        "status": status.status,
        "timestamp": SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0),
    });
    if let Some(err) = &status.error {
        body["error"] = serde_json::Value::from(err.as_str());
    }
    body.to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    // ---

    #[test]
    fn command_frame_with_request_id() {
        // ---
        let frame = parse_frame(r#"CMD:{"type":"ARM","uavId":"uav3","requestId":"r1"}"#).unwrap();
        let Frame::Message(msg) = frame else {
            panic!("expected message frame");
        };
        assert_eq!(msg.kind, DownlinkKind::Command);
        assert_eq!(msg.uav_id, "uav3");
        assert_eq!(msg.request_id, "r1");
        assert_eq!(msg.payload, r#"{"type":"ARM","uavId":"uav3","requestId":"r1"}"#);
    }

    // ---

    #[test]
    fn mission_and_flow_prefixes_classify() {
        // ---
        let mission = parse_frame(r#"MISSION:{"id":"m1","requestId":"r2"}"#).unwrap();
        let flow = parse_frame(r#"FLOW:{"flow_id":"f1","requestId":"r3"}"#).unwrap();

        match (mission, flow) {
            (Frame::Message(m), Frame::Message(f)) => {
                assert_eq!(m.kind, DownlinkKind::Mission);
                assert_eq!(f.kind, DownlinkKind::Flow);
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    // ---

    #[test]
    fn missing_fields_get_defaults() {
        // ---
        let Frame::Message(msg) = parse_frame(r#"CMD:{"type":"ARM"}"#).unwrap() else {
            panic!("expected message frame");
        };
        assert_eq!(msg.uav_id, DEFAULT_UAV_ID);
        assert!(msg.request_id.starts_with("req_"));
    }

    // ---

    #[test]
    fn malformed_json_is_recovered_not_rejected() {
        // ---
        let Frame::Message(msg) = parse_frame("CMD:{not json at all").unwrap() else {
            panic!("expected message frame");
        };
        assert_eq!(msg.uav_id, DEFAULT_UAV_ID);
        assert!(msg.request_id.starts_with("req_"));
        assert_eq!(msg.payload, "{not json at all");
    }

    // ---

    #[test]
    fn ack_frame_strips_trailing_cr() {
        // ---
        assert_eq!(parse_frame("ACK:r1"), Some(Frame::Ack("r1".into())));
        assert_eq!(parse_frame("ACK:r1\r"), Some(Frame::Ack("r1".into())));
    }

    // ---

    #[test]
    fn foreign_traffic_is_ignored() {
        // ---
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame(r#"{"type":"telemetry_echo"}"#), None);
        assert_eq!(parse_frame("PING"), None);
    }

    // ---

    #[test]
    fn encode_ack_round_trips() {
        // ---
        assert_eq!(parse_frame(&encode_ack("req-42")), Some(Frame::Ack("req-42".into())));
    }

    // ---

    #[test]
    fn flow_status_line_carries_fields() {
        // ---
        let status = FlowStatus {
            flow_id: "flow_001".into(),
            status: "failed".into(),
            error: Some("node crashed".into()),
        };
        let line = encode_flow_status("uav0", &status);
        assert!(!line.contains('\n'));

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["type"], "flow_status");
        assert_eq!(value["uav_id"], "uav0");
        assert_eq!(value["flow_id"], "flow_001");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "node crashed");
        assert!(value["timestamp"].is_u64());
    }

    // ---

    #[test]
    fn flow_status_omits_error_when_clean() {
        // ---
        let status = FlowStatus {
            flow_id: "flow_001".into(),
            status: "completed".into(),
            error: None,
        };
        let value: serde_json::Value =
            serde_json::from_str(&encode_flow_status("uav0", &status)).unwrap();
        assert!(value.get("error").is_none());
    }
}
