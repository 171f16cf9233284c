//! Command envelope assembly and response classification.
//!
//! Every outbound command is one `MSG` envelope; the terminal answers with a
//! stream of frames whose `message` field decides how the session engine
//! treats them. Only `MSG`, `RSP`, and `ERR` terminate a session — anything
//! else is observational.

use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// How the session engine treats an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    /// Bare acknowledgment, observational only.
    Ack,
    /// Progress event (EVT/DSP/PIN/CNF/READY), never terminates the session.
    Progress,
    /// Final response (MSG/RSP/ERR), the sole commit point.
    Final,
    /// Unrecognized message kind, treated as non-terminal.
    Unknown,
}

/// Classify a frame by its `message` field.
pub fn classify(message: &str) -> FrameClass {
    match message {
        "ACK" => FrameClass::Ack,
        "EVT" | "DSP" | "PIN" | "CNF" | "READY" => FrameClass::Progress,
        "MSG" | "RSP" | "ERR" => FrameClass::Final,
        _ => FrameClass::Unknown,
    }
}

/// Allocate a request id: zero-padded 6-digit decimal derived from the
/// current epoch millis.
pub fn next_request_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("{:06}", millis % 1_000_000)
}

/// Build the outer command envelope:
/// `{message: "MSG", data: {command, EcrId, requestId, data?}}`.
pub fn build_command_envelope(
    command: &str,
    ecr_id: &str,
    request_id: &str,
    data: Option<Value>,
) -> Value {
    let mut inner = json!({
        "command": command,
        "EcrId": ecr_id,
        "requestId": request_id,
    });
    if let Some(payload) = data {
        inner["data"] = payload;
    }
    json!({"message": "MSG", "data": inner})
}

/// Whether a final response carries `cmdResult.result = "Success"`.
pub fn cmd_result_ok(rsp: &Value) -> bool {
    rsp.pointer("/data/cmdResult/result")
        .and_then(Value::as_str)
        .map(|r| r == "Success")
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_all_kinds() {
        assert_eq!(classify("ACK"), FrameClass::Ack);
        for progress in ["EVT", "DSP", "PIN", "CNF", "READY"] {
            assert_eq!(classify(progress), FrameClass::Progress);
        }
        for terminal in ["MSG", "RSP", "ERR"] {
            assert_eq!(classify(terminal), FrameClass::Final);
        }
        assert_eq!(classify("WAT"), FrameClass::Unknown);
    }

    #[test]
    fn test_request_id_shape() {
        let id = next_request_id();
        assert_eq!(id.len(), 6);
        assert!(id.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn test_build_command_envelope() {
        let env = build_command_envelope(
            "Sale",
            "22",
            "000123",
            Some(json!({"transaction": {"baseAmount": "10.00"}})),
        );
        assert_eq!(env["message"], "MSG");
        assert_eq!(env["data"]["command"], "Sale");
        assert_eq!(env["data"]["EcrId"], "22");
        assert_eq!(env["data"]["requestId"], "000123");
        assert_eq!(env["data"]["data"]["transaction"]["baseAmount"], "10.00");
    }

    #[test]
    fn test_envelope_without_payload_omits_data() {
        let env = build_command_envelope("Ping", "1", "000001", None);
        assert!(env["data"].get("data").is_none());
    }

    #[test]
    fn test_cmd_result_ok() {
        let ok = json!({"data": {"cmdResult": {"result": "Success"}}});
        let failed = json!({"data": {"cmdResult": {"result": "Failed"}}});
        assert!(cmd_result_ok(&ok));
        assert!(!cmd_result_ok(&failed));
        assert!(!cmd_result_ok(&json!({})));
    }
}
