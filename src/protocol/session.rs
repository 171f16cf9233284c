//! Per-command terminal session.
//!
//! One TCP session per command: connect, write the framed envelope once,
//! then consume frames until a final response or a timeout. Three layered
//! timeouts apply: `connect` on the dial, `overall` armed once after the
//! write, and `idle` re-armed on every received byte chunk. The session
//! never sends anything after its single outbound envelope.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::debug;

use super::envelope::{classify, cmd_result_ok, FrameClass};
use super::frame::{encode_frame, FrameDecoder};

/// Layered session timeouts.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub overall: Duration,
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(5_000),
            overall: Duration::from_millis(180_000),
            idle: Duration::from_millis(25_000),
        }
    }
}

/// Transport-level failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    ConnectTimeout,
    ConnectError,
    ReadTimeout,
    IdleTimeout,
    SocketError,
    InvalidFrame,
}

/// One timestamped entry in the session debug log.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub at: String,
    pub kind: String,
    pub detail: Value,
}

/// Outcome of a single command session. `ok` means a final response arrived
/// and its `cmdResult.result` was `Success`; transport failures carry
/// `error` instead of `rsp`. The log is always returned — it is the
/// principal debugging artifact.
#[derive(Debug, Serialize)]
pub struct SessionOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    pub log: Vec<SessionEvent>,
}

fn push(log: &mut Vec<SessionEvent>, kind: &str, detail: Value) {
    log.push(SessionEvent {
        at: Utc::now().to_rfc3339(),
        kind: kind.to_string(),
        detail,
    });
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn transport_failure(error: ErrorKind, log: Vec<SessionEvent>) -> SessionOutcome {
    SessionOutcome {
        ok: false,
        rsp: None,
        error: Some(error),
        log,
    }
}

/// Bare TCP connect probe (used by `/availability`, bypasses the session
/// machinery and the per-terminal queue).
pub async fn probe_connect(ip: &str, port: u16, connect: Duration) -> Result<(), ErrorKind> {
    let addr = format!("{ip}:{port}");
    match timeout(connect, TcpStream::connect(&addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(_)) => Err(ErrorKind::ConnectError),
        Err(_) => Err(ErrorKind::ConnectTimeout),
    }
}

/// Drive one command through a terminal: frame, write, consume ACK and
/// progress events, and return on the first final frame or timeout. The
/// socket is owned by the session and destroyed on every exit path.
pub async fn send_command(
    ip: &str,
    port: u16,
    envelope: &Value,
    timeouts: &Timeouts,
) -> SessionOutcome {
    let mut log = Vec::new();
    let addr = format!("{ip}:{port}");

    let mut stream = match timeout(timeouts.connect, TcpStream::connect(&addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) => {
            push(&mut log, "connect-error", json!({"addr": addr, "error": e.to_string()}));
            return transport_failure(ErrorKind::ConnectError, log);
        }
        Err(_) => {
            push(
                &mut log,
                "connect-timeout",
                json!({"addr": addr, "timeoutMs": timeouts.connect.as_millis() as u64}),
            );
            return transport_failure(ErrorKind::ConnectTimeout, log);
        }
    };
    let _ = stream.set_nodelay(true);
    push(&mut log, "TCP CONNECT", json!({"addr": addr}));

    let frame = encode_frame(envelope);
    if let Err(e) = stream.write_all(&frame).await {
        push(&mut log, "socket-error", json!({"error": e.to_string()}));
        push(&mut log, "TCP CLOSE", json!({"addr": addr}));
        return transport_failure(ErrorKind::SocketError, log);
    }
    push(&mut log, "send-raw", json!({"hex": hex(&frame)}));
    push(&mut log, "send-json", envelope.clone());

    let overall = sleep_until(Instant::now() + timeouts.overall);
    tokio::pin!(overall);
    let mut idle_deadline = Instant::now() + timeouts.idle;

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    let mut final_rsp: Option<Value> = None;
    let mut error: Option<ErrorKind> = None;

    loop {
        // Drain complete frames first: a final that was framed-complete
        // before a timer fires wins over the timer.
        while let Some(decoded) = decoder.next_frame() {
            match decoded {
                Ok(rsp) => {
                    let message = rsp
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    match classify(&message) {
                        FrameClass::Final if final_rsp.is_some() => {
                            debug!(%message, "dropping frame received after final");
                            push(&mut log, "late-frame", rsp);
                        }
                        FrameClass::Final => {
                            push(&mut log, "recv-json", rsp.clone());
                            final_rsp = Some(rsp);
                        }
                        FrameClass::Ack | FrameClass::Progress => {
                            push(&mut log, "recv-json", rsp);
                        }
                        FrameClass::Unknown => {
                            push(&mut log, "Unhandled", rsp);
                        }
                    }
                }
                Err(e) => {
                    push(&mut log, "invalid-frame", json!({"error": e.to_string()}));
                }
            }
        }
        if final_rsp.is_some() {
            break;
        }

        let idle = sleep_until(idle_deadline);
        tokio::select! {
            // Overall is checked before idle so that a shared expiry quantum
            // resolves to the more general timeout.
            biased;
            _ = &mut overall => {
                push(&mut log, "read-timeout", json!({"timeoutMs": timeouts.overall.as_millis() as u64}));
                error = Some(ErrorKind::ReadTimeout);
                break;
            }
            _ = idle => {
                push(&mut log, "idle-timeout", json!({"timeoutMs": timeouts.idle.as_millis() as u64}));
                error = Some(ErrorKind::IdleTimeout);
                break;
            }
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        push(&mut log, "socket-error", json!({"error": "connection closed by peer"}));
                        error = Some(ErrorKind::SocketError);
                        break;
                    }
                    Ok(n) => {
                        idle_deadline = Instant::now() + timeouts.idle;
                        push(&mut log, "recv-raw", json!({"hex": hex(&buf[..n])}));
                        decoder.extend(&buf[..n]);
                    }
                    Err(e) => {
                        push(&mut log, "socket-error", json!({"error": e.to_string()}));
                        error = Some(ErrorKind::SocketError);
                        break;
                    }
                }
            }
        }
    }

    drop(stream);
    push(&mut log, "TCP CLOSE", json!({"addr": addr}));

    let ok = final_rsp.as_ref().map(cmd_result_ok).unwrap_or(false);
    SessionOutcome {
        ok,
        rsp: final_rsp,
        error,
        log,
    }
}
