//! Command dispatch over the terminal TCP link.
//!
//! Each accepted connection gets its own frame decoder and a `SystemReady`
//! welcome. For every decoded command the emulator sends an immediate ACK,
//! then exactly one final `MSG` after a short per-command delay, the way a
//! physical terminal paces its host responses.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::handlers;
use super::store::TerminalStore;
use crate::protocol::frame::{encode_frame, FrameDecoder};
use crate::value_str;

// ---------------------------------------------------------------------------
// Command routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sale,
    ForceSale,
    PreAuth,
    AuthCompletion,
    Void,
    Refund,
    TipAdjust,
    BatchClose,
    StatusInquiry,
    BatchInquiry,
    TransactionList,
    SystemReset,
    Ping,
}

impl Command {
    /// Map a wire command name (including the common aliases POS vendors
    /// use) to its handler.
    pub fn resolve(name: &str) -> Option<Self> {
        match name {
            "Sale" | "CreditSale" => Some(Self::Sale),
            "ForceSale" => Some(Self::ForceSale),
            "PreAuth" | "PreAuthorization" => Some(Self::PreAuth),
            "AuthCompletion" | "PreAuthCompletion" | "Capture" => Some(Self::AuthCompletion),
            "Void" | "VoidTransaction" => Some(Self::Void),
            "Refund" | "CreditRefund" => Some(Self::Refund),
            "TipAdjust" | "TipAdjustment" => Some(Self::TipAdjust),
            "EOD" | "EODProcessing" | "BatchClose" | "Batch" => Some(Self::BatchClose),
            "StatusInquiry" | "TransactionStatus" => Some(Self::StatusInquiry),
            "BatchInquiry" | "BatchStatus" => Some(Self::BatchInquiry),
            "TransactionList" | "TransactionHistory" => Some(Self::TransactionList),
            "SystemReset" | "Reset" => Some(Self::SystemReset),
            "Ping" | "TestConnection" => Some(Self::Ping),
            _ => None,
        }
    }

    /// Artificial pacing before the final response.
    pub fn delay(&self) -> Duration {
        let ms = match self {
            Self::Sale | Self::ForceSale | Self::PreAuth | Self::BatchClose => 300,
            Self::Refund | Self::AuthCompletion => 250,
            Self::Void | Self::TipAdjust => 200,
            Self::StatusInquiry
            | Self::BatchInquiry
            | Self::TransactionList
            | Self::SystemReset
            | Self::Ping => 150,
        };
        Duration::from_millis(ms)
    }
}

// ---------------------------------------------------------------------------
// Connection handling
// ---------------------------------------------------------------------------

/// Accept loop. Runs until the shutdown flag flips.
pub async fn run(
    listener: TcpListener,
    store: Arc<TerminalStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("emulator listening on {addr}");
    }
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("terminal link accepted from {peer}");
                    connections.spawn(serve_connection(stream, store.clone(), shutdown.clone()));
                }
                Err(e) => warn!("accept failed: {e}"),
            },
            _ = shutdown.changed() => break,
        }
    }
    connections.shutdown().await;
    info!("emulator stopped");
}

async fn serve_connection(
    mut stream: TcpStream,
    store: Arc<TerminalStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    let _ = stream.set_nodelay(true);

    let welcome = json!({"message": "READY", "data": {"response": "SystemReady"}});
    if stream.write_all(&encode_frame(&welcome)).await.is_err() {
        return;
    }

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 4096];
    loop {
        while let Some(decoded) = decoder.next_frame() {
            let outcome = match decoded {
                Ok(envelope) => handle_envelope(&mut stream, &store, envelope).await,
                Err(e) => {
                    warn!("malformed frame from client: {e}");
                    let data = handlers::failure("Error", "JSON001", "malformed request payload");
                    let err = json!({"message": "ERR", "data": data});
                    stream.write_all(&encode_frame(&err)).await
                }
            };
            if outcome.is_err() {
                return;
            }
        }
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => return,
                Ok(n) => decoder.extend(&buf[..n]),
                Err(e) => {
                    debug!("terminal link read error: {e}");
                    return;
                }
            },
            _ = shutdown.changed() => return,
        }
    }
}

/// ACK the request immediately, then send exactly one final response.
async fn handle_envelope(
    stream: &mut TcpStream,
    store: &TerminalStore,
    envelope: Value,
) -> std::io::Result<()> {
    let message = envelope.get("message").and_then(Value::as_str).unwrap_or("");
    if message == "ACK" {
        debug!("client ACK recorded");
        return Ok(());
    }

    let data = envelope.get("data").cloned().unwrap_or_else(|| json!({}));
    let Some(command) = value_str(&data, &["command"]) else {
        debug!("frame without command ignored");
        return Ok(());
    };
    let ecr_id = value_str(&data, &["EcrId"]).unwrap_or_default();
    let request_id = value_str(&data, &["requestId"]).unwrap_or_default();

    let ack = json!({
        "message": "ACK",
        "data": {"EcrId": ecr_id.clone(), "requestId": request_id.clone()},
    });
    stream.write_all(&encode_frame(&ack)).await?;

    let payload = data.get("data").cloned().unwrap_or_else(|| json!({}));
    let (delay, mut response) = match Command::resolve(&command) {
        Some(cmd) => (cmd.delay(), handlers::handle(&cmd, store, &payload)),
        None => {
            warn!("unknown command {command}");
            (
                Duration::from_millis(150),
                handlers::failure(&command, "CMD001", &format!("unknown command {command}")),
            )
        }
    };
    response["EcrId"] = json!(ecr_id);
    response["requestId"] = json!(request_id);

    tokio::time::sleep(delay).await;
    let final_frame = json!({"message": "MSG", "data": response});
    stream.write_all(&encode_frame(&final_frame)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::store::{TerminalState, TranStatus};
    use crate::protocol::envelope::build_command_envelope;
    use crate::protocol::session::{send_command, Timeouts};

    fn wire_timeouts() -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(1_000),
            overall: Duration::from_millis(8_000),
            idle: Duration::from_millis(3_000),
        }
    }

    async fn spawn_emulator() -> (String, u16, Arc<TerminalStore>, watch::Sender<bool>) {
        let store = Arc::new(TerminalStore::new(TerminalState::default(), None));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = watch::channel(false);
        tokio::spawn(run(listener, store.clone(), rx));
        ("127.0.0.1".to_string(), port, store, tx)
    }

    async fn drive(
        ip: &str,
        port: u16,
        command: &str,
        payload: Option<Value>,
    ) -> crate::protocol::session::SessionOutcome {
        let envelope = build_command_envelope(command, "1", "000042", payload);
        send_command(ip, port, &envelope, &wire_timeouts()).await
    }

    #[test]
    fn test_resolve_aliases() {
        assert_eq!(Command::resolve("CreditSale"), Some(Command::Sale));
        assert_eq!(Command::resolve("EODProcessing"), Some(Command::BatchClose));
        assert_eq!(Command::resolve("Batch"), Some(Command::BatchClose));
        assert_eq!(Command::resolve("TransactionHistory"), Some(Command::TransactionList));
        assert_eq!(Command::resolve("Reset"), Some(Command::SystemReset));
        assert_eq!(Command::resolve("Capture"), Some(Command::AuthCompletion));
        assert_eq!(Command::resolve("MakeCoffee"), None);
    }

    #[test]
    fn test_delays_within_realistic_window() {
        for cmd in [
            Command::Sale,
            Command::Void,
            Command::Refund,
            Command::BatchClose,
            Command::Ping,
        ] {
            let ms = cmd.delay().as_millis();
            assert!((150..=300).contains(&ms));
        }
    }

    #[tokio::test]
    async fn test_ping_end_to_end() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let outcome = drive(&ip, port, "Ping", None).await;

        assert!(outcome.ok);
        let rsp = outcome.rsp.as_ref().unwrap();
        assert_eq!(rsp["data"]["response"], "Ping");
        assert_eq!(rsp["data"]["cmdResult"]["result"], "Success");
        assert_eq!(rsp["data"]["requestId"], "000042");
        assert_eq!(rsp["data"]["EcrId"], "1");

        let kinds: Vec<&str> = outcome.log.iter().map(|e| e.kind.as_str()).collect();
        assert!(kinds.contains(&"TCP CONNECT"));
        assert!(kinds.contains(&"send-json"));
        // Welcome READY, ACK, then the final MSG
        assert!(kinds.iter().filter(|k| **k == "recv-json").count() >= 3);
    }

    #[tokio::test]
    async fn test_sale_approved_over_wire() {
        let (ip, port, store, _shutdown) = spawn_emulator().await;
        let payload = json!({"transaction": {"baseAmount": "10.00"}});
        let outcome = drive(&ip, port, "Sale", Some(payload)).await;

        assert!(outcome.ok);
        let data = &outcome.rsp.as_ref().unwrap()["data"];
        assert_eq!(data["host"]["responseText"], "APPROVAL");
        assert_eq!(data["host"]["responseCode"], "00");
        assert_eq!(data["transaction"]["status"], "APPROVED");

        let tran_no = data["host"]["tranNo"].as_str().unwrap();
        let stored = store.find(tran_no).unwrap().unwrap();
        assert_eq!(stored.status, TranStatus::Approved);
        assert_eq!(stored.amounts.total_amount, "10.00");
    }

    #[tokio::test]
    async fn test_sale_partial_over_wire() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let payload = json!({"transaction": {"baseAmount": "155.00"}});
        let outcome = drive(&ip, port, "Sale", Some(payload)).await;

        assert!(outcome.ok);
        let data = &outcome.rsp.as_ref().unwrap()["data"];
        assert_eq!(data["host"]["responseCode"], "10");
        assert_eq!(data["amount"]["authorizedAmount"], "100.00");
        assert_eq!(data["amount"]["balanceDue"], "55.00");
    }

    #[tokio::test]
    async fn test_sale_declined_over_wire() {
        let (ip, port, store, _shutdown) = spawn_emulator().await;
        let payload = json!({"transaction": {"baseAmount": "500.00"}});
        let outcome = drive(&ip, port, "Sale", Some(payload)).await;

        // Final frame arrived, but the host declined
        assert!(!outcome.ok);
        assert!(outcome.error.is_none());
        let data = &outcome.rsp.as_ref().unwrap()["data"];
        assert_eq!(data["cmdResult"]["errorCode"], "DECLINE");
        assert_eq!(data["host"]["declineReason"], "AMOUNT TOO HIGH");
        assert!(store.unsettled().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_void_lifecycle_over_wire() {
        let (ip, port, store, _shutdown) = spawn_emulator().await;
        let sale = drive(&ip, port, "Sale", Some(json!({"transaction": {"baseAmount": "10.00"}}))).await;
        let tran_no = sale.rsp.as_ref().unwrap()["data"]["host"]["tranNo"]
            .as_str()
            .unwrap()
            .to_string();

        let void = drive(
            &ip,
            port,
            "Void",
            Some(json!({"transaction": {"tranNo": tran_no.clone()}})),
        )
        .await;
        assert!(void.ok);
        assert_eq!(store.find(&tran_no).unwrap().unwrap().status, TranStatus::Voided);

        let again = drive(
            &ip,
            port,
            "Void",
            Some(json!({"transaction": {"tranNo": tran_no}})),
        )
        .await;
        assert!(!again.ok);
        assert_eq!(
            again.rsp.unwrap()["data"]["cmdResult"]["errorCode"],
            "VOID001"
        );
    }

    #[tokio::test]
    async fn test_batch_close_over_wire() {
        let (ip, port, store, _shutdown) = spawn_emulator().await;
        for amount in ["10.00", "20.00"] {
            let outcome = drive(
                &ip,
                port,
                "Sale",
                Some(json!({"transaction": {"baseAmount": amount}})),
            )
            .await;
            assert!(outcome.ok);
        }
        let voided = drive(&ip, port, "Sale", Some(json!({"transaction": {"baseAmount": "7.00"}}))).await;
        let tran_no = voided.rsp.as_ref().unwrap()["data"]["host"]["tranNo"]
            .as_str()
            .unwrap()
            .to_string();
        drive(&ip, port, "Void", Some(json!({"transaction": {"tranNo": tran_no}}))).await;

        let eod = drive(&ip, port, "EOD", None).await;
        assert!(eod.ok);
        let data = &eod.rsp.as_ref().unwrap()["data"];
        assert_eq!(data["response"], "EOD");
        assert_eq!(data["batchSummary"]["salesCount"], 2);
        assert_eq!(data["batchSummary"]["netAmount"], "30.00");

        assert!(store.unsettled().unwrap().is_empty());
        assert_eq!(store.open_batch().unwrap().id, "B0002");
    }

    #[tokio::test]
    async fn test_alias_and_eod_label() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let sale = drive(
            &ip,
            port,
            "CreditSale",
            Some(json!({"transaction": {"baseAmount": "1.00"}})),
        )
        .await;
        assert_eq!(sale.rsp.unwrap()["data"]["response"], "Sale");

        // Any batch-close alias answers with the canonical EOD label
        let eod = drive(&ip, port, "BatchClose", None).await;
        assert_eq!(eod.rsp.unwrap()["data"]["response"], "EOD");
    }

    #[tokio::test]
    async fn test_unknown_command_cmd001() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let outcome = drive(&ip, port, "MakeCoffee", None).await;
        assert!(!outcome.ok);
        let data = &outcome.rsp.as_ref().unwrap()["data"];
        assert_eq!(data["cmdResult"]["errorCode"], "CMD001");
        assert_eq!(data["response"], "MakeCoffee");
    }

    #[tokio::test]
    async fn test_inbound_ack_gets_no_reply() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let mut stream = TcpStream::connect((ip.as_str(), port)).await.unwrap();

        // Client-side ACK, then a Ping
        stream
            .write_all(&encode_frame(&json!({"message": "ACK"})))
            .await
            .unwrap();
        let ping = build_command_envelope("Ping", "1", "000007", None);
        stream.write_all(&encode_frame(&ping)).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        let mut frames = Vec::new();
        while frames.len() < 3 {
            let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            decoder.extend(&buf[..n]);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame.unwrap());
            }
        }

        // Welcome, ACK for the ping, final for the ping — nothing for the ACK
        assert_eq!(frames[0]["message"], "READY");
        assert_eq!(frames[1]["message"], "ACK");
        assert_eq!(frames[2]["message"], "MSG");
        assert_eq!(frames[2]["data"]["requestId"], "000007");
    }

    #[tokio::test]
    async fn test_malformed_payload_answers_json001() {
        let (ip, port, _store, _shutdown) = spawn_emulator().await;
        let mut stream = TcpStream::connect((ip.as_str(), port)).await.unwrap();

        let mut bytes = vec![0x02, 0x0A];
        bytes.extend_from_slice(b"{broken payload");
        bytes.extend_from_slice(&[0x0A, 0x03, 0x0A]);
        stream.write_all(&bytes).await.unwrap();

        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];
        let mut frames = Vec::new();
        while frames.len() < 2 {
            let n = tokio::time::timeout(Duration::from_secs(3), stream.read(&mut buf))
                .await
                .unwrap()
                .unwrap();
            decoder.extend(&buf[..n]);
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame.unwrap());
            }
        }
        assert_eq!(frames[0]["message"], "READY");
        assert_eq!(frames[1]["message"], "ERR");
        assert_eq!(frames[1]["data"]["cmdResult"]["errorCode"], "JSON001");
    }
}
