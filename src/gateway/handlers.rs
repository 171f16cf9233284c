//! HTTP endpoint handlers.
//!
//! Each transactional endpoint merges the body, resolves the target
//! terminal, normalizes amounts, builds one envelope, runs one session,
//! and returns `{success, requestId, ok, rsp?, error?, log}`. Validation
//! problems are the only 400s; protocol failures still return 200 because
//! the caller needs the session log either way.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::body::{
    field, identifier, merged_body, normalized_amount, required_amount, resolve_target, Target,
};
use super::AppState;
use crate::config::BridgeConfig;
use crate::protocol::envelope::{build_command_envelope, next_request_id};
use crate::protocol::session::{probe_connect, send_command};
use crate::{value_flag, value_str};

type HttpResult = (StatusCode, Json<Value>);

fn bad_request(message: &str) -> HttpResult {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"success": false, "message": message})),
    )
}

fn body_value(body: Option<Json<Value>>) -> Value {
    body.map(|Json(v)| v).unwrap_or_else(|| json!({}))
}

fn query_value(params: HashMap<String, String>) -> Value {
    json!(params)
}

fn flag_of(merged: &Value, key: &str) -> Option<bool> {
    merged
        .get("transaction")
        .and_then(|t| value_flag(t, &[key]))
        .or_else(|| value_flag(merged, &[key]))
}

fn str_of(merged: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        field(merged, key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

/// Run one command session and shape the HTTP response. Transactional
/// commands hold the per-terminal gate for the whole session.
async fn run_session(
    state: &AppState,
    cfg: &BridgeConfig,
    command: &str,
    target: &Target,
    payload: Option<Value>,
    serialize: bool,
) -> HttpResult {
    let timeouts = cfg.timeouts();
    let request_id = next_request_id();
    let envelope = build_command_envelope(command, &target.ecr_id, &request_id, payload);

    let outcome = if serialize {
        let gate = state.gate.lock_for(&target.ip, target.port);
        let _held = gate.lock().await;
        send_command(&target.ip, target.port, &envelope, &timeouts).await
    } else {
        send_command(&target.ip, target.port, &envelope, &timeouts).await
    };

    let mut resp = json!({
        "success": true,
        "requestId": request_id,
        "ok": outcome.ok,
        "log": outcome.log,
    });
    if let Some(rsp) = outcome.rsp {
        resp["rsp"] = rsp;
    }
    if let Some(error) = outcome.error {
        resp["error"] = json!(error);
    }
    (StatusCode::OK, Json(resp))
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

pub async fn health(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> HttpResult {
    let cfg = state.config_snapshot();
    let target = resolve_target(&query_value(params), &cfg);
    let available = probe_connect(
        &target.ip,
        target.port,
        Duration::from_millis(cfg.connect_timeout_ms),
    )
    .await
    .is_ok();

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "status": "ok",
            "config": cfg.dump(),
            "terminal": {"ip": target.ip, "port": target.port, "available": available},
            "build": {
                "version": env!("CARGO_PKG_VERSION"),
                "gitSha": env!("BUILD_GIT_SHA"),
                "builtAt": env!("BUILD_TIMESTAMP"),
            },
            "uptimeSeconds": state.started.elapsed().as_secs(),
        })),
    )
}

pub async fn availability(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> HttpResult {
    let cfg = state.config_snapshot();
    let target = resolve_target(&query_value(params), &cfg);
    let result = probe_connect(
        &target.ip,
        target.port,
        Duration::from_millis(cfg.connect_timeout_ms),
    )
    .await;

    let mut resp = json!({
        "success": true,
        "ip": target.ip,
        "port": target.port,
        "available": result.is_ok(),
    });
    if let Err(error) = result {
        resp["error"] = json!(error);
    }
    (StatusCode::OK, Json(resp))
}

pub async fn ping(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> HttpResult {
    let cfg = state.config_snapshot();
    let target = resolve_target(&query_value(params), &cfg);
    run_session(&state, &cfg, "Ping", &target, None, false).await
}

// ---------------------------------------------------------------------------
// Sale / PreAuth
// ---------------------------------------------------------------------------

fn sale_payload(merged: &Value, require_lodging: bool) -> Result<Value, String> {
    let base = required_amount(merged, &["baseAmount"])?;
    let mut transaction = json!({"baseAmount": base});
    if let Some(tip) = normalized_amount(merged, &["tipAmount"])? {
        transaction["tipAmount"] = json!(tip);
    }
    if let Some(tax) = normalized_amount(merged, &["taxAmount"])? {
        transaction["taxAmount"] = json!(tax);
    }
    if let Some(cashback) = normalized_amount(merged, &["cashBackAmount", "cashbackAmount"])? {
        transaction["cashBackAmount"] = json!(cashback);
    }
    if let Some(pan) = str_of(merged, &["accountNumber", "cardNumber"]) {
        transaction["accountNumber"] = json!(pan);
    }

    let mut params = json!({
        "taxIndicator": str_of(merged, &["taxIndicator"]).unwrap_or_else(|| "0".to_string()),
    });
    if let Some(flag) = flag_of(merged, "allowPartialAuth") {
        params["allowPartialAuth"] = json!(i32::from(flag));
    }
    if let Some(flag) = flag_of(merged, "allowDuplicate") {
        params["allowDuplicate"] = json!(i32::from(flag));
    }
    if let Some(invoice) = str_of(merged, &["invoiceNbr", "invoiceNumber"]) {
        params["invoiceNbr"] = json!(invoice);
    }

    let mut payload = json!({"params": params, "transaction": transaction});
    match merged.get("lodging") {
        Some(lodging) if !lodging.is_null() => payload["lodging"] = lodging.clone(),
        _ if require_lodging => return Err("Missing required field lodging".to_string()),
        _ => {}
    }
    Ok(payload)
}

async fn sale_inner(state: Arc<AppState>, body: Value, require_lodging: bool) -> HttpResult {
    let merged = merged_body(&body, "sale");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);
    match sale_payload(&merged, require_lodging) {
        Ok(payload) => run_session(&state, &cfg, "Sale", &target, Some(payload), true).await,
        Err(msg) => bad_request(&msg),
    }
}

pub async fn sale(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> HttpResult {
    sale_inner(state, body_value(body), false).await
}

pub async fn sale_lodging(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> HttpResult {
    sale_inner(state, body_value(body), true).await
}

pub async fn preauth(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "preauth");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let amount = match required_amount(&merged, &["amount"]) {
        Ok(amount) => amount,
        Err(msg) => return bad_request(&msg),
    };
    let mut transaction = json!({"amount": amount});
    match normalized_amount(&merged, &["preAuthAmount"]) {
        Ok(Some(hold)) => transaction["preAuthAmount"] = json!(hold),
        Ok(None) => {}
        Err(msg) => return bad_request(&msg),
    }
    if let Some(pan) = str_of(&merged, &["accountNumber", "cardNumber"]) {
        transaction["accountNumber"] = json!(pan);
    }

    let mut payload = json!({"transaction": transaction});
    if let Some(lodging) = merged.get("lodging").filter(|l| !l.is_null()) {
        payload["lodging"] = lodging.clone();
    }
    run_session(&state, &cfg, "PreAuth", &target, Some(payload), true).await
}

pub async fn auth_completion(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "authCompletion");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let Some(reference) = identifier(&merged, &["referenceNumber"]) else {
        return bad_request("Missing required field referenceNumber");
    };
    let amount = match required_amount(&merged, &["amount", "totalAmount"]) {
        Ok(amount) => amount,
        Err(msg) => return bad_request(&msg),
    };
    let mut transaction = json!({"referenceNumber": reference, "amount": amount});
    match normalized_amount(&merged, &["tipAmount"]) {
        Ok(Some(tip)) => transaction["tipAmount"] = json!(tip),
        Ok(None) => {}
        Err(msg) => return bad_request(&msg),
    }

    let payload = json!({"transaction": transaction});
    run_session(&state, &cfg, "AuthCompletion", &target, Some(payload), true).await
}

// ---------------------------------------------------------------------------
// Void / Refund / TipAdjust
// ---------------------------------------------------------------------------

pub async fn void(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "void");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let mut transaction = json!({});
    if let Some(tran_no) = identifier(&merged, &["tranNo"]) {
        transaction["tranNo"] = json!(tran_no);
    }
    if let Some(reference) = identifier(&merged, &["referenceNumber"]) {
        transaction["referenceNumber"] = json!(reference);
    }
    if transaction.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        return bad_request("Missing required field tranNo or referenceNumber");
    }

    let payload = json!({"transaction": transaction});
    run_session(&state, &cfg, "Void", &target, Some(payload), true).await
}

pub async fn refund(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "refund");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let total = match required_amount(&merged, &["totalAmount"]) {
        Ok(total) => total,
        Err(msg) => return bad_request(&msg),
    };
    let mut transaction = json!({"totalAmount": total});
    // referenceNumber switches between referenced and unreferenced refund
    if let Some(reference) = identifier(&merged, &["referenceNumber"]) {
        transaction["referenceNumber"] = json!(reference);
    }
    if let Some(pan) = str_of(&merged, &["accountNumber", "cardNumber"]) {
        transaction["accountNumber"] = json!(pan);
    }

    let payload = json!({"transaction": transaction});
    run_session(&state, &cfg, "Refund", &target, Some(payload), true).await
}

pub async fn tip_adjust(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "tipAdjust");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let tip = match required_amount(&merged, &["tipAmount"]) {
        Ok(tip) => tip,
        Err(msg) => return bad_request(&msg),
    };
    let mut transaction = json!({"tipAmount": tip});
    if let Some(tran_no) = identifier(&merged, &["tranNo"]) {
        transaction["tranNo"] = json!(tran_no);
    }
    if let Some(reference) = identifier(&merged, &["referenceNumber"]) {
        transaction["referenceNumber"] = json!(reference);
    }
    if transaction.as_object().map(|o| o.len() == 1).unwrap_or(true) {
        return bad_request("Missing required field tranNo or referenceNumber");
    }

    let payload = json!({"transaction": transaction});
    run_session(&state, &cfg, "TipAdjust", &target, Some(payload), true).await
}

// ---------------------------------------------------------------------------
// Batch close / generic command / config
// ---------------------------------------------------------------------------

pub async fn batch_close(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> HttpResult {
    let body = body_value(body);
    let merged = merged_body(&body, "batchClose");
    let cfg = state.config_snapshot();
    let target = resolve_target(&merged, &cfg);

    let command = value_str(&merged, &["command"]).unwrap_or_else(|| "EOD".to_string());
    run_session(&state, &cfg, &command, &target, None, true).await
}

pub async fn command(State(state): State<Arc<AppState>>, body: Option<Json<Value>>) -> HttpResult {
    let body = body_value(body);
    let cfg = state.config_snapshot();
    let target = resolve_target(&body, &cfg);

    let Some(command) = value_str(&body, &["command"]) else {
        return bad_request("Missing required field command");
    };
    let payload = body.get("data").filter(|d| !d.is_null()).cloned();
    run_session(&state, &cfg, &command, &target, payload, true).await
}

pub async fn set_config(
    State(state): State<Arc<AppState>>,
    body: Option<Json<Value>>,
) -> HttpResult {
    let patch = body_value(body);
    let dump = {
        let mut cfg = match state.config.write() {
            Ok(cfg) => cfg,
            Err(poisoned) => poisoned.into_inner(),
        };
        cfg.apply_override(&patch);
        cfg.dump()
    };
    (StatusCode::OK, Json(json!({"success": true, "config": dump})))
}
