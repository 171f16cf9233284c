//! Per-command handlers.
//!
//! Each handler validates its payload against the state core, applies the
//! mutation, and builds the `data` object of the final response frame. The
//! dispatcher echoes `EcrId`/`requestId` and wraps the result in a `MSG`
//! envelope.

use serde_json::{json, Value};

use super::cards;
use super::dispatch::Command;
use super::store::{
    decide_sale, validate_refund, validate_tip_adjust, validate_void, Amounts, CardAcquisition,
    NewIds, SaleDecision, TerminalStore, Transaction, TranStatus, TranType,
};
use crate::amounts::{format_cents, parse_cents, parse_value};
use crate::{value_flag, value_str};

/// Route a resolved command to its handler. Failure responses come back as
/// the same shape with `cmdResult.result = "Failed"`.
pub fn handle(cmd: &Command, store: &TerminalStore, payload: &Value) -> Value {
    let result = match cmd {
        Command::Sale => sale(store, payload, TranType::Sale),
        Command::ForceSale => sale(store, payload, TranType::ForceSale),
        Command::PreAuth => preauth(store, payload),
        Command::AuthCompletion => auth_completion(store, payload),
        Command::Void => void(store, payload),
        Command::Refund => refund(store, payload),
        Command::TipAdjust => tip_adjust(store, payload),
        Command::BatchClose => batch_close(store),
        Command::StatusInquiry => status_inquiry(store, payload),
        Command::BatchInquiry => batch_inquiry(store),
        Command::TransactionList => transaction_list(store),
        Command::SystemReset => Ok(success("SystemReset")),
        Command::Ping => Ok(success("Ping")),
    };
    result.unwrap_or_else(|failed| failed)
}

// ---------------------------------------------------------------------------
// Response scaffolding
// ---------------------------------------------------------------------------

pub fn success(label: &str) -> Value {
    json!({
        "response": label,
        "cmdResult": {"result": "Success"},
    })
}

pub fn failure(label: &str, code: &str, message: &str) -> Value {
    json!({
        "response": label,
        "cmdResult": {
            "result": "Failed",
            "errorCode": code,
            "errorMessage": message,
        },
    })
}

fn sys_failure(label: &str, message: String) -> Value {
    failure(label, "SYS001", &message)
}

/// Read an amount field: `Ok(None)` when absent, `Err` when present but not
/// a parseable decimal.
fn read_cents(v: &Value, keys: &[&str]) -> Result<Option<i64>, String> {
    for key in keys {
        if let Some(raw) = v.get(*key) {
            if raw.is_null() {
                continue;
            }
            return match parse_value(raw) {
                Some(cents) => Ok(Some(cents)),
                None => Err(format!("invalid amount in {key}")),
            };
        }
    }
    Ok(None)
}

fn required_cents(v: &Value, keys: &[&str], label: &str) -> Result<i64, Value> {
    match read_cents(v, keys) {
        Ok(Some(cents)) => Ok(cents),
        Ok(None) => Err(failure(
            label,
            "AMT001",
            &format!("missing required field {}", keys[0]),
        )),
        Err(msg) => Err(failure(label, "AMT002", &msg)),
    }
}

fn optional_cents(v: &Value, keys: &[&str], label: &str) -> Result<i64, Value> {
    match read_cents(v, keys) {
        Ok(Some(cents)) => Ok(cents),
        Ok(None) => Ok(0),
        Err(msg) => Err(failure(label, "AMT002", &msg)),
    }
}

fn transaction_section(payload: &Value) -> Value {
    payload
        .get("transaction")
        .cloned()
        .unwrap_or_else(|| json!({}))
}

/// Card data for a new authorization: manually keyed PAN when the request
/// carries one, otherwise the simulated presentation for this sequence
/// number.
fn card_for(txn: &Value, params: &Value, seq: u64) -> (String, String, CardAcquisition) {
    let manual = value_str(txn, &["accountNumber", "cardNumber"])
        .or_else(|| value_str(params, &["accountNumber", "cardNumber"]));
    match manual {
        Some(pan) => {
            let card_type = cards::card_type_of(&pan).to_string();
            (pan, card_type, CardAcquisition::Manual)
        }
        None => {
            let card = cards::present(seq);
            (
                card.pan.to_string(),
                card.card_type.to_string(),
                cards::acquisition(seq),
            )
        }
    }
}

fn host_block(ids: &NewIds, stored: &Transaction, code: &str, text: &str) -> Value {
    json!({
        "responseCode": code,
        "responseText": text,
        "approvalCode": stored.approval_code,
        "responseId": ids.response_id,
        "tranNo": ids.tran_no,
        "referenceNumber": ids.reference_number,
        "batchId": stored.batch_id,
    })
}

fn payment_block(stored: &Transaction) -> Value {
    json!({
        "cardType": stored.card_type,
        "maskedPAN": stored.masked_pan,
        "cardAcquisition": stored.card_acquisition,
    })
}

fn amount_block(stored: &Transaction) -> Value {
    serde_json::to_value(&stored.amounts).unwrap_or_default()
}

fn new_ids(store: &TerminalStore, label: &str) -> Result<NewIds, Value> {
    store.new_ids().map_err(|e| sys_failure(label, e))
}

fn seq_of(ids: &NewIds) -> u64 {
    ids.tran_no.parse().unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Sale / PreAuth
// ---------------------------------------------------------------------------

fn sale(store: &TerminalStore, payload: &Value, tran_type: TranType) -> Result<Value, Value> {
    let label = if tran_type == TranType::ForceSale {
        "ForceSale"
    } else {
        "Sale"
    };
    let txn = transaction_section(payload);
    let params = payload.get("params").cloned().unwrap_or_else(|| json!({}));

    let base = required_cents(&txn, &["baseAmount", "amount"], label)?;
    let tip = optional_cents(&txn, &["tipAmount"], label)?;
    let tax = optional_cents(&txn, &["taxAmount"], label)?;
    let cashback = optional_cents(&txn, &["cashBackAmount", "cashbackAmount"], label)?;
    let total = base + tip + tax + cashback;

    let ids = new_ids(store, label)?;
    let (pan, card_type, acquisition) = card_for(&txn, &params, seq_of(&ids));
    let masked_pan = cards::mask_pan(&pan);

    // A force sale is a sale with the duplicate check bypassed; the
    // allowDuplicate param does the same for a plain sale.
    let allow_duplicate = tran_type == TranType::ForceSale
        || value_flag(&params, &["allowDuplicate"]).unwrap_or(false);
    let duplicate = if allow_duplicate {
        None
    } else {
        store
            .duplicate_of(total, &masked_pan)
            .map_err(|e| sys_failure(label, e))?
    };
    let decision = if duplicate.is_some() {
        SaleDecision::Declined {
            reason: "DUPLICATE TRANSACTION",
        }
    } else {
        decide_sale(total, &pan)
    };

    let (status, authorized) = match decision {
        SaleDecision::Approved => (TranStatus::Approved, total),
        SaleDecision::Partial {
            authorized_cents, ..
        } => (TranStatus::Approved, authorized_cents),
        SaleDecision::Declined { .. } => (TranStatus::Declined, 0),
    };

    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: (status == TranStatus::Approved).then(|| ids.approval_code.clone()),
        tran_type,
        status,
        amounts: Amounts {
            base_amount: format_cents(base),
            tip_amount: format_cents(tip),
            tax_amount: format_cents(tax),
            cashback_amount: format_cents(cashback),
            total_amount: format_cents(total),
            authorized_amount: format_cents(authorized),
        },
        card_acquisition: acquisition,
        card_type,
        masked_pan,
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: None,
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;

    let mut rsp = match decision {
        SaleDecision::Approved => {
            let mut rsp = success(label);
            rsp["host"] = host_block(&ids, &stored, "00", "APPROVAL");
            rsp
        }
        SaleDecision::Partial {
            balance_due_cents, ..
        } => {
            let mut rsp = success(label);
            rsp["host"] = host_block(&ids, &stored, "10", "PARTIAL APPROVAL");
            rsp["amount"] = amount_block(&stored);
            rsp["amount"]["balanceDue"] = json!(format_cents(balance_due_cents));
            rsp["amount"]["partialApproval"] = json!(1);
            rsp
        }
        SaleDecision::Declined { reason } => {
            let mut rsp = failure(label, "DECLINE", reason);
            rsp["host"] = json!({
                "responseCode": "05",
                "responseText": "DECLINED",
                "declineReason": reason,
                "tranNo": ids.tran_no,
                "referenceNumber": ids.reference_number,
                "batchId": stored.batch_id,
            });
            rsp
        }
    };
    if rsp.get("amount").is_none() {
        rsp["amount"] = amount_block(&stored);
    }
    rsp["payment"] = payment_block(&stored);
    rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
    if let Some(lodging) = payload.get("lodging") {
        rsp["lodging"] = lodging.clone();
    }
    Ok(rsp)
}

fn preauth(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "PreAuth";
    let txn = transaction_section(payload);
    let params = payload.get("params").cloned().unwrap_or_else(|| json!({}));

    let amount = required_cents(&txn, &["amount", "preAuthAmount", "baseAmount"], label)?;
    let ids = new_ids(store, label)?;
    let (pan, card_type, acquisition) = card_for(&txn, &params, seq_of(&ids));
    let decision = decide_sale(amount, &pan);

    if let SaleDecision::Declined { reason } = decision {
        let record = Transaction {
            id: String::new(),
            tran_no: ids.tran_no.clone(),
            reference_number: ids.reference_number.clone(),
            response_id: ids.response_id,
            approval_code: None,
            tran_type: TranType::PreAuth,
            status: TranStatus::Declined,
            amounts: Amounts {
                base_amount: format_cents(amount),
                total_amount: format_cents(amount),
                ..Amounts::default()
            },
            card_acquisition: acquisition,
            card_type,
            masked_pan: cards::mask_pan(&pan),
            batch_id: String::new(),
            created_at: String::new(),
            updated_at: String::new(),
            original_transaction: None,
        };
        let stored = store
            .add_transaction(record)
            .map_err(|e| sys_failure(label, e))?;
        let mut rsp = failure(label, "DECLINE", reason);
        rsp["host"] = json!({
            "responseCode": "05",
            "responseText": "DECLINED",
            "declineReason": reason,
            "tranNo": ids.tran_no,
            "referenceNumber": ids.reference_number,
        });
        rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
        return Ok(rsp);
    }

    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: Some(ids.approval_code.clone()),
        tran_type: TranType::PreAuth,
        status: TranStatus::Approved,
        amounts: Amounts {
            base_amount: format_cents(amount),
            total_amount: format_cents(amount),
            authorized_amount: format_cents(amount),
            ..Amounts::default()
        },
        card_acquisition: acquisition,
        card_type,
        masked_pan: cards::mask_pan(&pan),
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: None,
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;

    let mut rsp = success(label);
    rsp["host"] = host_block(&ids, &stored, "00", "APPROVAL");
    rsp["amount"] = amount_block(&stored);
    rsp["payment"] = payment_block(&stored);
    rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
    if let Some(lodging) = payload.get("lodging") {
        rsp["lodging"] = lodging.clone();
    }
    Ok(rsp)
}

// ---------------------------------------------------------------------------
// AuthCompletion (capture)
// ---------------------------------------------------------------------------

fn auth_completion(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "AuthCompletion";
    let txn = transaction_section(payload);

    let identifier = value_str(&txn, &["referenceNumber", "tranNo"])
        .or_else(|| value_str(payload, &["referenceNumber", "tranNo"]))
        .ok_or_else(|| failure(label, "REF002", "missing referenceNumber"))?;
    let amount = required_cents(&txn, &["amount", "totalAmount"], label)?;
    let tip = optional_cents(&txn, &["tipAmount"], label)?;
    let total = amount + tip;

    let target = store
        .find(&identifier)
        .map_err(|e| sys_failure(label, e))?
        .ok_or_else(|| failure(label, "REF002", "original transaction not found"))?;
    if target.tran_type != TranType::PreAuth {
        return Err(failure(label, "TRAN009", "referenced transaction is not a pre-auth"));
    }
    if !matches!(target.status, TranStatus::Approved) {
        return Err(failure(label, "TRAN009", "pre-auth is not open for completion"));
    }

    let ids = new_ids(store, label)?;
    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: Some(ids.approval_code.clone()),
        tran_type: TranType::Capture,
        status: TranStatus::Approved,
        amounts: Amounts {
            base_amount: format_cents(amount),
            tip_amount: format_cents(tip),
            total_amount: format_cents(total),
            authorized_amount: format_cents(total),
            ..Amounts::default()
        },
        card_acquisition: target.card_acquisition,
        card_type: target.card_type.clone(),
        masked_pan: target.masked_pan.clone(),
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: Some(target.id.clone()),
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;

    let captured_total = format_cents(total);
    store
        .update(&target.id, |t| {
            t.amounts.authorized_amount = captured_total.clone();
        })
        .map_err(|e| sys_failure(label, e))?;

    let mut rsp = success(label);
    rsp["host"] = host_block(&ids, &stored, "00", "APPROVAL");
    rsp["amount"] = amount_block(&stored);
    rsp["payment"] = payment_block(&stored);
    rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
    rsp["originalTransaction"] = json!({
        "tranNo": target.tran_no,
        "referenceNumber": target.reference_number,
        "type": target.tran_type,
    });
    Ok(rsp)
}

// ---------------------------------------------------------------------------
// Void
// ---------------------------------------------------------------------------

fn void(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "Void";
    let txn = transaction_section(payload);

    let identifier = value_str(&txn, &["tranNo", "referenceNumber"])
        .or_else(|| value_str(payload, &["tranNo", "referenceNumber"]))
        .ok_or_else(|| failure(label, "REF001", "missing tranNo or referenceNumber"))?;

    let target = store.find(&identifier).map_err(|e| sys_failure(label, e))?;
    let target = match validate_void(target.as_ref()) {
        Ok(t) => t.clone(),
        Err((code, message)) => return Err(failure(label, code, &message)),
    };

    let ids = new_ids(store, label)?;
    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: None,
        tran_type: TranType::Void,
        status: TranStatus::Approved,
        amounts: target.amounts.clone(),
        card_acquisition: target.card_acquisition,
        card_type: target.card_type.clone(),
        masked_pan: target.masked_pan.clone(),
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: Some(target.id.clone()),
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;
    store
        .update(&target.id, |t| t.status = TranStatus::Voided)
        .map_err(|e| sys_failure(label, e))?;

    let mut rsp = success(label);
    rsp["host"] = host_block(&ids, &stored, "00", "VOID APPROVED");
    rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
    rsp["originalTransaction"] = json!({
        "tranNo": target.tran_no,
        "referenceNumber": target.reference_number,
        "status": TranStatus::Voided,
        "totalAmount": target.amounts.total_amount,
    });
    Ok(rsp)
}

// ---------------------------------------------------------------------------
// Refund
// ---------------------------------------------------------------------------

fn refund(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "Refund";
    let txn = transaction_section(payload);
    let params = payload.get("params").cloned().unwrap_or_else(|| json!({}));

    let total = required_cents(&txn, &["totalAmount", "amount"], label)?;
    let reference = value_str(&txn, &["referenceNumber", "tranNo"])
        .or_else(|| value_str(payload, &["referenceNumber", "tranNo"]));

    let ids = new_ids(store, label)?;
    let (original, card_type, masked_pan, acquisition) = match reference {
        Some(identifier) => {
            let target = store.find(&identifier).map_err(|e| sys_failure(label, e))?;
            let target = match validate_refund(target.as_ref(), total) {
                Ok(t) => t.clone(),
                Err((code, message)) => return Err(failure(label, code, &message)),
            };
            (
                Some(target.clone()),
                target.card_type.clone(),
                target.masked_pan.clone(),
                target.card_acquisition,
            )
        }
        None => {
            let (pan, card_type, acquisition) = card_for(&txn, &params, seq_of(&ids));
            (None, card_type, cards::mask_pan(&pan), acquisition)
        }
    };

    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: Some(ids.approval_code.clone()),
        tran_type: TranType::Refund,
        status: TranStatus::Approved,
        amounts: Amounts {
            base_amount: format_cents(total),
            total_amount: format_cents(total),
            authorized_amount: format_cents(total),
            ..Amounts::default()
        },
        card_acquisition: acquisition,
        card_type,
        masked_pan,
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: original.as_ref().map(|t| t.id.clone()),
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;

    if let Some(target) = &original {
        store
            .update(&target.id, |t| t.status = TranStatus::Refunded)
            .map_err(|e| sys_failure(label, e))?;
    }

    let mut rsp = success(label);
    rsp["host"] = host_block(&ids, &stored, "00", "REFUND APPROVED");
    rsp["amount"] = amount_block(&stored);
    rsp["payment"] = payment_block(&stored);
    rsp["transaction"] = serde_json::to_value(&stored).unwrap_or_default();
    if let Some(target) = &original {
        rsp["originalTransaction"] = json!({
            "tranNo": target.tran_no,
            "referenceNumber": target.reference_number,
            "status": TranStatus::Refunded,
        });
    }
    Ok(rsp)
}

// ---------------------------------------------------------------------------
// Tip adjust
// ---------------------------------------------------------------------------

fn tip_adjust(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "TipAdjust";
    let txn = transaction_section(payload);

    let tip = match read_cents(&txn, &["tipAmount"]) {
        Ok(Some(cents)) => cents,
        Ok(None) => return Err(failure(label, "TIP001", "missing tipAmount")),
        Err(msg) => return Err(failure(label, "TIP001", &msg)),
    };
    let identifier = value_str(&txn, &["tranNo", "referenceNumber"])
        .or_else(|| value_str(payload, &["tranNo", "referenceNumber"]))
        .ok_or_else(|| failure(label, "REF001", "missing tranNo or referenceNumber"))?;

    let target = store.find(&identifier).map_err(|e| sys_failure(label, e))?;
    let target = match validate_tip_adjust(target.as_ref()) {
        Ok(t) => t.clone(),
        Err((code, message)) => return Err(failure(label, code, &message)),
    };

    let base = parse_cents(&target.amounts.base_amount).unwrap_or(0);
    let tax = parse_cents(&target.amounts.tax_amount).unwrap_or(0);
    let cashback = parse_cents(&target.amounts.cashback_amount).unwrap_or(0);
    let new_total = base + tax + cashback + tip;

    let adjusted = store
        .update(&target.id, |t| {
            t.amounts.tip_amount = format_cents(tip);
            t.amounts.total_amount = format_cents(new_total);
            t.amounts.authorized_amount = format_cents(new_total);
            t.status = TranStatus::TipAdjusted;
        })
        .map_err(|e| sys_failure(label, e))?
        .ok_or_else(|| failure(label, "REF001", "original transaction not found"))?;

    let ids = new_ids(store, label)?;
    let record = Transaction {
        id: String::new(),
        tran_no: ids.tran_no.clone(),
        reference_number: ids.reference_number.clone(),
        response_id: ids.response_id,
        approval_code: None,
        tran_type: TranType::TipAdjust,
        status: TranStatus::Approved,
        amounts: Amounts {
            base_amount: target.amounts.base_amount.clone(),
            tip_amount: format_cents(tip),
            total_amount: format_cents(new_total),
            ..Amounts::default()
        },
        card_acquisition: target.card_acquisition,
        card_type: target.card_type.clone(),
        masked_pan: target.masked_pan.clone(),
        batch_id: String::new(),
        created_at: String::new(),
        updated_at: String::new(),
        original_transaction: Some(target.id.clone()),
    };
    let stored = store
        .add_transaction(record)
        .map_err(|e| sys_failure(label, e))?;

    let mut rsp = success(label);
    rsp["host"] = host_block(&ids, &stored, "00", "TIP ADJUSTED");
    rsp["amount"] = serde_json::to_value(&adjusted.amounts).unwrap_or_default();
    rsp["originalTransaction"] = json!({
        "tranNo": target.tran_no,
        "referenceNumber": target.reference_number,
        "status": adjusted.status,
        "totalAmount": adjusted.amounts.total_amount,
    });
    Ok(rsp)
}

// ---------------------------------------------------------------------------
// Batch close and inquiries
// ---------------------------------------------------------------------------

fn batch_close(store: &TerminalStore) -> Result<Value, Value> {
    let label = "EOD";
    let summary = store.close_batch().map_err(|e| sys_failure(label, e))?;
    let mut rsp = success(label);
    rsp["batchSummary"] = serde_json::to_value(&summary).unwrap_or_default();
    Ok(rsp)
}

fn status_inquiry(store: &TerminalStore, payload: &Value) -> Result<Value, Value> {
    let label = "StatusInquiry";
    let txn = transaction_section(payload);
    let identifier = value_str(&txn, &["tranNo", "referenceNumber", "id"])
        .or_else(|| value_str(payload, &["tranNo", "referenceNumber", "id"]))
        .ok_or_else(|| failure(label, "REF001", "missing tranNo or referenceNumber"))?;

    let target = store
        .find(&identifier)
        .map_err(|e| sys_failure(label, e))?
        .ok_or_else(|| failure(label, "REF001", "transaction not found"))?;

    let mut rsp = success(label);
    rsp["transaction"] = serde_json::to_value(&target).unwrap_or_default();
    Ok(rsp)
}

fn batch_inquiry(store: &TerminalStore) -> Result<Value, Value> {
    let label = "BatchInquiry";
    let batch = store.open_batch().map_err(|e| sys_failure(label, e))?;
    let unsettled = store.unsettled().map_err(|e| sys_failure(label, e))?;
    let unsettled_cents: i64 = unsettled
        .iter()
        .map(|t| parse_cents(&t.amounts.total_amount).unwrap_or(0))
        .sum();

    let mut rsp = success(label);
    rsp["batch"] = json!({
        "batchId": batch.id,
        "openTime": batch.open_time,
        "transactionCount": batch.transactions.len(),
        "unsettledCount": unsettled.len(),
        "unsettledAmount": format_cents(unsettled_cents),
    });
    Ok(rsp)
}

fn transaction_list(store: &TerminalStore) -> Result<Value, Value> {
    let label = "TransactionList";
    let txns = store
        .open_batch_transactions()
        .map_err(|e| sys_failure(label, e))?;
    let entries: Vec<Value> = txns
        .iter()
        .map(|t| {
            json!({
                "tranNo": t.tran_no,
                "referenceNumber": t.reference_number,
                "type": t.tran_type,
                "status": t.status,
                "totalAmount": t.amounts.total_amount,
                "maskedPAN": t.masked_pan,
            })
        })
        .collect();

    let mut rsp = success(label);
    rsp["count"] = json!(entries.len());
    rsp["transactions"] = Value::Array(entries);
    Ok(rsp)
}
