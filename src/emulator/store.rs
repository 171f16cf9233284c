//! Terminal state core.
//!
//! Transactions, batches, ID counters, lifecycle transitions, and
//! settlement. All mutations pass through a single critical section; every
//! mutation hands a serialized snapshot to the persistence writer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, warn};
use uuid::Uuid;

use crate::amounts::{format_cents, parse_cents};

/// Reference numbers start at 2·10¹¹ so they are always 12 digits.
pub const REF_NO_BASE: u64 = 200_000_000_000;

// ---------------------------------------------------------------------------
// Transaction model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TranType {
    Sale,
    PreAuth,
    Capture,
    Void,
    Refund,
    TipAdjust,
    Reversal,
    BatchClose,
    ForceSale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TranStatus {
    Pending,
    Approved,
    Declined,
    Voided,
    Settled,
    Refunded,
    PartialVoided,
    TipAdjusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CardAcquisition {
    Insert,
    Swipe,
    Manual,
    Tap,
}

/// All money fields are decimal strings with two fractional digits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Amounts {
    pub base_amount: String,
    pub tip_amount: String,
    pub tax_amount: String,
    pub cashback_amount: String,
    pub total_amount: String,
    pub authorized_amount: String,
}

impl Default for Amounts {
    fn default() -> Self {
        let zero = || "0.00".to_string();
        Self {
            base_amount: zero(),
            tip_amount: zero(),
            tax_amount: zero(),
            cashback_amount: zero(),
            total_amount: zero(),
            authorized_amount: zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub tran_no: String,
    pub reference_number: String,
    pub response_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_code: Option<String>,
    #[serde(rename = "type")]
    pub tran_type: TranType,
    pub status: TranStatus,
    pub amounts: Amounts,
    pub card_acquisition: CardAcquisition,
    pub card_type: String,
    #[serde(rename = "maskedPAN")]
    pub masked_pan: String,
    pub batch_id: String,
    pub created_at: String,
    pub updated_at: String,
    /// Back-reference (by internal id) for Void/Refund/TipAdjust records.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_transaction: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: String,
    pub open_time: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
    pub is_open: bool,
    pub transactions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settlement_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_amount: Option<String>,
}

impl Default for Batch {
    fn default() -> Self {
        Self {
            id: String::new(),
            open_time: String::new(),
            close_time: None,
            is_open: false,
            transactions: Vec::new(),
            settlement_count: None,
            total_amount: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Counters {
    pub next_tran_no: u64,
    pub next_batch_no: u64,
    pub next_ref_no: u64,
}

impl Default for Counters {
    fn default() -> Self {
        Self {
            next_tran_no: 1,
            next_batch_no: 1,
            next_ref_no: REF_NO_BASE,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatBucket {
    pub total_count: u64,
    pub approved_count: u64,
    pub declined_count: u64,
    pub void_count: u64,
    pub refund_count: u64,
    pub approved_amount: String,
}

impl Default for StatBucket {
    fn default() -> Self {
        Self {
            total_count: 0,
            approved_count: 0,
            declined_count: 0,
            void_count: 0,
            refund_count: 0,
            approved_amount: "0.00".to_string(),
        }
    }
}

impl StatBucket {
    fn add_approved_amount(&mut self, cents: i64) {
        let current = parse_cents(&self.approved_amount).unwrap_or(0);
        self.approved_amount = format_cents(current + cents);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Statistics {
    pub global: StatBucket,
    pub daily: BTreeMap<String, StatBucket>,
}

/// The persisted document: everything the emulator remembers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TerminalState {
    pub transactions: Vec<Transaction>,
    pub batches: Vec<Batch>,
    pub counters: Counters,
    pub current_batch: Batch,
    pub statistics: Statistics,
}

/// One atomic ID allocation: everything a new transaction needs.
#[derive(Debug, Clone)]
pub struct NewIds {
    pub tran_no: String,
    pub reference_number: String,
    pub response_id: u64,
    pub approval_code: String,
}

/// Result of closing a batch.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub batch_id: String,
    pub sales_count: u64,
    pub refunds_count: u64,
    pub sales_amount: String,
    pub refunds_amount: String,
    pub net_amount: String,
    pub settlement_count: u64,
}

// ---------------------------------------------------------------------------
// Sale decision rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaleDecision {
    Approved,
    Partial {
        authorized_cents: i64,
        balance_due_cents: i64,
    },
    Declined {
        reason: &'static str,
    },
}

/// Deterministic host decision for a sale-like authorization.
pub fn decide_sale(total_cents: i64, pan: &str) -> SaleDecision {
    if total_cents >= 50_000 {
        return SaleDecision::Declined {
            reason: "AMOUNT TOO HIGH",
        };
    }
    if pan.ends_with("0001") {
        return SaleDecision::Declined {
            reason: "CARD DECLINED",
        };
    }
    if (15_500..20_000).contains(&total_cents) {
        return SaleDecision::Partial {
            authorized_cents: 10_000,
            balance_due_cents: total_cents - 10_000,
        };
    }
    SaleDecision::Approved
}

// ---------------------------------------------------------------------------
// Referential validation
// ---------------------------------------------------------------------------

/// Legal parents for an `originalTransaction` back-reference: a Sale, a
/// PreAuth hold, or a TipAdjust record. Every other type (Void, Refund,
/// Capture, ForceSale, Reversal, BatchClose) cannot be referenced again.
fn is_referenceable(t: &Transaction) -> bool {
    matches!(
        t.tran_type,
        TranType::Sale | TranType::PreAuth | TranType::TipAdjust
    )
}

/// Check that a transaction can be voided. Returns `(errorCode, message)`
/// on rejection.
pub fn validate_void(target: Option<&Transaction>) -> Result<&Transaction, (&'static str, String)> {
    let t = target.ok_or(("REF001", "original transaction not found".to_string()))?;
    if !is_referenceable(t) {
        return Err(("VOID003", format!("{:?} transactions cannot be voided", t.tran_type)));
    }
    match t.status {
        TranStatus::Voided => Err(("VOID001", "transaction already voided".to_string())),
        TranStatus::Settled => Err(("VOID002", "transaction already settled".to_string())),
        TranStatus::Approved | TranStatus::TipAdjusted => Ok(t),
        other => Err(("VOID003", format!("transaction not voidable in status {other:?}"))),
    }
}

/// Check a referenced refund. Returns `(errorCode, message)` on rejection.
pub fn validate_refund(
    target: Option<&Transaction>,
    refund_cents: i64,
) -> Result<&Transaction, (&'static str, String)> {
    let t = target.ok_or(("REF002", "original transaction not found".to_string()))?;
    if !is_referenceable(t) {
        return Err(("TRAN009", format!("{:?} transactions cannot be refunded", t.tran_type)));
    }
    let original = parse_cents(&t.amounts.total_amount).unwrap_or(0);
    if refund_cents > original {
        return Err((
            "AMT003",
            format!(
                "refund amount {} exceeds original total {}",
                format_cents(refund_cents),
                t.amounts.total_amount
            ),
        ));
    }
    Ok(t)
}

/// Check that a transaction can be tip-adjusted.
pub fn validate_tip_adjust(
    target: Option<&Transaction>,
) -> Result<&Transaction, (&'static str, String)> {
    let t = target.ok_or(("REF001", "original transaction not found".to_string()))?;
    if !is_referenceable(t) {
        return Err(("TRAN009", format!("{:?} transactions cannot be adjusted", t.tran_type)));
    }
    match t.status {
        TranStatus::Approved | TranStatus::TipAdjusted => Ok(t),
        other => Err(("TRAN009", format!("transaction not adjustable in status {other:?}"))),
    }
}

// ---------------------------------------------------------------------------
// State bootstrap
// ---------------------------------------------------------------------------

fn open_new_batch(state: &mut TerminalState) {
    let batch_no = state.counters.next_batch_no;
    state.counters.next_batch_no += 1;
    state.current_batch = Batch {
        id: format!("B{batch_no:04}"),
        open_time: Utc::now().to_rfc3339(),
        is_open: true,
        ..Batch::default()
    };
    info!("opened batch {}", state.current_batch.id);
}

fn batch_number(id: &str) -> Option<u64> {
    id.strip_prefix('B').and_then(|n| n.parse().ok())
}

/// Reconstruct counters from existing data and make sure a batch is open.
/// Called once on every load, so a truncated or hand-edited data file still
/// comes up consistent.
pub fn ensure_ready(state: &mut TerminalState) {
    let max_tran = state
        .transactions
        .iter()
        .filter_map(|t| t.tran_no.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    state.counters.next_tran_no = state.counters.next_tran_no.max(max_tran + 1);

    let max_ref = state
        .transactions
        .iter()
        .filter_map(|t| t.reference_number.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    state.counters.next_ref_no = state
        .counters
        .next_ref_no
        .max(max_ref + 1)
        .max(REF_NO_BASE);

    let max_batch = state
        .batches
        .iter()
        .map(|b| b.id.as_str())
        .chain(std::iter::once(state.current_batch.id.as_str()))
        .filter_map(batch_number)
        .max()
        .unwrap_or(0);
    state.counters.next_batch_no = state.counters.next_batch_no.max(max_batch + 1);

    if !state.current_batch.is_open {
        open_new_batch(state);
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Process-wide mutable emulator state. Shared across connections; every
/// mutation runs inside the lock and queues a snapshot for the writer task.
pub struct TerminalStore {
    state: Mutex<TerminalState>,
    snapshots: Option<UnboundedSender<String>>,
}

impl TerminalStore {
    pub fn new(mut state: TerminalState, snapshots: Option<UnboundedSender<String>>) -> Self {
        ensure_ready(&mut state);
        Self {
            state: Mutex::new(state),
            snapshots,
        }
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut TerminalState) -> T) -> Result<T, String> {
        let mut state = self.state.lock().map_err(|e| e.to_string())?;
        let out = f(&mut state);
        if let Some(tx) = &self.snapshots {
            match serde_json::to_string_pretty(&*state) {
                Ok(snapshot) => {
                    let _ = tx.send(snapshot);
                }
                Err(e) => warn!("failed to serialize state snapshot: {e}"),
            }
        }
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&TerminalState) -> T) -> Result<T, String> {
        let state = self.state.lock().map_err(|e| e.to_string())?;
        Ok(f(&state))
    }

    /// Serialize the whole document (shutdown flush and the periodic timer).
    pub fn snapshot_json(&self) -> Result<String, String> {
        self.read(|s| serde_json::to_string_pretty(s).map_err(|e| e.to_string()))?
    }

    /// Atomically allocate the full ID set for a new transaction.
    pub fn new_ids(&self) -> Result<NewIds, String> {
        self.mutate(|state| {
            let tran_no = state.counters.next_tran_no;
            state.counters.next_tran_no += 1;
            let ref_no = state.counters.next_ref_no;
            state.counters.next_ref_no += 1;
            let response_id = ref_no - REF_NO_BASE + 1_000;
            NewIds {
                tran_no: format!("{tran_no:06}"),
                reference_number: format!("{ref_no:012}"),
                response_id,
                approval_code: format!("{:06}", response_id % 1_000_000),
            }
        })
    }

    /// Insert a transaction: assign its internal id, bind it to the open
    /// batch, timestamp it, and update statistics.
    pub fn add_transaction(&self, mut t: Transaction) -> Result<Transaction, String> {
        self.mutate(|state| {
            let now = Utc::now();
            t.id = Uuid::new_v4().to_string();
            t.batch_id = state.current_batch.id.clone();
            t.created_at = now.to_rfc3339();
            t.updated_at = t.created_at.clone();
            state.current_batch.transactions.push(t.id.clone());

            let day = now.format("%Y-%m-%d").to_string();
            let approved_cents = match (t.status, t.tran_type) {
                (TranStatus::Approved, TranType::Sale | TranType::Capture | TranType::ForceSale) => {
                    parse_cents(&t.amounts.total_amount).unwrap_or(0)
                }
                _ => 0,
            };
            for bucket in [
                &mut state.statistics.global,
                state.statistics.daily.entry(day).or_default(),
            ] {
                bucket.total_count += 1;
                match t.status {
                    TranStatus::Approved => bucket.approved_count += 1,
                    TranStatus::Declined => bucket.declined_count += 1,
                    _ => {}
                }
                match t.tran_type {
                    TranType::Void => bucket.void_count += 1,
                    TranType::Refund => bucket.refund_count += 1,
                    _ => {}
                }
                if approved_cents != 0 {
                    bucket.add_approved_amount(approved_cents);
                }
            }

            state.transactions.push(t.clone());
            t
        })
    }

    /// Look up by `id | tranNo | referenceNumber | responseId`, first match
    /// in that precedence order.
    pub fn find(&self, identifier: &str) -> Result<Option<Transaction>, String> {
        self.read(|state| lookup(state, identifier).cloned())
    }

    /// Apply a patch to the transaction matching `identifier` (same
    /// precedence as [`TerminalStore::find`]) and bump `updatedAt`.
    pub fn update(
        &self,
        identifier: &str,
        patch: impl FnOnce(&mut Transaction),
    ) -> Result<Option<Transaction>, String> {
        self.mutate(|state| {
            let slot = lookup_index(state, identifier)?;
            let t = &mut state.transactions[slot];
            patch(t);
            t.updated_at = Utc::now().to_rfc3339();
            Some(t.clone())
        })
    }

    /// An approved sale in the open batch with the same card and total.
    /// Backs the host's duplicate decline; `allowDuplicate` and ForceSale
    /// skip the check, and a batch close clears the window.
    pub fn duplicate_of(
        &self,
        total_cents: i64,
        masked_pan: &str,
    ) -> Result<Option<Transaction>, String> {
        self.read(|state| {
            state
                .transactions
                .iter()
                .find(|t| {
                    t.batch_id == state.current_batch.id
                        && matches!(t.tran_type, TranType::Sale | TranType::ForceSale)
                        && matches!(t.status, TranStatus::Approved | TranStatus::TipAdjusted)
                        && t.masked_pan == masked_pan
                        && parse_cents(&t.amounts.total_amount) == Some(total_cents)
                })
                .cloned()
        })
    }

    /// Settleable transactions of the open batch.
    pub fn unsettled(&self) -> Result<Vec<Transaction>, String> {
        self.read(|state| {
            state
                .transactions
                .iter()
                .filter(|t| t.batch_id == state.current_batch.id && is_settleable(t))
                .cloned()
                .collect()
        })
    }

    /// Settle the open batch: flip every settleable transaction to SETTLED,
    /// close the batch, and open the next one.
    pub fn close_batch(&self) -> Result<BatchSummary, String> {
        self.mutate(|state| {
            let batch_id = state.current_batch.id.clone();
            let now = Utc::now().to_rfc3339();

            let mut sales_count = 0u64;
            let mut refunds_count = 0u64;
            let mut sales_cents = 0i64;
            let mut refunds_cents = 0i64;
            let mut settled = 0u64;

            for t in state
                .transactions
                .iter_mut()
                .filter(|t| t.batch_id == batch_id)
            {
                if !is_settleable(t) {
                    continue;
                }
                let total = parse_cents(&t.amounts.total_amount).unwrap_or(0);
                if t.tran_type == TranType::Refund {
                    refunds_count += 1;
                    refunds_cents += total;
                } else {
                    sales_count += 1;
                    sales_cents += total;
                }
                t.status = TranStatus::Settled;
                t.updated_at = now.clone();
                settled += 1;
            }

            let net = sales_cents - refunds_cents;
            state.current_batch.close_time = Some(now);
            state.current_batch.is_open = false;
            state.current_batch.settlement_count = Some(settled);
            state.current_batch.total_amount = Some(format_cents(net));
            let closed = std::mem::take(&mut state.current_batch);
            state.batches.push(closed);
            open_new_batch(state);

            info!("batch {batch_id} closed: {settled} settled, net {}", format_cents(net));
            BatchSummary {
                batch_id,
                sales_count,
                refunds_count,
                sales_amount: format_cents(sales_cents),
                refunds_amount: format_cents(refunds_cents),
                net_amount: format_cents(net),
                settlement_count: settled,
            }
        })
    }

    /// Open-batch view for BatchInquiry.
    pub fn open_batch(&self) -> Result<Batch, String> {
        self.read(|state| state.current_batch.clone())
    }

    /// Transactions of the open batch, newest first (TransactionList).
    pub fn open_batch_transactions(&self) -> Result<Vec<Transaction>, String> {
        self.read(|state| {
            let mut txns: Vec<Transaction> = state
                .transactions
                .iter()
                .filter(|t| t.batch_id == state.current_batch.id)
                .cloned()
                .collect();
            txns.reverse();
            txns
        })
    }
}

/// Funds move at settlement only through approved sale-like captures and
/// refunds. PreAuth holds and audit records (Void, TipAdjust, Reversal)
/// never settle themselves.
fn is_settleable(t: &Transaction) -> bool {
    matches!(t.status, TranStatus::Approved | TranStatus::TipAdjusted)
        && matches!(
            t.tran_type,
            TranType::Sale | TranType::Capture | TranType::ForceSale | TranType::Refund
        )
}

fn lookup<'a>(state: &'a TerminalState, identifier: &str) -> Option<&'a Transaction> {
    let id = identifier.trim();
    state
        .transactions
        .iter()
        .find(|t| t.id == id)
        .or_else(|| {
            let padded = id.parse::<u64>().ok().map(|n| format!("{n:06}"));
            state
                .transactions
                .iter()
                .find(|t| t.tran_no == id || Some(&t.tran_no) == padded.as_ref())
        })
        .or_else(|| state.transactions.iter().find(|t| t.reference_number == id))
        .or_else(|| {
            let numeric: u64 = id.parse().ok()?;
            state.transactions.iter().find(|t| t.response_id == numeric)
        })
}

fn lookup_index(state: &TerminalState, identifier: &str) -> Option<usize> {
    let target = lookup(state, identifier)?.id.clone();
    state.transactions.iter().position(|t| t.id == target)
}
