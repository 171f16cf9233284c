//! Request body shaping.
//!
//! POS front-ends send either a flat body or one nested under the command
//! name (`{sale: {...}}`). The merge rule is explicit: start from the
//! top-level object, overlay the nested section, nested fields override.
//! Amount fields may live at the merged root or under `transaction`.

use serde_json::{json, Value};

use crate::amounts;
use crate::config::BridgeConfig;
use crate::{value_str, value_u64};

/// Merge a body with its nested command section (nested overrides).
pub fn merged_body(body: &Value, key: &str) -> Value {
    let mut base = match body {
        Value::Object(map) => {
            let mut flat = map.clone();
            flat.remove(key);
            Value::Object(flat)
        }
        _ => json!({}),
    };
    if let (Some(Value::Object(nested)), Value::Object(out)) = (body.get(key), &mut base) {
        for (k, v) in nested {
            out.insert(k.clone(), v.clone());
        }
    }
    base
}

/// Where a session should go: nested body → top-level body → process
/// defaults (the merge already collapsed the first two).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub ip: String,
    pub port: u16,
    pub ecr_id: String,
}

pub fn resolve_target(merged: &Value, cfg: &BridgeConfig) -> Target {
    Target {
        ip: value_str(merged, &["ip", "terminalIp"]).unwrap_or_else(|| cfg.terminal_ip.clone()),
        port: value_u64(merged, &["port", "terminalPort"])
            .map(|p| p as u16)
            .unwrap_or(cfg.terminal_port),
        ecr_id: value_str(merged, &["ecrId", "EcrId"]).unwrap_or_else(|| cfg.ecr_id.clone()),
    }
}

/// Look up a request field at the merged root or under `transaction`
/// (the more specific location wins).
pub fn field<'a>(merged: &'a Value, key: &str) -> Option<&'a Value> {
    merged
        .pointer(&format!("/transaction/{key}"))
        .filter(|v| !v.is_null())
        .or_else(|| merged.get(key).filter(|v| !v.is_null()))
}

/// A transaction identifier may arrive as a string or a bare number.
pub fn identifier(merged: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        match field(merged, key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

/// Normalize the first present amount among `keys` to the canonical
/// two-digit decimal string. `Ok(None)` when absent, `Err` when present but
/// not a number.
pub fn normalized_amount(merged: &Value, keys: &[&str]) -> Result<Option<String>, String> {
    for key in keys {
        if let Some(raw) = field(merged, key) {
            return match amounts::normalize(raw) {
                Some(normalized) => Ok(Some(normalized)),
                None => Err(format!("Invalid amount field {key}")),
            };
        }
    }
    Ok(None)
}

/// Like [`normalized_amount`] but the field is mandatory.
pub fn required_amount(merged: &Value, keys: &[&str]) -> Result<String, String> {
    normalized_amount(merged, keys)?
        .ok_or_else(|| format!("Missing required field {}", keys[0]))
}
