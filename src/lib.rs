//! verifone-bridge — POS integration agent and terminal emulator.
//!
//! Bridges a point-of-sale front-end (HTTP/JSON) to a payment terminal
//! speaking a framed, asynchronous JSON protocol over plain TCP. Ships both
//! sides: the `gateway` (agent) that drives a real terminal, and the
//! `emulator` that mirrors an acquirer's transaction/batch semantics for
//! testing.

pub mod amounts;
pub mod config;
pub mod emulator;
pub mod gateway;
pub mod protocol;

use serde_json::Value;

/// Look up the first non-empty string value among `keys`.
pub fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// Look up the first value among `keys` that parses as u64 (accepts both
/// JSON numbers and numeric strings).
pub fn value_u64(v: &Value, keys: &[&str]) -> Option<u64> {
    for key in keys {
        match v.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(u) = n.as_u64() {
                    return Some(u);
                }
            }
            Some(Value::String(s)) => {
                if let Ok(u) = s.trim().parse::<u64>() {
                    return Some(u);
                }
            }
            _ => {}
        }
    }
    None
}

/// Normalize a 0|1 / bool / "yes"/"no" style flag the way POS payloads
/// mix them.
pub fn value_flag(v: &Value, keys: &[&str]) -> Option<bool> {
    for key in keys {
        let flag = match v.get(*key) {
            Some(Value::Bool(b)) => Some(*b),
            Some(Value::Number(n)) => n.as_i64().map(|i| i == 1),
            Some(Value::String(s)) => {
                let lower = s.trim().to_ascii_lowercase();
                match lower.as_str() {
                    "true" | "1" | "yes" | "on" => Some(true),
                    "false" | "0" | "no" | "off" => Some(false),
                    _ => None,
                }
            }
            _ => None,
        };
        if flag.is_some() {
            return flag;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_str_falls_through_keys() {
        let v = json!({"tranNo": "", "referenceNumber": "200000000001"});
        assert_eq!(
            value_str(&v, &["tranNo", "referenceNumber"]),
            Some("200000000001".to_string())
        );
    }

    #[test]
    fn test_value_u64_accepts_numeric_strings() {
        let v = json!({"port": "5015"});
        assert_eq!(value_u64(&v, &["port"]), Some(5015));
        let v = json!({"port": 5015});
        assert_eq!(value_u64(&v, &["port"]), Some(5015));
    }

    #[test]
    fn test_value_flag_variants() {
        assert_eq!(value_flag(&json!({"a": 1}), &["a"]), Some(true));
        assert_eq!(value_flag(&json!({"a": "0"}), &["a"]), Some(false));
        assert_eq!(value_flag(&json!({"a": true}), &["a"]), Some(true));
        assert_eq!(value_flag(&json!({"a": "maybe"}), &["a"]), None);
    }

}
