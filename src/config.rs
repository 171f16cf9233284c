//! Process configuration.
//!
//! Read once from the environment at startup; every terminal-related field
//! can be overridden per request, and `POST /config` patches the process
//! defaults at runtime.

use serde::Serialize;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::warn;

use crate::protocol::Timeouts;
use crate::{value_str, value_u64};

pub const DEFAULT_TERMINAL_IP: &str = "127.0.0.1";
pub const DEFAULT_TERMINAL_PORT: u16 = 5015;
pub const DEFAULT_ECR_ID: &str = "1";
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 180_000;
pub const DEFAULT_IDLE_BYTE_TIMEOUT_MS: u64 = 25_000;
pub const DEFAULT_AGENT_HTTP_PORT: u16 = 3_000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    pub terminal_ip: String,
    pub terminal_port: u16,
    pub terminal_port_alt: Option<u16>,
    pub ecr_id: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub idle_byte_timeout_ms: u64,
    pub agent_http_port: u16,
    pub emulator_data_dir: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            terminal_ip: DEFAULT_TERMINAL_IP.to_string(),
            terminal_port: DEFAULT_TERMINAL_PORT,
            terminal_port_alt: None,
            ecr_id: DEFAULT_ECR_ID.to_string(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            idle_byte_timeout_ms: DEFAULT_IDLE_BYTE_TIMEOUT_MS,
            agent_http_port: DEFAULT_AGENT_HTTP_PORT,
            emulator_data_dir: ".".to_string(),
        }
    }
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring unparseable {name}={trimmed}");
            None
        }
    }
}

impl BridgeConfig {
    /// Build the process config from the environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(ip) = env::var("TERMINAL_IP") {
            if !ip.trim().is_empty() {
                cfg.terminal_ip = ip.trim().to_string();
            }
        }
        if let Some(port) = env_parsed("TERMINAL_PORT") {
            cfg.terminal_port = port;
        }
        cfg.terminal_port_alt = env_parsed("TERMINAL_PORT_ALT");
        if let Ok(ecr) = env::var("ECR_ID") {
            if !ecr.trim().is_empty() {
                cfg.ecr_id = ecr.trim().to_string();
            }
        }
        if let Some(ms) = env_parsed("CONNECT_TIMEOUT_MS") {
            cfg.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parsed("READ_TIMEOUT_MS") {
            cfg.read_timeout_ms = ms;
        }
        if let Some(ms) = env_parsed("IDLE_BYTE_TIMEOUT_MS") {
            cfg.idle_byte_timeout_ms = ms;
        }
        if let Some(port) = env_parsed("AGENT_HTTP_PORT") {
            cfg.agent_http_port = port;
        }
        if let Ok(dir) = env::var("EMULATOR_DATA_DIR") {
            if !dir.trim().is_empty() {
                cfg.emulator_data_dir = dir.trim().to_string();
            }
        }
        cfg
    }

    /// Session timeouts derived from the configured millisecond values.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            overall: Duration::from_millis(self.read_timeout_ms),
            idle: Duration::from_millis(self.idle_byte_timeout_ms),
        }
    }

    /// Merge a partial runtime override (`POST /config`).
    pub fn apply_override(&mut self, patch: &Value) {
        if let Some(ip) = value_str(patch, &["ip", "terminalIp"]) {
            self.terminal_ip = ip;
        }
        if let Some(port) = value_u64(patch, &["port", "terminalPort"]) {
            self.terminal_port = port as u16;
        }
        if let Some(port) = value_u64(patch, &["portAlt", "terminalPortAlt"]) {
            self.terminal_port_alt = Some(port as u16);
        }
        if let Some(ecr) = value_str(patch, &["ecrId"]) {
            self.ecr_id = ecr;
        }
        if let Some(ms) = value_u64(patch, &["connectTimeoutMs"]) {
            self.connect_timeout_ms = ms;
        }
        if let Some(ms) = value_u64(patch, &["readTimeoutMs"]) {
            self.read_timeout_ms = ms;
        }
        if let Some(ms) = value_u64(patch, &["idleByteTimeoutMs"]) {
            self.idle_byte_timeout_ms = ms;
        }
    }

    /// Config dump for `/health`.
    pub fn dump(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.terminal_port, DEFAULT_TERMINAL_PORT);
        assert_eq!(cfg.connect_timeout_ms, 5_000);
        assert_eq!(cfg.read_timeout_ms, 180_000);
        assert_eq!(cfg.idle_byte_timeout_ms, 25_000);
        assert_eq!(cfg.agent_http_port, 3_000);
    }

    #[test]
    fn test_apply_override_merges_partial_patch() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_override(&json!({"ip": "10.0.0.9", "port": 6000, "ecrId": "77"}));
        assert_eq!(cfg.terminal_ip, "10.0.0.9");
        assert_eq!(cfg.terminal_port, 6000);
        assert_eq!(cfg.ecr_id, "77");
        // Untouched fields keep defaults
        assert_eq!(cfg.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }

    #[test]
    fn test_timeouts_conversion() {
        let mut cfg = BridgeConfig::default();
        cfg.apply_override(&json!({"connectTimeoutMs": 100, "readTimeoutMs": 200, "idleByteTimeoutMs": 50}));
        let t = cfg.timeouts();
        assert_eq!(t.connect, Duration::from_millis(100));
        assert_eq!(t.overall, Duration::from_millis(200));
        assert_eq!(t.idle, Duration::from_millis(50));
    }

    #[test]
    fn test_dump_is_camel_case() {
        let dump = BridgeConfig::default().dump();
        assert!(dump.get("terminalIp").is_some());
        assert!(dump.get("agentHttpPort").is_some());
    }
}
