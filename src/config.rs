//! Service configuration: dispatch semantics knobs plus the app surface
//! (listen address, logging, push delivery).
//!
//! Loaded from a single YAML file; every knob has a default so an empty
//! file is a valid configuration.

use std::time::Duration;

use serde::Deserialize;

/// Semantic knobs of the dispatch core. All intervals in milliseconds.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// How long a new order broadcasts before unfilled demand expires.
    #[serde(default = "default_broadcast_timeout_ms")]
    pub broadcast_timeout_ms: u64,
    /// Reservation window of a hold.
    #[serde(default = "default_hold_duration_ms")]
    pub hold_duration_ms: u64,
    /// Grace added on top of the hold duration for cache TTLs.
    #[serde(default = "default_hold_grace_ms")]
    pub hold_grace_ms: u64,
    /// Period of the reconciliation sweep over expired holds.
    #[serde(default = "default_hold_cleanup_interval_ms")]
    pub hold_cleanup_interval_ms: u64,
    /// Upper bound on a single hold's quantity.
    #[serde(default = "default_max_hold_quantity")]
    pub max_hold_quantity: u32,
    /// One non-terminal order per customer.
    #[serde(default = "default_true")]
    pub single_active_order: bool,
    /// Order creates allowed per customer per window.
    #[serde(default = "default_create_rate_limit")]
    pub create_rate_limit: u32,
    #[serde(default = "default_create_rate_window_ms")]
    pub create_rate_window_ms: u64,
    /// TTL of the per-customer create lock.
    #[serde(default = "default_create_lock_ttl_ms")]
    pub create_lock_ttl_ms: u64,
    /// Soft operation timeouts. A timed-out request leaves no partial state.
    #[serde(default = "default_create_order_timeout_ms")]
    pub create_order_timeout_ms: u64,
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
    #[serde(default = "default_hold_timeout_ms")]
    pub hold_timeout_ms: u64,
    /// Replay window for create-order idempotency keys.
    #[serde(default = "default_idempotency_ttl_ms")]
    pub idempotency_ttl_ms: u64,
    /// Read-through TTL of the (type, subtype) -> transporters index.
    #[serde(default = "default_match_index_ttl_ms")]
    pub match_index_ttl_ms: u64,
    /// Recipient groups below this size are delivered inline; larger
    /// groups go through the batched fan-out worker.
    #[serde(default = "default_inline_fanout_threshold")]
    pub inline_fanout_threshold: usize,
}

fn default_broadcast_timeout_ms() -> u64 {
    60_000
}
fn default_hold_duration_ms() -> u64 {
    15_000
}
fn default_hold_grace_ms() -> u64 {
    5_000
}
fn default_hold_cleanup_interval_ms() -> u64 {
    5_000
}
fn default_max_hold_quantity() -> u32 {
    50
}
fn default_true() -> bool {
    true
}
fn default_create_rate_limit() -> u32 {
    5
}
fn default_create_rate_window_ms() -> u64 {
    60_000
}
fn default_create_lock_ttl_ms() -> u64 {
    10_000
}
fn default_create_order_timeout_ms() -> u64 {
    15_000
}
fn default_confirm_timeout_ms() -> u64 {
    12_000
}
fn default_hold_timeout_ms() -> u64 {
    10_000
}
fn default_idempotency_ttl_ms() -> u64 {
    86_400_000
}
fn default_match_index_ttl_ms() -> u64 {
    300_000
}
fn default_inline_fanout_threshold() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            broadcast_timeout_ms: default_broadcast_timeout_ms(),
            hold_duration_ms: default_hold_duration_ms(),
            hold_grace_ms: default_hold_grace_ms(),
            hold_cleanup_interval_ms: default_hold_cleanup_interval_ms(),
            max_hold_quantity: default_max_hold_quantity(),
            single_active_order: default_true(),
            create_rate_limit: default_create_rate_limit(),
            create_rate_window_ms: default_create_rate_window_ms(),
            create_lock_ttl_ms: default_create_lock_ttl_ms(),
            create_order_timeout_ms: default_create_order_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
            hold_timeout_ms: default_hold_timeout_ms(),
            idempotency_ttl_ms: default_idempotency_ttl_ms(),
            match_index_ttl_ms: default_match_index_ttl_ms(),
            inline_fanout_threshold: default_inline_fanout_threshold(),
        }
    }
}

impl EngineConfig {
    #[inline]
    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    #[inline]
    pub fn hold_duration(&self) -> Duration {
        Duration::from_millis(self.hold_duration_ms)
    }

    /// Cache TTL for hold metadata: duration + grace.
    #[inline]
    pub fn hold_ttl(&self) -> Duration {
        Duration::from_millis(self.hold_duration_ms + self.hold_grace_ms)
    }

    #[inline]
    pub fn hold_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.hold_cleanup_interval_ms)
    }

    #[inline]
    pub fn create_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.create_lock_ttl_ms)
    }

    #[inline]
    pub fn create_rate_window(&self) -> Duration {
        Duration::from_millis(self.create_rate_window_ms)
    }

    #[inline]
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_millis(self.idempotency_ttl_ms)
    }

    #[inline]
    pub fn match_index_ttl(&self) -> Duration {
        Duration::from_millis(self.match_index_ttl_ms)
    }
}

/// Push delivery settings. Absent -> notifications are logged, not sent.
#[derive(Debug, Clone, Deserialize)]
pub struct FcmConfig {
    pub endpoint: String,
    pub server_key: String,
}

/// App-level (non-semantic) settings: server bind, logging, push.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// "hourly", "daily" or anything else for a single file.
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub use_json: bool,
    #[serde(default)]
    pub fcm: Option<FcmConfig>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_log_file() -> String {
    "haulnet.log".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log_dir: default_log_dir(),
            log_file: default_log_file(),
            rotation: default_rotation(),
            log_level: default_log_level(),
            use_json: false,
            fcm: None,
        }
    }
}

/// Root config file shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl ServiceConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.broadcast_timeout_ms, 60_000);
        assert_eq!(config.hold_duration_ms, 15_000);
        assert_eq!(config.hold_cleanup_interval_ms, 5_000);
        assert_eq!(config.max_hold_quantity, 50);
        assert!(config.single_active_order);
        assert_eq!(config.create_rate_limit, 5);
        assert_eq!(config.inline_fanout_threshold, 50);
    }

    #[test]
    fn test_hold_ttl_includes_grace() {
        let config = EngineConfig::default();
        assert_eq!(config.hold_ttl(), Duration::from_millis(20_000));
    }

    #[test]
    fn test_service_config_deserialize() {
        let yaml = r#"
app:
  listen_addr: "127.0.0.1:9090"
  log_level: "debug"
  use_json: true
engine:
  broadcast_timeout_ms: 30000
  hold_duration_ms: 10000
  max_hold_quantity: 10
  single_active_order: false
"#;
        let config: ServiceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.app.listen_addr, "127.0.0.1:9090");
        assert!(config.app.use_json);
        assert_eq!(config.engine.broadcast_timeout_ms, 30_000);
        assert_eq!(config.engine.max_hold_quantity, 10);
        assert!(!config.engine.single_active_order);
        // Unset knobs fall back to defaults.
        assert_eq!(config.engine.create_rate_limit, 5);
    }

    #[test]
    fn test_empty_yaml_is_valid() {
        let config: ServiceConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.engine.hold_duration_ms, 15_000);
        assert_eq!(config.app.listen_addr, "0.0.0.0:8080");
        assert!(config.app.fcm.is_none());
    }
}
