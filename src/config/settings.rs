use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

use super::defaults;

/// Top-level configuration for the Warden gateway.
/// Deserializes from a TOML configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "defaults::default_server_config")]
    pub server: ServerConfig,

    #[serde(default = "defaults::default_upstream_config")]
    pub upstream: UpstreamConfig,

    #[serde(default = "defaults::default_admin_api_config")]
    pub admin_api: AdminApiConfig,

    #[serde(default = "defaults::default_gate_config")]
    pub gate: GateConfig,

    #[serde(default = "defaults::default_geo_config")]
    pub geo: GeoConfig,

    #[serde(default = "defaults::default_detection_config")]
    pub detection: DetectionConfig,

    #[serde(default = "defaults::default_retention_config")]
    pub retention: RetentionConfig,

    #[serde(default = "defaults::default_logging_config")]
    pub logging: LoggingConfig,

    #[serde(default = "defaults::default_storage_config")]
    pub storage: StorageConfig,
}

impl Settings {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;
        let settings: Settings = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path))?;
        Ok(settings)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: defaults::default_server_config(),
            upstream: defaults::default_upstream_config(),
            admin_api: defaults::default_admin_api_config(),
            gate: defaults::default_gate_config(),
            geo: defaults::default_geo_config(),
            detection: defaults::default_detection_config(),
            retention: defaults::default_retention_config(),
            logging: defaults::default_logging_config(),
            storage: defaults::default_storage_config(),
        }
    }
}

/// Gateway listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "defaults::default_bind")]
    pub bind: String,
}

/// Upstream application configuration (the opaque downstream handler).
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "defaults::default_upstream_address")]
    pub address: String,

    #[serde(default = "defaults::default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminApiConfig {
    #[serde(default = "defaults::default_admin_bind")]
    pub bind: String,

    #[serde(default = "defaults::default_api_key")]
    pub api_key: String,
}

/// Request-gating configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// TTL for cached positive (blocked) verdicts. Allow verdicts are never
    /// cached; see the gate module.
    #[serde(default = "defaults::default_block_cache_ttl_secs")]
    pub block_cache_ttl_secs: u64,

    /// When true, a denylist store failure lets the request through instead
    /// of surfacing an error. Off by default: the gate fails closed.
    #[serde(default)]
    pub fail_open: bool,

    /// CIDR ranges whose forwarded headers are trusted for client-address
    /// resolution.
    #[serde(default)]
    pub trusted_proxies: Vec<String>,

    /// Header resolution order for proxied requests.
    #[serde(default = "defaults::default_proxy_headers")]
    pub proxy_headers: Vec<String>,
}

/// Geolocation resolution configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoConfig {
    #[serde(default = "defaults::default_geo_base_url")]
    pub provider_base_url: String,

    #[serde(default = "defaults::default_geo_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "defaults::default_geo_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

/// Anomaly-detection thresholds and cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    /// Trailing window the rules aggregate over.
    #[serde(default = "defaults::default_detection_window_secs")]
    pub window_secs: u64,

    /// In-process scheduler cadence.
    #[serde(default = "defaults::default_detection_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "defaults::default_volume_threshold")]
    pub volume_threshold: i64,

    #[serde(default = "defaults::default_sensitive_paths")]
    pub sensitive_paths: Vec<String>,

    #[serde(default = "defaults::default_sensitive_path_threshold")]
    pub sensitive_path_threshold: i64,

    #[serde(default = "defaults::default_breadth_threshold")]
    pub breadth_threshold: i64,
}

/// Retention sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "defaults::default_retention_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "defaults::default_request_log_days")]
    pub request_log_days: i64,

    #[serde(default = "defaults::default_resolved_finding_days")]
    pub resolved_finding_days: i64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::default_log_level")]
    pub level: String,

    #[serde(default = "defaults::default_log_file")]
    pub file: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "defaults::default_sqlite_path")]
    pub sqlite_path: String,
}
