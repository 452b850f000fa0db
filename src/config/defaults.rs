use super::settings::{
    AdminApiConfig, DetectionConfig, GateConfig, GeoConfig, LoggingConfig, RetentionConfig,
    ServerConfig, StorageConfig, UpstreamConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

pub fn default_upstream_config() -> UpstreamConfig {
    UpstreamConfig {
        address: default_upstream_address(),
        response_timeout_ms: default_response_timeout_ms(),
    }
}

pub fn default_admin_api_config() -> AdminApiConfig {
    AdminApiConfig {
        bind: default_admin_bind(),
        api_key: default_api_key(),
    }
}

pub fn default_gate_config() -> GateConfig {
    GateConfig {
        block_cache_ttl_secs: default_block_cache_ttl_secs(),
        fail_open: false,
        trusted_proxies: Vec::new(),
        proxy_headers: default_proxy_headers(),
    }
}

pub fn default_geo_config() -> GeoConfig {
    GeoConfig {
        provider_base_url: default_geo_base_url(),
        timeout_secs: default_geo_timeout_secs(),
        cache_ttl_secs: default_geo_cache_ttl_secs(),
    }
}

pub fn default_detection_config() -> DetectionConfig {
    DetectionConfig {
        window_secs: default_detection_window_secs(),
        interval_secs: default_detection_interval_secs(),
        volume_threshold: default_volume_threshold(),
        sensitive_paths: default_sensitive_paths(),
        sensitive_path_threshold: default_sensitive_path_threshold(),
        breadth_threshold: default_breadth_threshold(),
    }
}

pub fn default_retention_config() -> RetentionConfig {
    RetentionConfig {
        interval_secs: default_retention_interval_secs(),
        request_log_days: default_request_log_days(),
        resolved_finding_days: default_resolved_finding_days(),
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        sqlite_path: default_sqlite_path(),
    }
}

// ---------------------------------------------------------------------------
// Field defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

pub fn default_upstream_address() -> String {
    "127.0.0.1:3000".to_string()
}

pub fn default_response_timeout_ms() -> u64 {
    60_000
}

pub fn default_admin_bind() -> String {
    "127.0.0.1:9090".to_string()
}

pub fn default_api_key() -> String {
    "change-me".to_string()
}

pub fn default_block_cache_ttl_secs() -> u64 {
    300
}

pub fn default_proxy_headers() -> Vec<String> {
    vec!["x-forwarded-for".to_string(), "x-real-ip".to_string()]
}

pub fn default_geo_base_url() -> String {
    "https://ipapi.co".to_string()
}

pub fn default_geo_timeout_secs() -> u64 {
    5
}

pub fn default_geo_cache_ttl_secs() -> u64 {
    86_400
}

pub fn default_detection_window_secs() -> u64 {
    3_600
}

pub fn default_detection_interval_secs() -> u64 {
    3_600
}

pub fn default_volume_threshold() -> i64 {
    100
}

pub fn default_sensitive_paths() -> Vec<String> {
    vec![
        "/admin/".to_string(),
        "/login/".to_string(),
        "/api/admin/".to_string(),
    ]
}

pub fn default_sensitive_path_threshold() -> i64 {
    10
}

pub fn default_breadth_threshold() -> i64 {
    20
}

pub fn default_retention_interval_secs() -> u64 {
    86_400
}

pub fn default_request_log_days() -> i64 {
    30
}

pub fn default_resolved_finding_days() -> i64 {
    7
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_log_file() -> String {
    "/var/lib/warden/logs/warden.log".to_string()
}

pub fn default_sqlite_path() -> String {
    "/var/lib/warden/warden.db".to_string()
}
