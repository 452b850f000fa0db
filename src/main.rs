mod admin_api;
mod config;
mod gate;
mod geo;
mod jobs;
mod models;
mod server;
mod storage;

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::admin_api::routes::AppState;
use crate::admin_api::server::AdminApiServer;
use crate::config::settings::Settings;
use crate::gate::cache::BlockListCache;
use crate::gate::request_gate::RequestGate;
use crate::gate::recorder::RequestRecorder;
use crate::geo::lookup::GeoResolver;
use crate::geo::provider::HttpGeoProvider;
use crate::jobs::detector::AnomalyDetector;
use crate::jobs::retention::RetentionSweeper;
use crate::jobs::runner::{self, JobRunner};
use crate::server::http::Gateway;
use crate::storage::sqlite::SqliteStore;
use crate::storage::GovernanceStore;

struct CliArgs {
    config_path: String,
    /// `block-address <ADDR> [--reason <TEXT>]` operator command.
    block_address: Option<(String, Option<String>)>,
}

/// Parse the CLI. Defaults to `/etc/warden/warden.toml` for `--config`.
fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = String::from("/etc/warden/warden.toml");
    let mut address: Option<String> = None;
    let mut reason: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    config_path = path.clone();
                }
                i += 2;
            }
            "--reason" => {
                if let Some(text) = args.get(i + 1) {
                    reason = Some(text.clone());
                }
                i += 2;
            }
            "block-address" => {
                if let Some(addr) = args.get(i + 1) {
                    address = Some(addr.clone());
                }
                i += 2;
            }
            _ => {
                i += 1;
            }
        }
    }

    CliArgs {
        config_path,
        block_address: address.map(|a| (a, reason)),
    }
}

/// Initialise the `tracing` subscriber with both stdout and file output.
fn init_tracing(log_file_path: &str, level: &str) {
    let log_dir = std::path::Path::new(log_file_path)
        .parent()
        .and_then(|p| p.to_str())
        .unwrap_or(".");
    let _ = std::fs::create_dir_all(log_dir);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)
        .expect("Failed to open log file");

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warden=debug", level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
}

/// The `block-address` operator command: add a denylist entry and exit.
/// Idempotent — an already-present address is reported, not an error.
fn run_block_command(settings: &Settings, address: &str, reason: Option<&str>) -> anyhow::Result<()> {
    let parsed: IpAddr = address
        .trim()
        .parse()
        .with_context(|| format!("'{}' is not a valid IP address", address))?;

    let store = SqliteStore::new(&settings.storage.sqlite_path)
        .context("Failed to open the warden database")?;

    let created = store.add_blocked_address(&parsed.to_string(), reason)?;
    if created {
        println!("Blocked {}", parsed);
        if let Some(text) = reason {
            println!("Reason: {}", text);
        }
    } else {
        println!("{} is already blocked", parsed);
    }
    Ok(())
}

/// Background task that evicts expired entries from both caches.
async fn cleanup_loop(block_cache: Arc<BlockListCache>, geo: Arc<GeoResolver>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        block_cache.cleanup();
        geo.cleanup();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ---------------------------------------------------------------
    // 1. Configuration
    // ---------------------------------------------------------------
    let args = parse_args();
    let settings = Settings::load(&args.config_path)?;

    // Operator command mode: no servers, no schedulers.
    if let Some((address, reason)) = args.block_address {
        return run_block_command(&settings, &address, reason.as_deref());
    }

    let settings = Arc::new(settings);

    // ---------------------------------------------------------------
    // 2. Logging
    // ---------------------------------------------------------------
    init_tracing(&settings.logging.file, &settings.logging.level);

    info!("Starting Warden request-governance gateway");
    info!("Config loaded from {}", args.config_path);

    // ---------------------------------------------------------------
    // 3. Storage and caches
    // ---------------------------------------------------------------
    let store: Arc<dyn GovernanceStore> = Arc::new(
        SqliteStore::new(&settings.storage.sqlite_path)
            .context("Failed to initialise SQLite store")?,
    );

    let block_cache = Arc::new(BlockListCache::new(Duration::from_secs(
        settings.gate.block_cache_ttl_secs,
    )));

    let geo_provider = Arc::new(HttpGeoProvider::new(
        &settings.geo.provider_base_url,
        Duration::from_secs(settings.geo.timeout_secs),
    )?);
    let geo_resolver = Arc::new(GeoResolver::new(
        geo_provider,
        Duration::from_secs(settings.geo.cache_ttl_secs),
    ));

    info!("Storage layer initialised");

    // ---------------------------------------------------------------
    // 4. Gating pipeline
    // ---------------------------------------------------------------
    let gate = Arc::new(RequestGate::new(
        store.clone(),
        block_cache.clone(),
        settings.gate.fail_open,
    ));
    if settings.gate.fail_open {
        info!("Gate configured to fail open on store errors");
    }

    let recorder = Arc::new(RequestRecorder::new(store.clone(), geo_resolver.clone()));
    let gateway = Arc::new(Gateway::new(&settings, gate, recorder));

    info!("Gating pipeline initialised");

    // ---------------------------------------------------------------
    // 5. Batch jobs
    // ---------------------------------------------------------------
    let detector = Arc::new(AnomalyDetector::new(
        store.clone(),
        settings.detection.clone(),
    ));
    let sweeper = Arc::new(RetentionSweeper::new(
        store.clone(),
        settings.retention.clone(),
    ));

    let detection_runner = Arc::new(JobRunner::new("detection"));
    let retention_runner = Arc::new(JobRunner::new("retention"));

    // ---------------------------------------------------------------
    // 6. Admin API
    // ---------------------------------------------------------------
    let admin_state = AppState {
        store: store.clone(),
        block_cache: block_cache.clone(),
        detector: detector.clone(),
        sweeper: sweeper.clone(),
        detection_runner: detection_runner.clone(),
        retention_runner: retention_runner.clone(),
        start_time: Instant::now(),
        api_key: settings.admin_api.api_key.clone(),
    };
    let admin_server = AdminApiServer::new(admin_state, settings.admin_api.bind.clone());

    // ---------------------------------------------------------------
    // 7. Spawn everything
    // ---------------------------------------------------------------
    let gateway_bind = settings.server.bind.clone();
    let gateway_handle = tokio::spawn(async move {
        if let Err(e) = gateway.run(&gateway_bind).await {
            error!("Gateway server error: {}", e);
        }
    });

    let admin_handle = tokio::spawn(async move {
        if let Err(e) = admin_server.run().await {
            error!("Admin API server error: {}", e);
        }
    });

    let detection_handle = tokio::spawn(runner::drive(
        detection_runner.clone(),
        Duration::from_secs(settings.detection.interval_secs),
        {
            let detector = detector.clone();
            move || {
                detector.run_once().map(|summary| {
                    format!(
                        "{} new findings (volume {}, sensitive {}, breadth {})",
                        summary.total(),
                        summary.volume,
                        summary.sensitive,
                        summary.breadth
                    )
                })
            }
        },
    ));

    let retention_handle = tokio::spawn(runner::drive(
        retention_runner.clone(),
        Duration::from_secs(settings.retention.interval_secs),
        {
            let sweeper = sweeper.clone();
            move || {
                sweeper.run_once().map(|summary| {
                    format!(
                        "removed {} request logs, {} resolved findings",
                        summary.request_logs, summary.resolved_findings
                    )
                })
            }
        },
    ));

    let cleanup_handle = tokio::spawn(cleanup_loop(block_cache.clone(), geo_resolver.clone()));

    info!("Warden is running. Press Ctrl+C to shut down.");

    // ---------------------------------------------------------------
    // 8. Wait for shutdown signal
    // ---------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down Warden...");

    gateway_handle.abort();
    admin_handle.abort();
    detection_handle.abort();
    retention_handle.abort();
    cleanup_handle.abort();

    info!("Warden shut down gracefully");
    Ok(())
}
