use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use crate::config::settings::DetectionConfig;
use crate::storage::{GovernanceStore, NewFinding, StoreError};

/// Category slug for the volume rule.
pub const CATEGORY_VOLUME: &str = "volume";
/// Category slug for the breadth rule.
pub const CATEGORY_BREADTH: &str = "breadth";

/// Category slug for a specific sensitive path, e.g. `sensitive:/admin/`.
pub fn sensitive_category(path: &str) -> String {
    format!("sensitive:{}", path)
}

/// Counts of findings created by one detection run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionSummary {
    pub volume: usize,
    pub sensitive: usize,
    pub breadth: usize,
}

impl DetectionSummary {
    pub fn total(&self) -> usize {
        self.volume + self.sensitive + self.breadth
    }
}

/// Batch job that scans the trailing request-log window and flags addresses
/// showing abusive patterns.
///
/// The three rules are independent and order-insensitive; each address can
/// hold one open finding per category, enforced by the store. A store
/// failure aborts the run and propagates; findings already written by
/// earlier rules stand.
pub struct AnomalyDetector {
    store: Arc<dyn GovernanceStore>,
    config: DetectionConfig,
}

impl AnomalyDetector {
    pub fn new(store: Arc<dyn GovernanceStore>, config: DetectionConfig) -> Self {
        Self { store, config }
    }

    pub fn run_once(&self) -> Result<DetectionSummary, StoreError> {
        let since = Utc::now() - Duration::seconds(self.config.window_secs as i64);
        let mut summary = DetectionSummary::default();

        // Rule 1: request volume per address.
        for (address, count) in self
            .store
            .address_counts_since(since, self.config.volume_threshold)?
        {
            let created = self.store.insert_finding_if_absent(&NewFinding {
                ip_address: address.clone(),
                category: CATEGORY_VOLUME.to_string(),
                reason: format!(
                    "Excessive requests: {} requests in the detection window",
                    count
                ),
                request_count: count,
            })?;
            if created {
                warn!(address = %address, count = count, "Flagged address for excessive requests");
                summary.volume += 1;
            }
        }

        // Rule 2: hammering on sensitive paths. Substring match, so a
        // fragment like /login/ also catches /api/login/history/.
        for path in &self.config.sensitive_paths {
            for (address, count) in self.store.address_counts_for_path_since(
                since,
                path,
                self.config.sensitive_path_threshold,
            )? {
                let created = self.store.insert_finding_if_absent(&NewFinding {
                    ip_address: address.clone(),
                    category: sensitive_category(path),
                    reason: format!(
                        "Accessing sensitive path {}: {} times in the detection window",
                        path, count
                    ),
                    request_count: count,
                })?;
                if created {
                    warn!(address = %address, path = %path, count = count, "Flagged address for sensitive-path access");
                    summary.sensitive += 1;
                }
            }
        }

        // Rule 3: breadth of distinct paths per address.
        for (address, count) in self
            .store
            .distinct_path_counts_since(since, self.config.breadth_threshold)?
        {
            let created = self.store.insert_finding_if_absent(&NewFinding {
                ip_address: address.clone(),
                category: CATEGORY_BREADTH.to_string(),
                reason: format!(
                    "Unusual request pattern: {} distinct paths in the detection window",
                    count
                ),
                request_count: count,
            })?;
            if created {
                warn!(address = %address, distinct_paths = count, "Flagged address for unusual request breadth");
                summary.breadth += 1;
            }
        }

        info!(
            volume = summary.volume,
            sensitive = summary.sensitive,
            breadth = summary.breadth,
            "Detection run complete"
        );
        Ok(summary)
    }
}
