use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info};

use crate::config::settings::RetentionConfig;
use crate::storage::{GovernanceStore, StoreError};

/// Counts of rows removed by one sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetentionSummary {
    pub request_logs: usize,
    pub resolved_findings: usize,
}

/// Batch job that ages out request-log rows and resolved findings.
///
/// The two deletes are independent: each runs and logs its own count, and a
/// failure in one never stops the other. Blocked addresses are never touched.
pub struct RetentionSweeper {
    store: Arc<dyn GovernanceStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn GovernanceStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    pub fn run_once(&self) -> Result<RetentionSummary, StoreError> {
        let now = Utc::now();
        let mut summary = RetentionSummary::default();
        let mut first_error: Option<StoreError> = None;

        let log_cutoff = now - Duration::days(self.config.request_log_days);
        match self.store.delete_request_logs_before(log_cutoff) {
            Ok(count) => {
                info!(deleted = count, "Removed aged request-log rows");
                summary.request_logs = count;
            }
            Err(err) => {
                error!(error = %err, "Request-log sweep failed");
                first_error = Some(err);
            }
        }

        let finding_cutoff = now - Duration::days(self.config.resolved_finding_days);
        match self.store.delete_resolved_findings_before(finding_cutoff) {
            Ok(count) => {
                info!(deleted = count, "Removed aged resolved findings");
                summary.resolved_findings = count;
            }
            Err(err) => {
                error!(error = %err, "Resolved-finding sweep failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::defaults::default_retention_config;
    use crate::storage::sqlite::SqliteStore;
    use crate::storage::{FindingQuery, NewFinding, NewLogEntry, RequestLogQuery};

    #[test]
    fn sweeps_old_logs_and_old_resolved_findings() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let now = Utc::now();

        for (address, age_days) in [("1.1.1.1", 31), ("2.2.2.2", 29)] {
            store
                .insert_request_log(&NewLogEntry {
                    ip_address: address.to_string(),
                    timestamp: now - Duration::days(age_days),
                    path: "/".to_string(),
                    method: "GET".to_string(),
                    country: None,
                    city: None,
                    user_agent: None,
                })
                .unwrap();
        }

        for address in ["3.3.3.3", "4.4.4.4"] {
            store
                .insert_finding_if_absent(&NewFinding {
                    ip_address: address.to_string(),
                    category: "volume".to_string(),
                    reason: "Excessive requests".to_string(),
                    request_count: 120,
                })
                .unwrap();
        }
        let findings = store.query_findings(&FindingQuery::default()).unwrap();
        // Backdate both findings past the resolved-retention age, resolve
        // only one: the unresolved one must survive.
        store.backdate_findings_for_test(now - Duration::days(8));
        let resolved_id = findings.iter().find(|f| f.ip_address == "3.3.3.3").unwrap().id;
        store.resolve_findings(&[resolved_id]).unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), default_retention_config());
        let summary = sweeper.run_once().unwrap();

        assert_eq!(summary.request_logs, 1);
        assert_eq!(summary.resolved_findings, 1);

        let logs = store.query_request_log(&RequestLogQuery::default()).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].ip_address, "2.2.2.2");

        let remaining = store.query_findings(&FindingQuery::default()).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].ip_address, "4.4.4.4");
        assert!(!remaining[0].is_resolved);
    }
}
