use std::net::IpAddr;
use std::sync::Arc;

use tracing::{debug, error, info};

use super::cache::BlockListCache;
use crate::storage::{GovernanceStore, StoreError};

/// Outcome of the pre-handler gating stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    Deny,
}

/// Per-request blocking decision.
///
/// The cache holds positive verdicts only; every miss is an authoritative
/// store read. Two concurrent misses for the same address both reading the
/// store is a benign race, since the store answer is what gets cached.
pub struct RequestGate {
    store: Arc<dyn GovernanceStore>,
    cache: Arc<BlockListCache>,
    fail_open: bool,
}

impl RequestGate {
    pub fn new(store: Arc<dyn GovernanceStore>, cache: Arc<BlockListCache>, fail_open: bool) -> Self {
        Self {
            store,
            cache,
            fail_open,
        }
    }

    /// Decide whether a request from `address` may proceed.
    ///
    /// A store failure propagates (fail-closed) unless `fail_open` was
    /// explicitly configured, in which case the request is allowed and the
    /// failure logged.
    pub fn check(&self, address: IpAddr) -> Result<GateDecision, StoreError> {
        if self.cache.is_blocked(&address) {
            debug!(address = %address, "Deny from block cache");
            return Ok(GateDecision::Deny);
        }

        match self.store.is_address_blocked(&address.to_string()) {
            Ok(true) => {
                info!(address = %address, "Blocked request");
                self.cache.mark_blocked(address);
                Ok(GateDecision::Deny)
            }
            Ok(false) => Ok(GateDecision::Allow),
            Err(err) if self.fail_open => {
                error!(address = %address, error = %err, "Denylist read failed; fail-open is set, allowing");
                Ok(GateDecision::Allow)
            }
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite::SqliteStore;
    use crate::storage::{
        BlockedAddressRow, FindingQuery, NewFinding, NewLogEntry, RequestLogQuery, RequestLogRow,
        SuspiciousActivityRow,
    };
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn gate_over(store: Arc<dyn GovernanceStore>, fail_open: bool) -> RequestGate {
        let cache = Arc::new(BlockListCache::new(Duration::from_secs(300)));
        RequestGate::new(store, cache, fail_open)
    }

    #[test]
    fn active_block_rows_deny() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_blocked_address("1.2.3.4", Some("abuse")).unwrap();

        let gate = gate_over(store, false);
        assert_eq!(gate.check("1.2.3.4".parse().unwrap()).unwrap(), GateDecision::Deny);
        assert_eq!(gate.check("5.6.7.8".parse().unwrap()).unwrap(), GateDecision::Allow);
    }

    #[test]
    fn inactive_rows_allow() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_blocked_address("1.2.3.4", None).unwrap();
        store.set_blocked_active("1.2.3.4", false).unwrap();

        let gate = gate_over(store, false);
        assert_eq!(gate.check("1.2.3.4".parse().unwrap()).unwrap(), GateDecision::Allow);
    }

    #[test]
    fn deny_primes_the_cache_but_allow_does_not() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        store.add_blocked_address("1.2.3.4", None).unwrap();

        let cache = Arc::new(BlockListCache::new(Duration::from_secs(300)));
        let gate = RequestGate::new(store, cache.clone(), false);

        gate.check("1.2.3.4".parse().unwrap()).unwrap();
        gate.check("5.6.7.8".parse().unwrap()).unwrap();

        assert!(cache.is_blocked(&"1.2.3.4".parse().unwrap()));
        assert!(!cache.is_blocked(&"5.6.7.8".parse().unwrap()));
    }

    /// A store that fails every call, for exercising gate failure modes.
    struct BrokenStore;

    impl GovernanceStore for BrokenStore {
        fn is_address_blocked(&self, _: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn add_blocked_address(&self, _: &str, _: Option<&str>) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn set_blocked_active(&self, _: &str, _: bool) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn list_blocked_addresses(&self) -> Result<Vec<BlockedAddressRow>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn insert_request_log(&self, _: &NewLogEntry) -> Result<i64, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn query_request_log(&self, _: &RequestLogQuery) -> Result<Vec<RequestLogRow>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn address_counts_since(
            &self,
            _: DateTime<Utc>,
            _: i64,
        ) -> Result<Vec<(String, i64)>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn address_counts_for_path_since(
            &self,
            _: DateTime<Utc>,
            _: &str,
            _: i64,
        ) -> Result<Vec<(String, i64)>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn distinct_path_counts_since(
            &self,
            _: DateTime<Utc>,
            _: i64,
        ) -> Result<Vec<(String, i64)>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn insert_finding_if_absent(&self, _: &NewFinding) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn query_findings(&self, _: &FindingQuery) -> Result<Vec<SuspiciousActivityRow>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn resolve_findings(&self, _: &[i64]) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn delete_request_logs_before(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
        fn delete_resolved_findings_before(&self, _: DateTime<Utc>) -> Result<usize, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[test]
    fn store_failure_fails_closed_by_default() {
        let gate = gate_over(Arc::new(BrokenStore), false);
        assert!(gate.check("1.2.3.4".parse().unwrap()).is_err());
    }

    #[test]
    fn fail_open_is_an_explicit_opt_in() {
        let gate = gate_over(Arc::new(BrokenStore), true);
        assert_eq!(gate.check("1.2.3.4".parse().unwrap()).unwrap(), GateDecision::Allow);
    }

    #[test]
    fn cached_deny_skips_the_store() {
        // Prime the cache through a working store, then swap in a broken
        // one behind the same cache: the cached verdict must still deny.
        let cache = Arc::new(BlockListCache::new(Duration::from_secs(300)));
        cache.mark_blocked("1.2.3.4".parse().unwrap());

        let gate = RequestGate::new(Arc::new(BrokenStore), cache, false);
        assert_eq!(gate.check("1.2.3.4".parse().unwrap()).unwrap(), GateDecision::Deny);
    }
}
