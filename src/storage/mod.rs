pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Timestamp format used for all TEXT datetime columns. Matches SQLite's
/// `datetime('now')` output, so string comparison orders chronologically.
pub const SQL_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Render a UTC timestamp in the column format.
pub fn format_sql_time(ts: DateTime<Utc>) -> String {
    ts.format(SQL_TIME_FORMAT).to_string()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct RequestLogRow {
    pub id: i64,
    pub ip_address: String,
    pub timestamp: String,
    pub path: String,
    pub method: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BlockedAddressRow {
    pub id: i64,
    pub ip_address: String,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SuspiciousActivityRow {
    pub id: i64,
    pub ip_address: String,
    pub category: String,
    pub reason: String,
    pub detected_at: String,
    pub request_count: i64,
    pub is_resolved: bool,
}

/// A request-log entry about to be persisted by the recorder.
#[derive(Debug, Clone)]
pub struct NewLogEntry {
    pub ip_address: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub method: String,
    pub country: Option<String>,
    pub city: Option<String>,
    pub user_agent: Option<String>,
}

/// A detection finding about to be persisted, if no open finding already
/// exists for the same (address, category) pair.
#[derive(Debug, Clone)]
pub struct NewFinding {
    pub ip_address: String,
    pub category: String,
    pub reason: String,
    pub request_count: i64,
}

// ---------------------------------------------------------------------------
// Query filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RequestLogQuery {
    pub address: Option<String>,
    pub path_contains: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct FindingQuery {
    pub address: Option<String>,
    pub resolved: Option<bool>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// GovernanceStore
// ---------------------------------------------------------------------------

/// Durable store behind the gate, the recorder, and the batch jobs.
///
/// Handed to each component at construction so tests can substitute an
/// in-memory database. The caches layered on top hold expendable copies;
/// this store is the only source of truth.
pub trait GovernanceStore: Send + Sync {
    /// Whether an *active* denylist row exists for the address.
    fn is_address_blocked(&self, address: &str) -> Result<bool, StoreError>;

    /// Insert a denylist row. Returns `false` when the address is already
    /// present (idempotent no-op, the existing row is left untouched).
    fn add_blocked_address(&self, address: &str, reason: Option<&str>) -> Result<bool, StoreError>;

    /// Flip the active flag on an existing denylist row. Returns `false`
    /// when no row exists for the address.
    fn set_blocked_active(&self, address: &str, active: bool) -> Result<bool, StoreError>;

    fn list_blocked_addresses(&self) -> Result<Vec<BlockedAddressRow>, StoreError>;

    fn insert_request_log(&self, entry: &NewLogEntry) -> Result<i64, StoreError>;

    fn query_request_log(&self, query: &RequestLogQuery) -> Result<Vec<RequestLogRow>, StoreError>;

    /// Addresses with more than `over` log entries since `since`.
    fn address_counts_since(
        &self,
        since: DateTime<Utc>,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Addresses with more than `over` log entries whose path contains
    /// `fragment`, since `since`. Substring match, by design.
    fn address_counts_for_path_since(
        &self,
        since: DateTime<Utc>,
        fragment: &str,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Addresses that touched more than `over` distinct paths since `since`.
    fn distinct_path_counts_since(
        &self,
        since: DateTime<Utc>,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError>;

    /// Create a finding unless an unresolved one already exists for the same
    /// (address, category). Returns `true` when a row was created; a
    /// conflict with an open finding is a no-op, not an error.
    fn insert_finding_if_absent(&self, finding: &NewFinding) -> Result<bool, StoreError>;

    fn query_findings(&self, query: &FindingQuery) -> Result<Vec<SuspiciousActivityRow>, StoreError>;

    /// Mark the given findings resolved. Returns the number of rows updated.
    fn resolve_findings(&self, ids: &[i64]) -> Result<usize, StoreError>;

    /// Delete request-log rows older than `cutoff`. Returns the count.
    fn delete_request_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Delete findings that are resolved and were detected before `cutoff`.
    fn delete_resolved_findings_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
