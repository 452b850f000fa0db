use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, types::ToSql, Connection};

use super::{
    format_sql_time, BlockedAddressRow, FindingQuery, GovernanceStore, NewFinding, NewLogEntry,
    RequestLogQuery, RequestLogRow, StoreError, SuspiciousActivityRow,
};

/// SQLite-backed [`GovernanceStore`].
///
/// A single connection behind a mutex is plenty here: the request path does
/// one point read per cache miss, and everything else is batch work.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: &str) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Ephemeral store. Used by tests and usable for dry runs.
    pub fn in_memory() -> rusqlite::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> rusqlite::Result<Self> {
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS request_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address  TEXT NOT NULL,
                timestamp   TEXT NOT NULL DEFAULT (datetime('now')),
                path        TEXT NOT NULL,
                method      TEXT NOT NULL DEFAULT 'GET',
                country     TEXT,
                city        TEXT,
                user_agent  TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_request_log_address ON request_log(ip_address);
            CREATE INDEX IF NOT EXISTS idx_request_log_timestamp ON request_log(timestamp);
            CREATE INDEX IF NOT EXISTS idx_request_log_path ON request_log(path);

            CREATE TABLE IF NOT EXISTS blocked_addresses (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address  TEXT NOT NULL UNIQUE,
                reason      TEXT,
                is_active   INTEGER NOT NULL DEFAULT 1,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_blocked_active ON blocked_addresses(is_active);

            CREATE TABLE IF NOT EXISTS suspicious_activity (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                ip_address    TEXT NOT NULL,
                category      TEXT NOT NULL,
                reason        TEXT NOT NULL,
                detected_at   TEXT NOT NULL DEFAULT (datetime('now')),
                request_count INTEGER NOT NULL DEFAULT 0,
                is_resolved   INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_suspicious_address ON suspicious_activity(ip_address);
            CREATE INDEX IF NOT EXISTS idx_suspicious_detected ON suspicious_activity(detected_at);
            -- At most one open finding per (address, category). Inserts race
            -- against concurrent detection runs; the index arbitrates.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_suspicious_open
                ON suspicious_activity(ip_address, category) WHERE is_resolved = 0;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl GovernanceStore for SqliteStore {
    fn is_address_blocked(&self, address: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT 1 FROM blocked_addresses WHERE ip_address = ?1 AND is_active = 1 LIMIT 1",
        )?;
        Ok(stmt.exists(params![address])?)
    }

    fn add_blocked_address(&self, address: &str, reason: Option<&str>) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "INSERT INTO blocked_addresses (ip_address, reason)
             VALUES (?1, ?2)
             ON CONFLICT(ip_address) DO NOTHING",
            params![address, reason],
        )?;
        Ok(changed > 0)
    }

    fn set_blocked_active(&self, address: &str, active: bool) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "UPDATE blocked_addresses SET is_active = ?1 WHERE ip_address = ?2",
            params![active as i32, address],
        )?;
        Ok(changed > 0)
    }

    fn list_blocked_addresses(&self) -> Result<Vec<BlockedAddressRow>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, ip_address, reason, is_active, created_at
             FROM blocked_addresses ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(BlockedAddressRow {
                id: row.get(0)?,
                ip_address: row.get(1)?,
                reason: row.get(2)?,
                is_active: row.get::<_, i32>(3)? != 0,
                created_at: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn insert_request_log(&self, entry: &NewLogEntry) -> Result<i64, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "INSERT INTO request_log (ip_address, timestamp, path, method, country, city, user_agent)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.ip_address,
                format_sql_time(entry.timestamp),
                entry.path,
                entry.method,
                entry.country,
                entry.city,
                entry.user_agent,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn query_request_log(&self, query: &RequestLogQuery) -> Result<Vec<RequestLogRow>, StoreError> {
        let mut sql = String::from(
            "SELECT id, ip_address, timestamp, path, method, country, city, user_agent
             FROM request_log",
        );
        let mut owned: Vec<Box<dyn ToSql>> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        if let Some(ref address) = query.address {
            owned.push(Box::new(address.clone()));
            clauses.push(format!("ip_address = ?{}", owned.len()));
        }
        if let Some(ref fragment) = query.path_contains {
            owned.push(Box::new(fragment.clone()));
            clauses.push(format!("instr(path, ?{}) > 0", owned.len()));
        }
        if let Some(from) = query.from {
            owned.push(Box::new(format_sql_time(from)));
            clauses.push(format!("timestamp >= ?{}", owned.len()));
        }
        if let Some(to) = query.to {
            owned.push(Box::new(format_sql_time(to)));
            clauses.push(format!("timestamp <= ?{}", owned.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if let Some(limit) = query.limit {
            owned.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", owned.len()));
        }

        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(&param_refs[..], |row| {
            Ok(RequestLogRow {
                id: row.get(0)?,
                ip_address: row.get(1)?,
                timestamp: row.get(2)?,
                path: row.get(3)?,
                method: row.get(4)?,
                country: row.get(5)?,
                city: row.get(6)?,
                user_agent: row.get(7)?,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn address_counts_since(
        &self,
        since: DateTime<Utc>,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip_address, COUNT(*) AS request_count
             FROM request_log
             WHERE timestamp >= ?1
             GROUP BY ip_address
             HAVING request_count > ?2",
        )?;
        let rows = stmt.query_map(params![format_sql_time(since), over], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn address_counts_for_path_since(
        &self,
        since: DateTime<Utc>,
        fragment: &str,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip_address, COUNT(*) AS access_count
             FROM request_log
             WHERE timestamp >= ?1 AND instr(path, ?2) > 0
             GROUP BY ip_address
             HAVING access_count > ?3",
        )?;
        let rows = stmt.query_map(params![format_sql_time(since), fragment, over], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn distinct_path_counts_since(
        &self,
        since: DateTime<Utc>,
        over: i64,
    ) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(
            "SELECT ip_address, COUNT(DISTINCT path) AS unique_paths
             FROM request_log
             WHERE timestamp >= ?1
             GROUP BY ip_address
             HAVING unique_paths > ?2",
        )?;
        let rows = stmt.query_map(params![format_sql_time(since), over], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn insert_finding_if_absent(&self, finding: &NewFinding) -> Result<bool, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        // OR IGNORE swallows exactly one kind of conflict here: the partial
        // unique index on open findings. An existing open finding is
        // success, not an error.
        let changed = conn.execute(
            "INSERT OR IGNORE INTO suspicious_activity (ip_address, category, reason, request_count)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                finding.ip_address,
                finding.category,
                finding.reason,
                finding.request_count,
            ],
        )?;
        Ok(changed > 0)
    }

    fn query_findings(&self, query: &FindingQuery) -> Result<Vec<SuspiciousActivityRow>, StoreError> {
        let mut sql = String::from(
            "SELECT id, ip_address, category, reason, detected_at, request_count, is_resolved
             FROM suspicious_activity",
        );
        let mut owned: Vec<Box<dyn ToSql>> = Vec::new();
        let mut clauses: Vec<String> = Vec::new();

        if let Some(ref address) = query.address {
            owned.push(Box::new(address.clone()));
            clauses.push(format!("ip_address = ?{}", owned.len()));
        }
        if let Some(resolved) = query.resolved {
            owned.push(Box::new(resolved as i32));
            clauses.push(format!("is_resolved = ?{}", owned.len()));
        }
        if let Some(from) = query.from {
            owned.push(Box::new(format_sql_time(from)));
            clauses.push(format!("detected_at >= ?{}", owned.len()));
        }
        if let Some(to) = query.to {
            owned.push(Box::new(format_sql_time(to)));
            clauses.push(format!("detected_at <= ?{}", owned.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY detected_at DESC");
        if let Some(limit) = query.limit {
            owned.push(Box::new(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", owned.len()));
        }

        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(&param_refs[..], |row| {
            Ok(SuspiciousActivityRow {
                id: row.get(0)?,
                ip_address: row.get(1)?,
                category: row.get(2)?,
                reason: row.get(3)?,
                detected_at: row.get(4)?,
                request_count: row.get(5)?,
                is_resolved: row.get::<_, i32>(6)? != 0,
            })
        })?;
        rows.collect::<rusqlite::Result<_>>().map_err(Into::into)
    }

    fn resolve_findings(&self, ids: &[i64]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders = (1..=ids.len())
            .map(|i| format!("?{}", i))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE suspicious_activity SET is_resolved = 1 WHERE id IN ({})",
            placeholders
        );
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let param_refs: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        let changed = conn.execute(&sql, &param_refs[..])?;
        Ok(changed)
    }

    fn delete_request_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM request_log WHERE timestamp < ?1",
            params![format_sql_time(cutoff)],
        )?;
        Ok(changed)
    }

    fn delete_resolved_findings_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        let changed = conn.execute(
            "DELETE FROM suspicious_activity WHERE is_resolved = 1 AND detected_at < ?1",
            params![format_sql_time(cutoff)],
        )?;
        Ok(changed)
    }
}

#[cfg(test)]
impl SqliteStore {
    /// Test hook: shift every finding's detection timestamp.
    pub fn backdate_findings_for_test(&self, ts: DateTime<Utc>) {
        let conn = self.conn.lock().expect("sqlite mutex poisoned");
        conn.execute(
            "UPDATE suspicious_activity SET detected_at = ?1",
            params![format_sql_time(ts)],
        )
        .expect("backdate findings");
    }
}
