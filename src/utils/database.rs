//! SQLite database service for HolderPulse

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::modules::growth_evaluator::{HistoryAccessor, Snapshot};

const SNAPSHOT_COLUMNS: &str = "entity_id, label, holders, error, observed_at";

/// Per-entity alert rate ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub entity_id: String,
    pub alert_count: u32,
    pub window_start: DateTime<Utc>,
}

/// SQLite database service
pub struct DatabaseService {
    conn: Arc<Mutex<Connection>>,
}

impl DatabaseService {
    /// Create a new database service
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        Self::with_connection(conn)
    }

    /// Database that lives only as long as this service
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let service = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        service.initialize()?;
        Ok(service)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock();

        // Append-only holder snapshots
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                entity_id TEXT NOT NULL COLLATE NOCASE,
                label TEXT NOT NULL DEFAULT '',
                holders INTEGER,
                error TEXT,
                observed_at INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        // Alert rate ledger, one row per entity
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS alert_limits (
                entity_id TEXT PRIMARY KEY COLLATE NOCASE,
                alert_count INTEGER NOT NULL,
                window_start INTEGER NOT NULL
            )
            "#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_entity_time ON snapshots(entity_id, observed_at)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_time ON snapshots(observed_at)",
            [],
        )?;

        info!(target: "DATABASE", "Initialized successfully");
        Ok(())
    }

    // ============================================
    // SNAPSHOT METHODS
    // ============================================

    pub fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO snapshots (entity_id, label, holders, error, observed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                snapshot.entity_id,
                snapshot.label,
                snapshot.holders,
                snapshot.error.as_deref().filter(|e| !e.is_empty()),
                snapshot.observed_at.timestamp_millis(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent successful snapshots for an entity, newest first
    #[cfg(test)]
    pub fn recent_snapshots(&self, entity_id: &str, limit: i64) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM snapshots
             WHERE entity_id = ?1 AND error IS NULL AND holders IS NOT NULL
             ORDER BY observed_at DESC LIMIT ?2",
            SNAPSHOT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![entity_id, limit], row_to_snapshot)?;

        let mut snapshots = Vec::new();
        for row in rows {
            snapshots.push(row?);
        }
        Ok(snapshots)
    }

    pub fn latest_successful_before(
        &self,
        entity_id: &str,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM snapshots
                     WHERE entity_id = ?1 AND error IS NULL AND holders IS NOT NULL
                       AND observed_at < ?2
                     ORDER BY observed_at DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![entity_id, before.timestamp_millis()],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Successful snapshot nearest to `target`, in `[target, target + tolerance]`
    /// and strictly older than `before`
    pub fn closest_successful(
        &self,
        entity_id: &str,
        target: DateTime<Utc>,
        tolerance: Duration,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM snapshots
                     WHERE entity_id = ?1 AND error IS NULL AND holders IS NOT NULL
                       AND observed_at >= ?2 AND observed_at <= ?3 AND observed_at < ?4
                     ORDER BY observed_at ASC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                params![
                    entity_id,
                    target.timestamp_millis(),
                    target
                        .timestamp_millis()
                        .saturating_add(tolerance.num_milliseconds()),
                    before.timestamp_millis(),
                ],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    pub fn delete_snapshots_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM snapshots WHERE observed_at < ?1",
            params![cutoff.timestamp_millis()],
        )?;
        Ok(removed)
    }

    pub fn snapshot_count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count = conn.query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        Ok(count)
    }

    // ============================================
    // ALERT LEDGER METHODS
    // ============================================

    /// Atomically count an alert against the entity's current window.
    ///
    /// A single conditional upsert: a missing row or a window that started
    /// before `now - window` opens a new window at `now` with count 1; an
    /// open window below `limit` is incremented; otherwise nothing changes.
    /// Returns whether a row was written (i.e. the alert is approved).
    pub fn try_approve_alert(
        &self,
        entity_id: &str,
        now: DateTime<Utc>,
        limit: u32,
        window: Duration,
    ) -> Result<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            r#"
            INSERT INTO alert_limits (entity_id, alert_count, window_start)
            VALUES (?1, 1, ?2)
            ON CONFLICT(entity_id) DO UPDATE SET
                alert_count = CASE
                    WHEN alert_limits.window_start < ?3 THEN 1
                    ELSE alert_limits.alert_count + 1
                END,
                window_start = CASE
                    WHEN alert_limits.window_start < ?3 THEN excluded.window_start
                    ELSE alert_limits.window_start
                END
            WHERE alert_limits.window_start < ?3 OR alert_limits.alert_count < ?4
            "#,
            params![
                entity_id,
                now.timestamp_millis(),
                now.timestamp_millis()
                    .saturating_sub(window.num_milliseconds()),
                limit,
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn alert_record(&self, entity_id: &str) -> Result<Option<AlertRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                "SELECT entity_id, alert_count, window_start FROM alert_limits WHERE entity_id = ?1",
                params![entity_id],
                |row| {
                    Ok(AlertRecord {
                        entity_id: row.get(0)?,
                        alert_count: row.get(1)?,
                        window_start: millis_to_datetime(2, row.get(2)?)?,
                    })
                },
            )
            .optional()?;
        Ok(record)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<()> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

impl HistoryAccessor for DatabaseService {
    fn previous_before(&self, entity_id: &str, before: DateTime<Utc>) -> Result<Option<Snapshot>> {
        self.latest_successful_before(entity_id, before)
    }

    fn closest_to(
        &self,
        entity_id: &str,
        target: DateTime<Utc>,
        tolerance: Duration,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        self.closest_successful(entity_id, target, tolerance, before)
    }
}

impl Clone for DatabaseService {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
        }
    }
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let error: Option<String> = row.get(3)?;
    Ok(Snapshot {
        entity_id: row.get(0)?,
        label: row.get(1)?,
        holders: row.get(2)?,
        error: error.filter(|e| !e.is_empty()),
        observed_at: millis_to_datetime(4, row.get(4)?)?,
    })
}

fn millis_to_datetime(column: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(column, millis))
}
