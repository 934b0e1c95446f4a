//! Alert Gate - caps approved alerts per entity within a fixed window
//!
//! The window opens at the first approved alert and lasts `limit_window`.
//! Up to `limit_count` alerts are approved inside it; once it has elapsed
//! the next alert opens a fresh window. The decision and the ledger update
//! happen in one conditional upsert, so concurrent callers for the same
//! entity can never both squeeze past the limit.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::utils::DatabaseService;

pub struct AlertGate {
    database: Arc<DatabaseService>,
    limit_count: u32,
    limit_window: Duration,
}

impl AlertGate {
    pub fn new(database: Arc<DatabaseService>, limit_count: u32, limit_window: Duration) -> Self {
        Self {
            database,
            limit_count,
            limit_window,
        }
    }

    pub fn from_config(config: &Config, database: Arc<DatabaseService>) -> Self {
        Self::new(database, config.alert_limit_count, config.alert_limit_window())
    }

    /// Approve (and record) an alert for `entity_id` at `now`, or deny it.
    ///
    /// Storage failures are returned to the caller; they concern this entity
    /// only.
    pub fn try_approve(&self, entity_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let approved =
            self.database
                .try_approve_alert(entity_id, now, self.limit_count, self.limit_window)?;

        if approved {
            info!(
                target: "ALERT_GATE",
                entity = %entity_id,
                limit = self.limit_count,
                "Alert approved"
            );
        } else {
            debug!(
                target: "ALERT_GATE",
                entity = %entity_id,
                limit = self.limit_count,
                window_hours = self.limit_window.num_hours(),
                "Alert suppressed: limit reached for current window"
            );
        }

        Ok(approved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    }

    fn gate(limit: u32, hours: i64) -> (AlertGate, Arc<DatabaseService>) {
        let db = Arc::new(DatabaseService::open_in_memory().unwrap());
        (AlertGate::new(Arc::clone(&db), limit, Duration::hours(hours)), db)
    }

    #[test]
    fn test_limit_within_window_then_reset() {
        let (gate, db) = gate(2, 24);

        let decisions: Vec<bool> = [0, 1, 2]
            .iter()
            .map(|h| gate.try_approve("0xabc", start() + Duration::hours(*h)).unwrap())
            .collect();
        assert_eq!(decisions, vec![true, true, false]);

        let record = db.alert_record("0xabc").unwrap().unwrap();
        assert_eq!(record.alert_count, 2);
        assert_eq!(record.window_start, start());

        let later = start() + Duration::hours(25);
        assert!(gate.try_approve("0xabc", later).unwrap());

        let record = db.alert_record("0xabc").unwrap().unwrap();
        assert_eq!(record.alert_count, 1);
        assert_eq!(record.window_start, later);
    }

    #[test]
    fn test_denial_does_not_mutate_record() {
        let (gate, db) = gate(1, 24);
        assert!(gate.try_approve("0xabc", start()).unwrap());
        let before = db.alert_record("0xabc").unwrap();

        assert!(!gate.try_approve("0xabc", start() + Duration::hours(3)).unwrap());
        assert_eq!(db.alert_record("0xabc").unwrap(), before);
    }

    #[test]
    fn test_window_boundary_is_still_open() {
        let (gate, _db) = gate(1, 24);
        assert!(gate.try_approve("0xabc", start()).unwrap());
        // Exactly limit_window later the window has not yet elapsed
        assert!(!gate.try_approve("0xabc", start() + Duration::hours(24)).unwrap());
        assert!(gate
            .try_approve("0xabc", start() + Duration::hours(24) + Duration::seconds(1))
            .unwrap());
    }

    #[test]
    fn test_entities_are_independent_and_case_insensitive() {
        let (gate, _db) = gate(1, 24);
        assert!(gate.try_approve("0xAbC", start()).unwrap());
        assert!(!gate.try_approve("0xabc", start()).unwrap());
        assert!(gate.try_approve("0xdef", start()).unwrap());
    }

    #[test]
    fn test_storage_failure_is_an_error() {
        let (gate, db) = gate(1, 24);
        db.execute_raw("DROP TABLE alert_limits").unwrap();
        assert!(gate.try_approve("0xabc", start()).is_err());
    }

    #[test]
    fn test_oversized_window_never_resets() {
        let (gate, _db) = gate(1, 10_000_000_000);
        assert!(gate.try_approve("0xabc", start()).unwrap());
        assert!(!gate
            .try_approve("0xabc", start() + Duration::days(365 * 50))
            .unwrap());
    }
}
