//! Retention Sweeper - prunes snapshots past the configured horizon

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::utils::DatabaseService;

pub struct RetentionSweeper {
    database: Arc<DatabaseService>,
    horizon: Duration,
}

impl RetentionSweeper {
    pub fn new(database: Arc<DatabaseService>, horizon: Duration) -> Self {
        Self { database, horizon }
    }

    pub fn from_config(config: &Config, database: Arc<DatabaseService>) -> Self {
        Self::new(database, config.retention_horizon())
    }

    /// Delete snapshots observed before `now - horizon`; returns rows removed
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let Some(cutoff) = now.checked_sub_signed(self.horizon) else {
            debug!(target: "SWEEPER", "Horizon reaches past the earliest date, nothing to prune");
            return Ok(0);
        };
        let removed = self.database.delete_snapshots_before(cutoff)?;

        if removed > 0 {
            info!(target: "SWEEPER", removed, cutoff = %cutoff, "Old snapshots pruned");
        } else {
            debug!(target: "SWEEPER", cutoff = %cutoff, "Nothing to prune");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::growth_evaluator::Snapshot;
    use chrono::TimeZone;

    #[test]
    fn test_sweep_keeps_snapshots_inside_horizon() {
        let db = Arc::new(DatabaseService::open_in_memory().unwrap());
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap();
        for hours_ago in [100, 73, 72, 1] {
            db.insert_snapshot(&Snapshot::success(
                "0xabc",
                "TKN",
                hours_ago,
                now - Duration::hours(hours_ago),
            ))
            .unwrap();
        }
        db.insert_snapshot(&Snapshot::failure("0xabc", "boom", now - Duration::hours(80)))
            .unwrap();

        let sweeper = RetentionSweeper::new(Arc::clone(&db), Duration::hours(72));
        assert_eq!(sweeper.sweep(now).unwrap(), 3);
        assert_eq!(db.snapshot_count().unwrap(), 2);

        // Second pass is a no-op, not an error
        assert_eq!(sweeper.sweep(now).unwrap(), 0);
    }

    #[test]
    fn test_oversized_horizon_prunes_nothing() {
        let db = Arc::new(DatabaseService::open_in_memory().unwrap());
        let now = Utc.with_ymd_and_hms(2024, 5, 4, 0, 0, 0).unwrap();
        db.insert_snapshot(&Snapshot::success("0xabc", "TKN", 1, now - Duration::hours(1)))
            .unwrap();

        let sweeper = RetentionSweeper::new(Arc::clone(&db), Duration::hours(10_000_000_000));
        assert_eq!(sweeper.sweep(now).unwrap(), 0);
        assert_eq!(db.snapshot_count().unwrap(), 1);
    }
}
