//! HolderPulse - token holder growth monitor
//!
//! One invocation runs one batch cycle over the contracts given on the
//! command line:
//! - samples the holder count of every contract (Ethplorer)
//! - persists the snapshots to SQLite
//! - evaluates multi-window growth against stored history
//! - rate-limits and dispatches alerts
//! - prunes snapshots past the retention horizon
//!
//! Scheduling is left to cron / systemd timers; a failed run is simply
//! retried by the next invocation.

mod config;
mod modules;
mod utils;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{debug, error, info, warn};

use config::Config;
use modules::growth_evaluator::{GrowthReport, Snapshot, SyntheticPrevious};
use modules::sampler::{dedupe_entities, HolderSource};
use modules::{AlertGate, GrowthEvaluator, RetentionSweeper, Sampler};
use utils::alerts::format_count;
use utils::{
    init_logger, notifier_from_config, DatabaseService, EthplorerClient, GrowthAlert,
    MetricsService, Notifier,
};

/// Phases of one run, entered strictly in this order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum CycleState {
    #[default]
    Sampling,
    Persisting,
    Evaluating,
    Sweeping,
    Done,
}

/// Counters for one completed cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    /// Last phase entered; `Done` for a completed cycle
    pub state: CycleState,
    pub sampled: usize,
    pub failed: usize,
    pub persisted: usize,
    pub evaluated: usize,
    pub triggered: usize,
    pub alerts_sent: usize,
    pub alerts_suppressed: usize,
    pub alert_errors: usize,
    pub swept: usize,
}

/// HolderPulse application
pub struct HolderPulse {
    config: Config,
    database: Arc<DatabaseService>,
    sampler: Sampler,
    evaluator: GrowthEvaluator,
    gate: AlertGate,
    sweeper: RetentionSweeper,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<MetricsService>,
}

impl HolderPulse {
    /// Create a new HolderPulse instance backed by the configured services
    pub fn new(config: Config) -> Result<Self> {
        let database = Arc::new(DatabaseService::new(&config.db_path)?);
        let source: Arc<dyn HolderSource> = Arc::new(EthplorerClient::new(&config)?);
        let notifier = notifier_from_config(&config);

        Self::with_services(config, database, source, notifier)
    }

    pub fn with_services(
        config: Config,
        database: Arc<DatabaseService>,
        source: Arc<dyn HolderSource>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricsService::new()?);

        Ok(Self {
            sampler: Sampler::from_config(&config, source),
            evaluator: GrowthEvaluator::from_config(&config),
            gate: AlertGate::from_config(&config, Arc::clone(&database)),
            sweeper: RetentionSweeper::from_config(&config, Arc::clone(&database)),
            config,
            database,
            notifier,
            metrics,
        })
    }

    fn enter(summary: &mut CycleSummary, state: CycleState) {
        debug!(target: "HOLDERPULSE", from = ?summary.state, to = ?state, "Cycle state");
        summary.state = state;
    }

    /// Run one full cycle at `now`.
    ///
    /// Per-entity failures are logged and skipped; only a failing sweep
    /// (a storage-layer problem) aborts the cycle with an error.
    pub async fn run_cycle(&self, entities: &[String], now: DateTime<Utc>) -> Result<CycleSummary> {
        let started = Instant::now();
        let mut summary = CycleSummary::default();

        info!(
            target: "HOLDERPULSE",
            entities = entities.len(),
            windows = self.evaluator.windows().len(),
            "Starting cycle"
        );

        Self::enter(&mut summary, CycleState::Sampling);
        let samples = self.sampler.sample_all(entities, now).await;
        for sample in &samples {
            let ok = sample.usable_count().is_some();
            self.metrics.record_sample(ok);
            if ok {
                summary.sampled += 1;
            } else {
                summary.failed += 1;
            }
        }
        println!("{}", render_holder_table(&samples));

        Self::enter(&mut summary, CycleState::Persisting);
        for sample in &samples {
            match self.database.insert_snapshot(sample) {
                Ok(_) => summary.persisted += 1,
                Err(e) => {
                    error!(target: "DATABASE", entity = %sample.entity_id, error = %e, "Snapshot insert failed")
                }
            }
        }

        Self::enter(&mut summary, CycleState::Evaluating);
        let synthetic_previous = self.synthetic_previous(entities);
        for sample in &samples {
            let Some(current) = sample.usable_count() else {
                continue;
            };

            let evaluation = match synthetic_previous {
                Some(count) => {
                    let seam = SyntheticPrevious::new(self.database.as_ref(), count);
                    self.evaluator.evaluate(&sample.entity_id, current, now, &seam)
                }
                None => self
                    .evaluator
                    .evaluate(&sample.entity_id, current, now, self.database.as_ref()),
            };

            let report = match evaluation {
                Ok(report) => report,
                Err(e) => {
                    error!(target: "EVALUATOR", entity = %sample.entity_id, error = %e, "Evaluation failed");
                    continue;
                }
            };

            summary.evaluated += 1;
            self.metrics.record_report(&report);

            if report.triggered {
                summary.triggered += 1;
                self.dispatch_alert(&report, &sample.label, now, &mut summary)
                    .await;
            }
        }

        Self::enter(&mut summary, CycleState::Sweeping);
        summary.swept = self
            .sweeper
            .sweep(now)
            .with_context(|| format!("cycle aborted in {:?} state", summary.state))?;
        self.metrics.snapshots_swept.inc_by(summary.swept as f64);

        Self::enter(&mut summary, CycleState::Done);
        self.metrics
            .cycle_duration
            .observe(started.elapsed().as_secs_f64());
        self.metrics.last_run.set(now.timestamp() as f64);

        info!(
            target: "HOLDERPULSE",
            sampled = summary.sampled,
            failed = summary.failed,
            triggered = summary.triggered,
            alerts_sent = summary.alerts_sent,
            alerts_suppressed = summary.alerts_suppressed,
            swept = summary.swept,
            "✅ Cycle complete"
        );

        Ok(summary)
    }

    /// Gate, then notify. Neither a gate error nor a delivery error stops
    /// the cycle.
    async fn dispatch_alert(
        &self,
        report: &GrowthReport,
        label: &str,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) {
        match self.gate.try_approve(&report.entity_id, now) {
            Ok(true) => {}
            Ok(false) => {
                summary.alerts_suppressed += 1;
                self.metrics.record_alert("suppressed");
                return;
            }
            Err(e) => {
                summary.alert_errors += 1;
                self.metrics.record_alert("gate_error");
                error!(target: "ALERT_GATE", entity = %report.entity_id, error = %e, "Gate unavailable, alert skipped");
                return;
            }
        }

        let alert = GrowthAlert::from_report(report, label);
        crate::log_alert!(
            "{} ({}) holders {} - {}",
            if label.is_empty() { "?" } else { label },
            report.entity_id,
            format_count(report.current_count),
            alert.crossed.join(", ")
        );

        match self.notifier.notify(&alert).await {
            Ok(()) => {
                summary.alerts_sent += 1;
                self.metrics.record_alert("approved");
            }
            Err(e) => {
                summary.alert_errors += 1;
                self.metrics.record_alert("notify_error");
                error!(target: "NOTIFIER", entity = %report.entity_id, error = %e, "Alert delivery failed");
            }
        }
    }

    /// The synthetic "previous" reference only applies to single-entity runs
    fn synthetic_previous(&self, entities: &[String]) -> Option<i64> {
        let count = self.config.synthetic_previous_count?;
        if entities.len() != 1 {
            warn!(
                target: "HOLDERPULSE",
                "SYNTHETIC_PREVIOUS_COUNT ignored: it requires exactly one contract"
            );
            return None;
        }
        info!(target: "HOLDERPULSE", count, "Using synthetic previous reference");
        Some(count)
    }

    /// Best-effort teardown: flush metrics
    pub fn shutdown(&self) {
        if let Some(path) = &self.config.metrics_file {
            match self.metrics.write_textfile(path) {
                Ok(()) => debug!(target: "METRICS", path = %path, "Metrics written"),
                Err(e) => warn!(target: "METRICS", path = %path, error = %e, "Failed to write metrics"),
            }
        }
        info!(target: "HOLDERPULSE", "Shutdown complete");
    }
}

/// Contract / Symbol / Holders / Error table for the sampled batch
pub fn render_holder_table(samples: &[Snapshot]) -> String {
    let rows: Vec<[String; 4]> = samples
        .iter()
        .map(|s| {
            [
                s.entity_id.clone(),
                s.label.clone(),
                s.usable_count()
                    .map(format_count)
                    .unwrap_or_else(|| "Error".to_string()),
                s.error.clone().unwrap_or_default(),
            ]
        })
        .collect();

    let header = ["Contract", "Symbol", "Holders", "Error"];
    let mut widths = header.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let line = |cells: [&str; 4]| {
        cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = width))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let mut out = vec![
        line(header),
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    ];
    for row in &rows {
        out.push(line([&row[0], &row[1], &row[2], &row[3]]));
    }
    out.join("\n")
}

#[tokio::main]
async fn main() -> ExitCode {
    let entities = dedupe_entities(std::env::args().skip(1));
    if entities.is_empty() {
        eprintln!("Usage: holderpulse <contract1> [contract2] [contract3] ...");
        return ExitCode::from(2);
    }

    // Initialize logging
    init_logger();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(target: "HOLDERPULSE", "Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let holderpulse = match HolderPulse::new(config) {
        Ok(app) => app,
        Err(e) => {
            error!(target: "HOLDERPULSE", "Failed to initialize: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = tokio::select! {
        result = holderpulse.run_cycle(&entities, Utc::now()) => result,
        _ = signal::ctrl_c() => Err(anyhow::anyhow!("interrupted")),
    };

    holderpulse.shutdown();

    match outcome {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "HOLDERPULSE", "Fatal error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
