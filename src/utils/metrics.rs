//! Prometheus metrics service for HolderPulse

use anyhow::Result;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry,
    TextEncoder,
};
use std::path::Path;
use tracing::info;

use crate::modules::growth_evaluator::GrowthReport;

/// Metrics service for Prometheus
pub struct MetricsService {
    registry: Registry,

    // Sampler metrics
    pub samples: CounterVec,

    // Evaluator metrics
    pub growth_percent: GaugeVec,
    pub triggers: Counter,

    // Alert metrics
    pub alerts: CounterVec,

    // Cycle metrics
    pub snapshots_swept: Counter,
    pub cycle_duration: Histogram,
    pub last_run: Gauge,
}

impl MetricsService {
    /// Create a new metrics service
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let samples = CounterVec::new(
            Opts::new("holderpulse_samples_total", "Holder samples fetched"),
            &["status"],
        )?;
        let growth_percent = GaugeVec::new(
            Opts::new("holderpulse_growth_percent", "Last evaluated growth per window"),
            &["entity", "window"],
        )?;
        let triggers = Counter::new(
            "holderpulse_triggers_total",
            "Evaluations that crossed at least one threshold",
        )?;
        let alerts = CounterVec::new(
            Opts::new("holderpulse_alerts_total", "Alert decisions by outcome"),
            &["outcome"],
        )?;
        let snapshots_swept = Counter::new(
            "holderpulse_snapshots_swept_total",
            "Snapshots deleted by retention",
        )?;
        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new("holderpulse_cycle_duration_seconds", "Full cycle duration")
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        )?;
        let last_run = Gauge::new(
            "holderpulse_last_run_timestamp_seconds",
            "Unix time of the last completed cycle",
        )?;

        registry.register(Box::new(samples.clone()))?;
        registry.register(Box::new(growth_percent.clone()))?;
        registry.register(Box::new(triggers.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(snapshots_swept.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;
        registry.register(Box::new(last_run.clone()))?;

        info!(target: "METRICS", "Prometheus metrics initialized");

        Ok(Self {
            registry,
            samples,
            growth_percent,
            triggers,
            alerts,
            snapshots_swept,
            cycle_duration,
            last_run,
        })
    }

    pub fn record_sample(&self, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.samples.with_label_values(&[status]).inc();
    }

    pub fn record_report(&self, report: &GrowthReport) {
        for window in &report.windows {
            self.growth_percent
                .with_label_values(&[report.entity_id.as_str(), window.name.as_str()])
                .set(window.growth_percent);
        }
        if report.triggered {
            self.triggers.inc();
        }
    }

    /// Outcomes: approved, suppressed, gate_error, notify_error
    pub fn record_alert(&self, outcome: &str) {
        self.alerts.with_label_values(&[outcome]).inc();
    }

    /// Get metrics as Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Write the exposition atomically for a node_exporter textfile collector
    pub fn write_textfile<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.render()?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
