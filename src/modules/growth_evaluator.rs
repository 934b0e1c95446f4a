//! Growth Evaluator - turns holder-count history into per-window pump signals
//!
//! For every configured window a reference count is resolved from history and
//! compared against the freshly sampled count. Growth is one-sided: a missing
//! reference, a non-positive reference or a flat/declining count is zero.
//! An entity is triggered when ANY window meets its own threshold.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::log_growth;

/// One holder-count observation for an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entity_id: String,
    pub label: String,
    pub holders: Option<i64>,
    pub error: Option<String>,
    pub observed_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn success(entity_id: &str, label: &str, holders: i64, observed_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            label: label.to_string(),
            holders: Some(holders),
            error: None,
            observed_at,
        }
    }

    pub fn failure(entity_id: &str, error: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            label: String::new(),
            holders: None,
            error: Some(error.to_string()),
            observed_at,
        }
    }

    /// Successful snapshots are the only ones usable as references
    pub fn usable_count(&self) -> Option<i64> {
        match (&self.error, self.holders) {
            (None, Some(count)) if count >= 0 => Some(count),
            _ => None,
        }
    }
}

/// How a window picks its reference snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowKind {
    /// Latest successful snapshot before the current sample
    Previous,
    /// Successful snapshot closest to `now - duration`, no older than that
    /// instant and at most `tolerance` newer
    LookBack(Duration),
}

/// A named growth window with its alert threshold (percent)
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub name: String,
    pub kind: WindowKind,
    pub threshold_percent: f64,
}

/// Read access to an entity's stored snapshots.
///
/// Entity ids are matched case-insensitively. Only successful snapshots
/// strictly older than `before` are candidates. `closest_to` only considers
/// snapshots in `[target, target + tolerance]`, so a look-back never reaches
/// further into the past than its own horizon.
pub trait HistoryAccessor {
    fn previous_before(&self, entity_id: &str, before: DateTime<Utc>) -> Result<Option<Snapshot>>;

    fn closest_to(
        &self,
        entity_id: &str,
        target: DateTime<Utc>,
        tolerance: Duration,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>>;
}

/// In-memory history, used for dry evaluation and tests
impl HistoryAccessor for [Snapshot] {
    fn previous_before(&self, entity_id: &str, before: DateTime<Utc>) -> Result<Option<Snapshot>> {
        Ok(self
            .iter()
            .filter(|s| candidate(s, entity_id, before))
            .max_by_key(|s| s.observed_at)
            .cloned())
    }

    fn closest_to(
        &self,
        entity_id: &str,
        target: DateTime<Utc>,
        tolerance: Duration,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        Ok(self
            .iter()
            .filter(|s| candidate(s, entity_id, before))
            .filter(|s| within_tolerance(s.observed_at, target, tolerance))
            .min_by_key(|s| s.observed_at)
            .cloned())
    }
}

pub(crate) fn within_tolerance(
    observed_at: DateTime<Utc>,
    target: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    observed_at >= target && observed_at - target <= tolerance
}

fn candidate(snapshot: &Snapshot, entity_id: &str, before: DateTime<Utc>) -> bool {
    snapshot.entity_id.eq_ignore_ascii_case(entity_id)
        && snapshot.usable_count().is_some()
        && snapshot.observed_at < before
}

/// Wraps a history accessor and pins the "previous" reference to a fixed
/// count. Look-back references still come from the wrapped accessor.
pub struct SyntheticPrevious<'a, H: HistoryAccessor + ?Sized> {
    inner: &'a H,
    count: i64,
}

impl<'a, H: HistoryAccessor + ?Sized> SyntheticPrevious<'a, H> {
    pub fn new(inner: &'a H, count: i64) -> Self {
        Self { inner, count }
    }
}

impl<H: HistoryAccessor + ?Sized> HistoryAccessor for SyntheticPrevious<'_, H> {
    fn previous_before(&self, entity_id: &str, before: DateTime<Utc>) -> Result<Option<Snapshot>> {
        Ok(Some(Snapshot::success(
            entity_id,
            "synthetic",
            self.count,
            before - Duration::milliseconds(1),
        )))
    }

    fn closest_to(
        &self,
        entity_id: &str,
        target: DateTime<Utc>,
        tolerance: Duration,
        before: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        self.inner.closest_to(entity_id, target, tolerance, before)
    }
}

/// Percentage growth of `current` over `reference`, clamped at zero
pub fn growth(current: i64, reference: Option<i64>) -> f64 {
    match reference {
        Some(reference) if reference > 0 && current > reference => {
            (current - reference) as f64 / reference as f64 * 100.0
        }
        _ => 0.0,
    }
}

/// Result of one window
#[derive(Debug, Clone, Serialize)]
pub struct WindowGrowth {
    pub name: String,
    pub reference: Option<i64>,
    pub reference_at: Option<DateTime<Utc>>,
    pub growth_percent: f64,
    pub threshold_percent: f64,
    pub crossed: bool,
}

/// Result of evaluating one entity
#[derive(Debug, Clone, Serialize)]
pub struct GrowthReport {
    pub entity_id: String,
    pub current_count: i64,
    pub evaluated_at: DateTime<Utc>,
    pub windows: Vec<WindowGrowth>,
    pub triggered: bool,
}

impl GrowthReport {
    pub fn growth_for(&self, name: &str) -> Option<f64> {
        self.windows
            .iter()
            .find(|w| w.name == name)
            .map(|w| w.growth_percent)
    }

    pub fn crossed_windows(&self) -> impl Iterator<Item = &WindowGrowth> {
        self.windows.iter().filter(|w| w.crossed)
    }
}

/// Multi-window growth evaluator
#[derive(Debug, Clone)]
pub struct GrowthEvaluator {
    windows: Vec<WindowSpec>,
    tolerance: Duration,
}

impl GrowthEvaluator {
    pub fn new(windows: Vec<WindowSpec>, tolerance: Duration) -> Self {
        Self { windows, tolerance }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.windows.clone(), config.reference_tolerance())
    }

    pub fn windows(&self) -> &[WindowSpec] {
        &self.windows
    }

    /// Evaluate a freshly sampled count observed at `now` against history.
    ///
    /// Errors only come from the history accessor; an entity without any
    /// usable history simply yields `triggered = false`.
    pub fn evaluate<H: HistoryAccessor + ?Sized>(
        &self,
        entity_id: &str,
        current_count: i64,
        now: DateTime<Utc>,
        history: &H,
    ) -> Result<GrowthReport> {
        let mut windows = Vec::with_capacity(self.windows.len());

        for window_spec in &self.windows {
            let reference = match window_spec.kind {
                WindowKind::Previous => history.previous_before(entity_id, now)?,
                WindowKind::LookBack(lookback) => match now.checked_sub_signed(lookback) {
                    Some(target) => history.closest_to(entity_id, target, self.tolerance, now)?,
                    None => None,
                },
            };

            let reference_count = reference.as_ref().and_then(Snapshot::usable_count);
            let growth_percent = growth(current_count, reference_count);
            let crossed = growth_percent > 0.0 && growth_percent >= window_spec.threshold_percent;

            debug!(
                target: "EVALUATOR",
                entity = %entity_id,
                window = %window_spec.name,
                current = current_count,
                reference = ?reference_count,
                growth = growth_percent,
                threshold = window_spec.threshold_percent,
                crossed,
                "Window evaluated"
            );

            windows.push(WindowGrowth {
                name: window_spec.name.clone(),
                reference: reference_count,
                reference_at: reference.map(|s| s.observed_at),
                growth_percent,
                threshold_percent: window_spec.threshold_percent,
                crossed,
            });
        }

        let triggered = windows.iter().any(|w| w.crossed);
        if triggered {
            let crossed: Vec<_> = windows
                .iter()
                .filter(|w| w.crossed)
                .map(|w| format!("{}={:.2}%", w.name, w.growth_percent))
                .collect();
            log_growth!("{} crossed threshold: {}", entity_id, crossed.join(", "));
        }

        Ok(GrowthReport {
            entity_id: entity_id.to_string(),
            current_count,
            evaluated_at: now,
            windows,
            triggered,
        })
    }
}
