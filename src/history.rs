//! Bounded score history: the only state persisted across runs.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::score::Penalties;

/// One scored run. Appended at most once per run; ordering by timestamp is
/// a hard invariant of the series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp_utc: DateTime<Utc>,
    pub score: f64,
    pub penalties: Penalties,
}

/// The persisted series, written out as `history.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HistorySeries {
    pub retention_days: i64,
    pub points: Vec<HistoryPoint>,
}

/// How many points one day of collection produces at the configured
/// interval. The length cap follows the actual cadence instead of
/// assuming one.
pub fn points_per_day(interval_minutes: u32) -> usize {
    (1440_u32).div_ceil(interval_minutes) as usize
}

/// Appends `point` to `previous`, drops points older than the retention
/// window, and caps the series length at `points_per_day * retention_days`
/// (oldest first). Points only ever arrive at the tail with an advancing
/// `now`, so the ascending order survives without a re-sort.
pub fn merge(
    mut previous: Vec<HistoryPoint>,
    point: HistoryPoint,
    now: DateTime<Utc>,
    retention_days: i64,
    points_per_day: usize,
) -> Vec<HistoryPoint> {
    previous.push(point);

    let cutoff = now - Duration::days(retention_days);
    previous.retain(|p| p.timestamp_utc >= cutoff);

    let cap = points_per_day.saturating_mul(retention_days.max(0) as usize);
    if previous.len() > cap {
        let excess = previous.len() - cap;
        previous.drain(..excess);
    }

    previous
}

/// Loads the persisted series. A missing or unreadable file starts the
/// series fresh rather than failing the run.
pub fn load(path: &Path) -> Vec<HistoryPoint> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(_) => {
            debug!(path = %path.display(), "No previous history, starting fresh");
            return Vec::new();
        }
    };

    match serde_json::from_str::<HistorySeries>(&content) {
        Ok(series) => series.points,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "History file unreadable, starting fresh");
            Vec::new()
        }
    }
}

pub fn save(path: &Path, series: &HistorySeries) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(series)?)?;
    Ok(())
}
