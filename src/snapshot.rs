//! Snapshot assembly: the three emitted artifacts consumed by the
//! presentation layer.
//!
//! `latest.json` carries the scored content, `history.json` the bounded
//! series, and `meta.json` a content-free manifest safe for lightweight
//! polling. Everything here is derived per run; nothing owns persisted
//! identity beyond the files themselves.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

use crate::history::HistorySeries;
use crate::lineage::LineageMetric;
use crate::score::Penalties;
use crate::sources::SourceStatus;
use crate::sources::air::AirQualitySummary;
use crate::sources::transit::{LineStatus, StopArrivals};
use crate::sources::weather::{WeatherSlice, WeatherSummary};

pub const SCHEMA_VERSION: u8 = 1;

pub const LATEST_FILE: &str = "latest.json";
pub const HISTORY_FILE: &str = "history.json";
pub const META_FILE: &str = "meta.json";

/// How many disrupted lines the digest lists.
const DIGEST_LINE_LIMIT: usize = 5;

/// One-line-per-metric KPI summary.
#[derive(Debug, Serialize)]
pub struct Kpis {
    pub disrupted_line_count: usize,
    pub worst_median_wait_minutes: Option<f64>,
    pub max_rain_probability: Option<f64>,
    pub max_wind_speed: Option<f64>,
    pub max_air_index: Option<u8>,
}

#[derive(Debug, Serialize)]
pub struct DisruptedLine {
    pub name: String,
    pub status: String,
    pub points: f64,
}

#[derive(Debug, Serialize)]
pub struct WorstStop {
    pub label: String,
    pub median_minutes: f64,
}

/// The "what changed" digest shown at the top of the presentation layer.
#[derive(Debug, Serialize)]
pub struct Digest {
    pub disrupted_lines: Vec<DisruptedLine>,
    pub worst_stop: Option<WorstStop>,
    pub max_rain_probability: Option<f64>,
    pub air_headline: Option<String>,
}

/// Full normalized detail for consumers that want more than the digest.
#[derive(Debug, Serialize)]
pub struct Detail {
    pub lines: Vec<LineStatus>,
    pub stops: Vec<StopArrivals>,
    pub weather: Option<WeatherSlice>,
    pub weather_summary: Option<WeatherSummary>,
    pub air: Option<AirQualitySummary>,
}

#[derive(Debug, Serialize)]
pub struct LatestSnapshot {
    pub schema_version: u8,
    pub generated_at: DateTime<Utc>,
    pub score: f64,
    pub weighted_total: f64,
    pub penalties: Penalties,
    pub kpis: Kpis,
    pub digest: Digest,
    pub detail: Detail,
    pub sources: BTreeMap<String, SourceStatus>,
    pub provenance: serde_json::Value,
    pub lineage: Vec<LineageMetric>,
    pub warnings: Vec<String>,
}

/// Intentionally free of any scored content.
#[derive(Debug, Serialize)]
pub struct Meta {
    pub project: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub sources: BTreeMap<String, SourceStatus>,
    pub provenance: serde_json::Value,
    pub files: BTreeMap<String, String>,
}

impl Meta {
    pub fn new(
        version: &str,
        generated_at: DateTime<Utc>,
        sources: BTreeMap<String, SourceStatus>,
        provenance: serde_json::Value,
    ) -> Self {
        let mut files = BTreeMap::new();
        files.insert("latest".to_string(), LATEST_FILE.to_string());
        files.insert("history".to_string(), HISTORY_FILE.to_string());
        files.insert("meta".to_string(), META_FILE.to_string());

        Self {
            project: env!("CARGO_PKG_NAME").to_string(),
            version: version.to_string(),
            generated_at,
            sources,
            provenance,
            files,
        }
    }
}

/// Ranks disrupted lines by severity descending, then name ascending, and
/// keeps the worst few alongside the other headline numbers.
pub fn build_digest(
    lines: &[LineStatus],
    stops: &[StopArrivals],
    weather: Option<&WeatherSummary>,
    air: Option<&AirQualitySummary>,
) -> Digest {
    let mut disrupted: Vec<&LineStatus> =
        lines.iter().filter(|l| l.severity_points > 0.0).collect();
    disrupted.sort_by(|a, b| {
        b.severity_points
            .total_cmp(&a.severity_points)
            .then_with(|| a.name.cmp(&b.name))
    });

    let disrupted_lines = disrupted
        .into_iter()
        .take(DIGEST_LINE_LIMIT)
        .map(|l| DisruptedLine {
            name: l.name.clone(),
            status: l.status_text.clone(),
            points: l.severity_points,
        })
        .collect();

    let worst_stop = stops
        .iter()
        .filter_map(|s| s.median_minutes.map(|m| (s, m)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(s, m)| WorstStop { label: s.label.clone(), median_minutes: m });

    let air_headline = air.and_then(|a| {
        let index = a.max_index?;
        let band = a.band.as_deref()?;
        Some(match &a.station_name {
            Some(station) => format!("Air quality {band} (index {index}) at {station}"),
            None => format!("Air quality {band} (index {index})"),
        })
    });

    Digest {
        disrupted_lines,
        worst_stop,
        max_rain_probability: weather.and_then(|w| w.max_rain_probability),
        air_headline,
    }
}

pub fn build_kpis(
    lines: &[LineStatus],
    stops: &[StopArrivals],
    weather: Option<&WeatherSummary>,
    air: Option<&AirQualitySummary>,
) -> Kpis {
    Kpis {
        disrupted_line_count: lines.iter().filter(|l| l.severity_points > 0.0).count(),
        worst_median_wait_minutes: stops
            .iter()
            .filter_map(|s| s.median_minutes)
            .reduce(f64::max),
        max_rain_probability: weather.and_then(|w| w.max_rain_probability),
        max_wind_speed: weather.and_then(|w| w.max_wind_speed),
        max_air_index: air.and_then(|a| a.max_index),
    }
}

/// Writes the three artifacts. The directory is created on demand; any
/// write failure is surfaced (the caller has already logged all scoring
/// work, so nothing scored is lost silently).
pub fn write_artifacts(
    out_dir: &Path,
    latest: &LatestSnapshot,
    series: &HistorySeries,
    meta: &Meta,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;

    std::fs::write(out_dir.join(LATEST_FILE), serde_json::to_string_pretty(latest)?)?;
    std::fs::write(out_dir.join(HISTORY_FILE), serde_json::to_string_pretty(series)?)?;
    std::fs::write(out_dir.join(META_FILE), serde_json::to_string_pretty(meta)?)?;

    info!(
        dir = %out_dir.display(),
        score = latest.score,
        points = series.points.len(),
        "Artifacts written"
    );
    Ok(())
}
