//! Trend analysis over a history window: deltas against the aligned previous snapshot,
//! volatility and momentum, multi-model forecast with an error band, IQR anomalies,
//! hour/weekday seasonality and a data-quality score.
//!
//! Everything here is pure. Insufficient data is expressed as `None` or an
//! `InsufficientData` variant, never as an error.

pub mod align;
pub mod forecast;
pub mod math;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset, Weekday};

use crate::domain::{HistoryWindow, Snapshot};

pub use align::{select_previous, Alignment};
pub use forecast::{Confidence, ConfidenceLevel, ErrorMargin, ModelWeights, Predictions};
use math::{linear_fit, mean, quantile, round2, round_to, sample_std};

pub const SEASONAL_MIN_POINTS: usize = 7;
pub const MOMENTUM_MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stability {
    Stable,
    Moderate,
    HighVolatility,
    InsufficientData,
}

impl Stability {
    pub fn classify(volatility: f64, points: usize) -> Self {
        if points < 2 {
            Stability::InsufficientData
        } else if volatility < 5.0 {
            Stability::Stable
        } else if volatility < 15.0 {
            Stability::Moderate
        } else {
            Stability::HighVolatility
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Stable => "STABLE",
            Stability::Moderate => "MODERATE",
            Stability::HighVolatility => "HIGH_VOLATILITY",
            Stability::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Momentum {
    Accelerating,
    Neutral,
    Decelerating,
    InsufficientData,
}

impl Momentum {
    pub fn classify(slope: f64, points: usize) -> Self {
        if points < MOMENTUM_MIN_POINTS {
            Momentum::InsufficientData
        } else if slope > 2.0 {
            Momentum::Accelerating
        } else if slope < -2.0 {
            Momentum::Decelerating
        } else {
            Momentum::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Momentum::Accelerating => "ACCELERATING",
            Momentum::Neutral => "NEUTRAL",
            Momentum::Decelerating => "DECELERATING",
            Momentum::InsufficientData => "INSUFFICIENT_DATA",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    High,
    Low,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::High => "HIGH",
            AnomalyKind::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Anomaly {
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub errors: i64,
    pub kind: AnomalyKind,
    pub z_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WeekdayMean {
    pub weekday: String,
    pub mean_errors: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeasonalPattern {
    pub peak_hour: u8,
    pub quiet_hour: u8,
    /// Monday first; only weekdays that have samples.
    pub by_weekday: Vec<WeekdayMean>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Seasonal {
    Pattern(SeasonalPattern),
    InsufficientForSeasonalAnalysis,
}

impl Seasonal {
    pub fn pattern(&self) -> Option<&SeasonalPattern> {
        match self {
            Seasonal::Pattern(p) => Some(p),
            Seasonal::InsufficientForSeasonalAnalysis => None,
        }
    }
}

/// One window point, kept for charting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub total_errors: i64,
    pub error_density: f64,
    pub reliability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendResult {
    pub current: Snapshot,
    pub previous: Snapshot,
    pub alignment: Alignment,
    pub data_points: usize,

    pub error_delta: i64,
    pub affected_delta: i64,
    pub critical_delta: i64,
    pub reliability_delta: f64,
    /// Percent drop of total errors against `previous` (positive means fewer errors).
    pub improvement_rate: f64,
    pub week_trend: f64,
    pub week_trend_pct: f64,

    pub volatility: f64,
    pub stability: Stability,
    pub slope: f64,
    pub momentum: Momentum,

    pub predictions: Predictions,
    pub error_margin: ErrorMargin,
    pub confidence: Confidence,

    pub anomalies: Vec<Anomaly>,
    pub seasonal: Seasonal,
    pub data_quality_score: f64,
    pub series: Vec<TrendPoint>,
}

/// Analyze a window. `None` when fewer than two snapshots or no older snapshot exists.
pub fn analyze(window: &HistoryWindow, local_offset: UtcOffset) -> Option<TrendResult> {
    let snaps = &window.snapshots;
    let n = snaps.len();
    if n < 2 {
        return None;
    }
    let (prev_idx, alignment) = select_previous(snaps, local_offset)?;
    let current = &snaps[n - 1];
    let previous = &snaps[prev_idx];
    tracing::debug!(
        system = %window.system,
        current = %current.captured_at,
        previous = %previous.captured_at,
        alignment = alignment.as_str(),
        "aligned previous snapshot"
    );

    let totals = window.totals();

    let error_delta = current.total_errors() - previous.total_errors();
    let affected_delta =
        current.affected_services().len() as i64 - previous.affected_services().len() as i64;
    let critical_delta =
        current.critical_services().len() as i64 - previous.critical_services().len() as i64;
    let reliability_delta = round2(current.reliability_score() - previous.reliability_score());
    let improvement_rate = if previous.total_errors() == 0 {
        0.0
    } else {
        round2(
            (previous.total_errors() - current.total_errors()) as f64
                / previous.total_errors() as f64
                * 100.0,
        )
    };
    let (week_trend, week_trend_pct) = week_trend(&totals);

    let volatility = round2(sample_std(&totals));
    let stability = Stability::classify(volatility, n);
    let (slope, _) = linear_fit(&totals);
    let momentum = Momentum::classify(slope, n);

    let predictions = forecast::predict(&totals, error_delta);
    let error_margin = forecast::error_margin(&totals, predictions.consensus, volatility);

    Some(TrendResult {
        current: current.clone(),
        previous: previous.clone(),
        alignment,
        data_points: n,
        error_delta,
        affected_delta,
        critical_delta,
        reliability_delta,
        improvement_rate,
        week_trend,
        week_trend_pct,
        volatility,
        stability,
        slope: round2(slope),
        momentum,
        predictions,
        error_margin,
        confidence: Confidence::for_points(n),
        anomalies: detect_anomalies(snaps, &totals),
        seasonal: seasonal(snaps, local_offset),
        data_quality_score: data_quality_score(snaps),
        series: snaps
            .iter()
            .map(|s| TrendPoint {
                captured_at: s.captured_at,
                total_errors: s.total_errors(),
                error_density: round2(s.error_density()),
                reliability: round2(s.reliability_score()),
            })
            .collect(),
    })
}

/// Mean of the last three totals minus the mean of the oldest `min(3, max(1, n - 3))`.
fn week_trend(totals: &[f64]) -> (f64, f64) {
    let n = totals.len();
    if n == 0 {
        return (0.0, 0.0);
    }
    let recent = mean(&totals[n.saturating_sub(3)..]);
    let older_len = n.saturating_sub(3).clamp(1, 3);
    let older = mean(&totals[..older_len]);
    let diff = recent - older;
    let pct = if older == 0.0 { 0.0 } else { diff / older * 100.0 };
    (round2(diff), round2(pct))
}

fn detect_anomalies(snaps: &[Snapshot], totals: &[f64]) -> Vec<Anomaly> {
    let q1 = quantile(totals, 0.25);
    let q3 = quantile(totals, 0.75);
    let iqr = q3 - q1;
    let low_fence = q1 - 1.5 * iqr;
    let high_fence = q3 + 1.5 * iqr;
    let m = mean(totals);
    let sd = sample_std(totals);

    snaps
        .iter()
        .zip(totals)
        .filter_map(|(s, &v)| {
            let kind = if v > high_fence {
                AnomalyKind::High
            } else if v < low_fence {
                AnomalyKind::Low
            } else {
                return None;
            };
            let z = if sd > 0.0 { (v - m) / sd } else { 0.0 };
            Some(Anomaly {
                captured_at: s.captured_at,
                errors: v as i64,
                kind,
                z_score: round2(z),
            })
        })
        .collect()
}

fn weekday_name(d: Weekday) -> &'static str {
    match d {
        Weekday::Monday => "Monday",
        Weekday::Tuesday => "Tuesday",
        Weekday::Wednesday => "Wednesday",
        Weekday::Thursday => "Thursday",
        Weekday::Friday => "Friday",
        Weekday::Saturday => "Saturday",
        Weekday::Sunday => "Sunday",
    }
}

fn seasonal(snaps: &[Snapshot], local_offset: UtcOffset) -> Seasonal {
    if snaps.len() < SEASONAL_MIN_POINTS {
        return Seasonal::InsufficientForSeasonalAnalysis;
    }

    let mut by_hour: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
    let mut by_day: BTreeMap<u8, (Weekday, Vec<f64>)> = BTreeMap::new();
    for s in snaps {
        let local = s.captured_at.to_offset(local_offset);
        let total = s.total_errors() as f64;
        by_hour.entry(local.hour()).or_default().push(total);
        let wd = local.weekday();
        by_day
            .entry(wd.number_days_from_monday())
            .or_insert_with(|| (wd, Vec::new()))
            .1
            .push(total);
    }

    let hour_means: Vec<(u8, f64)> = by_hour.iter().map(|(h, v)| (*h, mean(v))).collect();
    // Earliest hour wins ties in both directions.
    let peak_hour = hour_means
        .iter()
        .fold(None::<(u8, f64)>, |best, &(h, m)| match best {
            Some((_, bm)) if bm >= m => best,
            _ => Some((h, m)),
        })
        .map(|(h, _)| h)
        .unwrap_or(0);
    let quiet_hour = hour_means
        .iter()
        .fold(None::<(u8, f64)>, |best, &(h, m)| match best {
            Some((_, bm)) if bm <= m => best,
            _ => Some((h, m)),
        })
        .map(|(h, _)| h)
        .unwrap_or(0);

    Seasonal::Pattern(SeasonalPattern {
        peak_hour,
        quiet_hour,
        by_weekday: by_day
            .values()
            .map(|(wd, v)| WeekdayMean {
                weekday: weekday_name(*wd).to_string(),
                mean_errors: round2(mean(v)),
                samples: v.len(),
            })
            .collect(),
    })
}

/// `100 * (0.4 * completeness + 0.3 * consistency + 0.3 * timeliness)`.
///
/// Only successfully parsed snapshots reach a window, so completeness is 1.
fn data_quality_score(snaps: &[Snapshot]) -> f64 {
    let services: Vec<f64> = snaps.iter().map(|s| s.total_services() as f64).collect();
    let m = mean(&services);
    let sd = sample_std(&services);
    let consistency = if m > 0.0 {
        (1.0 - sd / m).clamp(0.0, 1.0)
    } else if sd == 0.0 {
        1.0
    } else {
        0.0
    };
    let timeliness = (snaps.len() as f64 / SEASONAL_MIN_POINTS as f64).min(1.0);
    round_to(100.0 * (0.4 + 0.3 * consistency + 0.3 * timeliness), 1)
}
