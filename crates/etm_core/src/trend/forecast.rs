use serde::{Deserialize, Serialize};

use super::math::{linear_fit, mean, round2};

pub const MOVING_AVG_MIN_POINTS: usize = 3;
pub const REGRESSION_MIN_POINTS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ModelWeights {
    pub simple: f64,
    pub moving_avg: f64,
    pub regression: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Predictions {
    pub simple: i64,
    pub moving_avg: Option<i64>,
    pub regression: Option<i64>,
    pub consensus: i64,
    /// Normalized over the models that produced a value.
    pub weights: ModelWeights,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ErrorMargin {
    /// Half-width of the band.
    pub range: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::High => "HIGH",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Confidence {
    pub level: ConfidenceLevel,
    pub percent: u8,
}

impl Confidence {
    pub fn for_points(n: usize) -> Self {
        match n {
            0..=3 => Self {
                level: ConfidenceLevel::Low,
                percent: 55,
            },
            4..=6 => Self {
                level: ConfidenceLevel::Medium,
                percent: 70,
            },
            _ => Self {
                level: ConfidenceLevel::High,
                percent: 85,
            },
        }
    }
}

fn non_negative(v: f64) -> i64 {
    v.max(0.0).round() as i64
}

/// Next-step forecasts from the simple, moving-average and regression models.
///
/// `totals` is the window's error totals in capture order; `error_delta` is current minus the
/// aligned previous snapshot. Models lacking points are left out of the consensus.
pub fn predict(totals: &[f64], error_delta: i64) -> Predictions {
    let n = totals.len();
    let current = totals.last().copied().unwrap_or(0.0);
    let delta = error_delta as f64;

    let simple = non_negative(current + delta);
    let moving_avg = (n >= MOVING_AVG_MIN_POINTS)
        .then(|| non_negative(mean(&totals[n - MOVING_AVG_MIN_POINTS..]) + delta));
    let regression = (n >= REGRESSION_MIN_POINTS).then(|| {
        let (slope, intercept) = linear_fit(totals);
        non_negative(intercept + slope * n as f64)
    });

    let raw = ModelWeights {
        simple: if regression.is_some() { 0.2 } else { 0.3 },
        moving_avg: if moving_avg.is_some() { 0.4 } else { 0.0 },
        regression: if regression.is_some() { 0.4 } else { 0.0 },
    };
    let total = raw.simple + raw.moving_avg + raw.regression;
    let weights = ModelWeights {
        simple: raw.simple / total,
        moving_avg: raw.moving_avg / total,
        regression: raw.regression / total,
    };

    let blended = weights.simple * simple as f64
        + weights.moving_avg * moving_avg.unwrap_or(0) as f64
        + weights.regression * regression.unwrap_or(0) as f64;

    Predictions {
        simple,
        moving_avg,
        regression,
        consensus: non_negative(blended),
        weights,
    }
}

/// Band around the consensus.
///
/// Below three points the band is 30% of the consensus. Otherwise it is the mean absolute error
/// of the naive "last value plus last step" predictor plus half the volatility.
pub fn error_margin(totals: &[f64], consensus: i64, volatility: f64) -> ErrorMargin {
    let c = consensus as f64;
    let range = if totals.len() < 3 {
        0.3 * c
    } else {
        let errors: Vec<f64> = (2..totals.len())
            .map(|i| {
                let pred = totals[i - 1] + (totals[i - 1] - totals[i - 2]);
                (pred - totals[i]).abs()
            })
            .collect();
        mean(&errors) + 0.5 * volatility
    };
    let range = round2(range.max(0.0));
    ErrorMargin {
        range,
        lower: round2((c - range).max(0.0)),
        upper: round2(c + range),
    }
}
