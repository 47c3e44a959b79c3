use serde::{Deserialize, Serialize};

use crate::stats::{RiskLevel, SlaStatus, SystemStats, SystemStatus, TrendStatus, NO_DATA_ACTION};
use crate::trend::{Momentum, Stability};

use super::{fmt2, signed2};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendationKind {
    ImmediateAction,
    Investigate,
    Degrading,
    Volatility,
    Acceleration,
    SlaBreach,
    SlaAtRisk,
    HighRisk,
    PredictiveAlert,
    Anomalies,
    NoData,
    Healthy,
    FollowUp,
}

/// Section of the executive summary a recommendation is listed under.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bucket {
    Immediate,
    ShortTerm,
    Predictive,
}

impl RecommendationKind {
    pub fn bucket(&self) -> Bucket {
        match self {
            RecommendationKind::ImmediateAction
            | RecommendationKind::SlaBreach
            | RecommendationKind::HighRisk
            | RecommendationKind::NoData => Bucket::Immediate,
            RecommendationKind::Investigate
            | RecommendationKind::Degrading
            | RecommendationKind::Volatility
            | RecommendationKind::SlaAtRisk
            | RecommendationKind::Healthy
            | RecommendationKind::FollowUp => Bucket::ShortTerm,
            RecommendationKind::Acceleration
            | RecommendationKind::PredictiveAlert
            | RecommendationKind::Anomalies => Bucket::Predictive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub text: String,
}

impl Recommendation {
    fn new(kind: RecommendationKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }
}

pub const HEALTHY_TEXT: &str = "system healthy";

/// Rule-ordered recommendation bullets for one system.
///
/// Snapshot-derived rules (SLA, risk, investigation) are skipped for `NO_DATA`, which gets a
/// single data-feed bullet instead. Trend rules apply whenever a trend is present.
pub fn recommendations(stats: &SystemStats) -> Vec<Recommendation> {
    use RecommendationKind as K;
    let mut out = Vec::new();

    match stats.status {
        SystemStatus::Critical if stats.critical_services > 0 => out.push(Recommendation::new(
            K::ImmediateAction,
            format!(
                "Immediate action: {} critical service(s) at or above the error threshold ({})",
                stats.critical_services,
                stats.critical_services_list.join(", ")
            ),
        )),
        SystemStatus::Critical => out.push(Recommendation::new(
            K::ImmediateAction,
            format!(
                "Immediate action: stability index {} is below 50",
                fmt2(stats.stability_index)
            ),
        )),
        SystemStatus::Warning if stats.affected_services > 0 => out.push(Recommendation::new(
            K::Investigate,
            format!(
                "Investigate {} affected service(s): {}",
                stats.affected_services,
                stats.affected_services_list.join(", ")
            ),
        )),
        SystemStatus::NoData => out.push(Recommendation::new(
            K::NoData,
            "No snapshot received: verify the upstream extractor for this system",
        )),
        _ => {}
    }

    if let Some(t) = &stats.trend {
        if stats.trend_status == TrendStatus::Degrading {
            out.push(Recommendation::new(
                K::Degrading,
                format!(
                    "Degradation: errors up by {} against the previous snapshot ({} to {})",
                    t.error_delta, t.previous_total_errors, stats.total_errors
                ),
            ));
        }
        if t.stability == Stability::HighVolatility {
            out.push(Recommendation::new(
                K::Volatility,
                format!(
                    "High volatility: error totals deviate by {} across the window",
                    fmt2(t.volatility)
                ),
            ));
        }
        if t.momentum == Momentum::Accelerating {
            out.push(Recommendation::new(
                K::Acceleration,
                "Error growth is accelerating across the history window",
            ));
        }
    }

    if stats.status != SystemStatus::NoData {
        match stats.sla.status {
            SlaStatus::Breach => out.push(Recommendation::new(
                K::SlaBreach,
                format!(
                    "SLA breach: uptime {}% is below 95%",
                    fmt2(stats.sla.uptime_pct)
                ),
            )),
            SlaStatus::AtRisk => out.push(Recommendation::new(
                K::SlaAtRisk,
                format!(
                    "SLA at risk: uptime {}% is below 99.5%",
                    fmt2(stats.sla.uptime_pct)
                ),
            )),
            SlaStatus::Meeting => {}
        }
        if stats.risk_level == RiskLevel::High {
            out.push(Recommendation::new(
                K::HighRisk,
                format!(
                    "High risk: business impact {}",
                    stats.business_impact.as_str()
                ),
            ));
        }
    }

    if let Some(t) = &stats.trend {
        let ceiling = stats.total_errors as f64 + t.error_margin.range;
        if t.predictions.consensus as f64 > ceiling {
            out.push(Recommendation::new(
                K::PredictiveAlert,
                format!(
                    "Predictive alert: next snapshot forecast at {} errors ({} above current)",
                    t.predictions.consensus,
                    signed2(t.predictions.consensus as f64 - stats.total_errors as f64)
                ),
            ));
        }
        if !t.anomalies.is_empty() {
            out.push(Recommendation::new(
                K::Anomalies,
                format!(
                    "{} anomalous snapshot(s) detected in the history window",
                    t.anomalies.len()
                ),
            ));
        }
    }

    if out.is_empty() {
        out.push(Recommendation::new(K::Healthy, HEALTHY_TEXT));
    }

    if let Some(action) = &stats.recommended_action {
        if action != NO_DATA_ACTION {
            out.push(Recommendation::new(K::FollowUp, action.clone()));
        }
    }
    out
}
