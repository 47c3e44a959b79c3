use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::domain::{DisplayHints, ServiceTotal, Snapshot, SystemDescriptor};
use crate::trend::math::round2;
use crate::trend::{
    Alignment, Anomaly, Confidence, ErrorMargin, Momentum, Predictions, Seasonal, Stability,
    TrendResult,
};

pub const SLA_MEETING_PCT: f64 = 99.5;
pub const SLA_AT_RISK_PCT: f64 = 95.0;
/// Services listed in the service-impact panel.
pub const SERVICE_BREAKDOWN_LIMIT: usize = 10;
pub const NO_DATA_ACTION: &str = "NO_DATA";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Healthy,
    Warning,
    Critical,
    NoData,
}

impl SystemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemStatus::Healthy => "HEALTHY",
            SystemStatus::Warning => "WARNING",
            SystemStatus::Critical => "CRITICAL",
            SystemStatus::NoData => "NO_DATA",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            SystemStatus::Healthy => "✅",
            SystemStatus::Warning => "⚠️",
            SystemStatus::Critical => "🚨",
            SystemStatus::NoData => "❔",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    pub fn business_impact(&self) -> BusinessImpact {
        match self {
            RiskLevel::Low => BusinessImpact::Minimal,
            RiskLevel::Medium => BusinessImpact::Moderate,
            RiskLevel::High => BusinessImpact::Severe,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessImpact {
    Minimal,
    Moderate,
    Severe,
}

impl BusinessImpact {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusinessImpact::Minimal => "MINIMAL",
            BusinessImpact::Moderate => "MODERATE",
            BusinessImpact::Severe => "SEVERE",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlaStatus {
    Meeting,
    AtRisk,
    Breach,
}

impl SlaStatus {
    pub fn classify(uptime_pct: f64) -> Self {
        if uptime_pct >= SLA_MEETING_PCT {
            SlaStatus::Meeting
        } else if uptime_pct >= SLA_AT_RISK_PCT {
            SlaStatus::AtRisk
        } else {
            SlaStatus::Breach
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlaStatus::Meeting => "MEETING",
            SlaStatus::AtRisk => "AT_RISK",
            SlaStatus::Breach => "BREACH",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sla {
    pub uptime_pct: f64,
    pub status: SlaStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendStatus {
    Improving,
    Degrading,
    #[default]
    Stable,
}

impl TrendStatus {
    pub fn from_delta(error_delta: i64) -> Self {
        match error_delta {
            d if d < 0 => TrendStatus::Improving,
            d if d > 0 => TrendStatus::Degrading,
            _ => TrendStatus::Stable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrendStatus::Improving => "IMPROVING",
            TrendStatus::Degrading => "DEGRADING",
            TrendStatus::Stable => "STABLE",
        }
    }

    pub fn indicator(&self) -> &'static str {
        match self {
            TrendStatus::Improving => "📈",
            TrendStatus::Degrading => "📉",
            TrendStatus::Stable => "➡️",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ErrorDistribution {
    pub zero: usize,
    /// 1 to 5 errors.
    pub low: usize,
    /// 6 to 10 errors.
    pub medium: usize,
    /// More than 10 errors.
    pub high: usize,
}

/// Trend fields copied out of `TrendResult` for rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendDigest {
    #[serde(with = "time::serde::rfc3339")]
    pub previous_captured_at: OffsetDateTime,
    pub previous_total_errors: i64,
    pub alignment: Alignment,
    pub data_points: usize,
    pub error_delta: i64,
    pub affected_delta: i64,
    pub critical_delta: i64,
    pub reliability_delta: f64,
    pub improvement_rate: f64,
    pub week_trend: f64,
    pub week_trend_pct: f64,
    pub volatility: f64,
    pub stability: Stability,
    pub momentum: Momentum,
    pub predictions: Predictions,
    pub error_margin: ErrorMargin,
    pub confidence: Confidence,
    pub anomalies: Vec<Anomaly>,
    pub seasonal: Seasonal,
    pub data_quality_score: f64,
}

impl TrendDigest {
    fn from_trend(t: &TrendResult) -> Self {
        Self {
            previous_captured_at: t.previous.captured_at,
            previous_total_errors: t.previous.total_errors(),
            alignment: t.alignment,
            data_points: t.data_points,
            error_delta: t.error_delta,
            affected_delta: t.affected_delta,
            critical_delta: t.critical_delta,
            reliability_delta: t.reliability_delta,
            improvement_rate: t.improvement_rate,
            week_trend: t.week_trend,
            week_trend_pct: t.week_trend_pct,
            volatility: t.volatility,
            stability: t.stability,
            momentum: t.momentum,
            predictions: t.predictions.clone(),
            error_margin: t.error_margin,
            confidence: t.confidence,
            anomalies: t.anomalies.clone(),
            seasonal: t.seasonal.clone(),
            data_quality_score: t.data_quality_score,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemStats {
    pub code: String,
    pub display: DisplayHints,
    pub status: SystemStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub captured_at: Option<OffsetDateTime>,

    pub total_errors: i64,
    pub total_services: usize,
    pub affected_services: usize,
    pub critical_services: usize,

    pub health_pct: f64,
    pub avg_errors_per_service: f64,
    pub error_density: f64,
    pub critical_ratio: f64,
    pub top_error_service: Option<ServiceTotal>,
    pub error_distribution: ErrorDistribution,

    pub stability_index: f64,
    pub risk_level: RiskLevel,
    pub business_impact: BusinessImpact,
    pub sla: Sla,
    pub trend_status: TrendStatus,
    pub trend: Option<TrendDigest>,

    pub affected_services_list: Vec<String>,
    pub critical_services_list: Vec<String>,
    /// Highest error counts first, at most `SERVICE_BREAKDOWN_LIMIT`.
    pub service_breakdown: Vec<ServiceTotal>,
    pub recommended_action: Option<String>,
}

impl SystemStats {
    pub fn has_trend(&self) -> bool {
        self.trend.is_some()
    }

    pub fn error_delta(&self) -> i64 {
        self.trend.as_ref().map(|t| t.error_delta).unwrap_or(0)
    }
}

/// `0.4 * health + 0.3 * max(0, 100 - 10 * density) + 0.3 * max(0, 100 - 200 * criticalRatio)`,
/// clamped to `[0, 100]`.
pub fn stability_index(health_pct: f64, error_density: f64, critical_ratio: f64) -> f64 {
    let raw = 0.4 * health_pct
        + 0.3 * (100.0 - 10.0 * error_density).max(0.0)
        + 0.3 * (100.0 - 200.0 * critical_ratio).max(0.0);
    round2(raw.clamp(0.0, 100.0))
}

pub fn risk_level(critical_ratio: f64, error_density: f64) -> RiskLevel {
    if critical_ratio > 0.3 || error_density > 10.0 {
        RiskLevel::High
    } else if critical_ratio > 0.1 || error_density > 5.0 {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

fn classify_status(snapshot: Option<&Snapshot>, critical: usize, stability_index: f64) -> SystemStatus {
    let Some(snapshot) = snapshot else {
        return SystemStatus::NoData;
    };
    if snapshot.total_errors() == 0 {
        SystemStatus::Healthy
    } else if critical > 0 || stability_index < 50.0 {
        SystemStatus::Critical
    } else if stability_index < 70.0 {
        SystemStatus::Warning
    } else {
        SystemStatus::Healthy
    }
}

fn recommended_action(status: SystemStatus, critical: usize, affected: usize) -> Option<String> {
    match status {
        SystemStatus::Critical if critical > 0 => Some(format!(
            "Escalate {critical} critical service(s) to the on-call team"
        )),
        SystemStatus::Critical => {
            Some("Escalate the error spread to the on-call team".to_string())
        }
        SystemStatus::Warning => Some(format!(
            "Review the {affected} affected service(s) before the next snapshot"
        )),
        SystemStatus::NoData => Some(NO_DATA_ACTION.to_string()),
        SystemStatus::Healthy => None,
    }
}

fn distribution(services: &[ServiceTotal]) -> ErrorDistribution {
    let mut d = ErrorDistribution::default();
    for s in services {
        match s.errors {
            e if e <= 0 => d.zero += 1,
            1..=5 => d.low += 1,
            6..=10 => d.medium += 1,
            _ => d.high += 1,
        }
    }
    d
}

fn sorted_names(services: Vec<&ServiceTotal>) -> Vec<String> {
    let mut names: Vec<String> = services.into_iter().map(|s| s.name.clone()).collect();
    names.sort();
    names
}

/// Build the stats for one system. Pure; either input may be absent.
///
/// Without a snapshot the status is `NO_DATA` and counts are zero, but trend deltas are
/// still carried. Without a trend, trend fields keep their defaults.
pub fn aggregate(
    system: &SystemDescriptor,
    snapshot: Option<&Snapshot>,
    trend: Option<&TrendResult>,
) -> SystemStats {
    let services: &[ServiceTotal] = snapshot.map(|s| s.by_service()).unwrap_or(&[]);
    let total_services = services.len();
    let total_errors = snapshot.map(|s| s.total_errors()).unwrap_or(0);
    let affected: Vec<&ServiceTotal> = services.iter().filter(|s| s.errors > 0).collect();
    let critical: Vec<&ServiceTotal> = snapshot
        .map(|s| s.critical_services())
        .unwrap_or_default();

    let affected_count = affected.len();
    let critical_count = critical.len();
    let reliability = snapshot.map(|s| s.reliability_score()).unwrap_or(0.0);
    let density = snapshot.map(|s| s.error_density()).unwrap_or(0.0);
    let critical_ratio = if total_services > 0 {
        critical_count as f64 / total_services as f64
    } else {
        0.0
    };

    let health_pct = round2(reliability);
    let stability_index = stability_index(health_pct, density, critical_ratio);
    let status = classify_status(snapshot, critical_count, stability_index);
    let risk = risk_level(critical_ratio, density);
    let uptime = round2(reliability);

    let top_error_service = services
        .iter()
        .filter(|s| s.errors > 0)
        .fold(None::<&ServiceTotal>, |best, s| match best {
            Some(b) if b.errors >= s.errors => Some(b),
            _ => Some(s),
        })
        .cloned();

    let mut breakdown: Vec<ServiceTotal> = services.to_vec();
    breakdown.sort_by(|a, b| b.errors.cmp(&a.errors).then_with(|| a.name.cmp(&b.name)));
    breakdown.truncate(SERVICE_BREAKDOWN_LIMIT);

    let digest = trend.map(TrendDigest::from_trend);
    let trend_status = digest
        .as_ref()
        .map(|d| TrendStatus::from_delta(d.error_delta))
        .unwrap_or_default();

    SystemStats {
        code: system.code.clone(),
        display: system.display.clone(),
        status,
        captured_at: snapshot.map(|s| s.captured_at),
        total_errors,
        total_services,
        affected_services: affected_count,
        critical_services: critical_count,
        health_pct,
        avg_errors_per_service: round2(density),
        error_density: round2(density),
        critical_ratio: round2(critical_ratio),
        top_error_service,
        error_distribution: distribution(services),
        stability_index,
        risk_level: risk,
        business_impact: risk.business_impact(),
        sla: Sla {
            uptime_pct: uptime,
            status: SlaStatus::classify(uptime),
        },
        trend_status,
        trend: digest,
        affected_services_list: sorted_names(affected),
        critical_services_list: sorted_names(critical),
        service_breakdown: breakdown,
        recommended_action: recommended_action(status, critical_count, affected_count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SnapshotRow;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use time::macros::datetime;

    fn system() -> SystemDescriptor {
        SystemDescriptor {
            code: "CIS".to_string(),
            directory: PathBuf::from("/data/cis"),
            schema: Vec::new(),
            skip_rows: 0,
            recipients: Vec::new(),
            display: DisplayHints {
                color: "#123456".to_string(),
                icon: "🏦".to_string(),
            },
            attachment: None,
            attach_snapshot: true,
        }
    }

    fn snapshot(rows: &[(&str, i64)]) -> Snapshot {
        Snapshot::new(
            "CIS",
            datetime!(2025-03-02 08:00 UTC),
            rows.iter()
                .map(|(s, e)| SnapshotRow {
                    service_name: s.to_string(),
                    error_count: *e,
                    extra: Default::default(),
                })
                .collect(),
        )
    }

    #[test]
    fn single_healthy_service() {
        let stats = aggregate(&system(), Some(&snapshot(&[("svc-a", 0)])), None);
        assert_eq!(stats.status, SystemStatus::Healthy);
        assert_eq!(stats.total_errors, 0);
        assert_eq!(stats.affected_services, 0);
        assert_eq!(stats.health_pct, 100.0);
        assert_eq!(stats.stability_index, 100.0);
        assert_eq!(stats.sla.status, SlaStatus::Meeting);
        assert_eq!(stats.trend_status, TrendStatus::Stable);
        assert_eq!(stats.recommended_action, None);
        assert_eq!(stats.top_error_service, None);
    }

    #[test]
    fn critical_service_makes_system_critical() {
        let stats = aggregate(
            &system(),
            Some(&snapshot(&[("svc-x", 12), ("svc-b", 0), ("svc-a", 2)])),
            None,
        );
        assert_eq!(stats.status, SystemStatus::Critical);
        assert_eq!(stats.critical_services, 1);
        assert_eq!(stats.critical_services_list, vec!["svc-x"]);
        assert_eq!(stats.affected_services_list, vec!["svc-a", "svc-x"]);
        assert_eq!(
            stats.top_error_service,
            Some(ServiceTotal {
                name: "svc-x".to_string(),
                errors: 12
            })
        );
        assert_eq!(
            stats.error_distribution,
            ErrorDistribution {
                zero: 1,
                low: 1,
                medium: 0,
                high: 1
            }
        );
        assert_eq!(stats.risk_level, RiskLevel::High);
        assert_eq!(stats.business_impact, BusinessImpact::Severe);
        assert!(stats.recommended_action.unwrap().contains("1 critical"));
    }

    #[test]
    fn spread_errors_produce_warning() {
        // 4 services, 3 affected with 3 errors each: health 25, density 2.25.
        let stats = aggregate(
            &system(),
            Some(&snapshot(&[("a", 3), ("b", 3), ("c", 3), ("d", 0)])),
            None,
        );
        // 0.4 * 25 + 0.3 * 77.5 + 0.3 * 100 = 63.25
        assert_eq!(stats.stability_index, 63.25);
        assert_eq!(stats.status, SystemStatus::Warning);
        assert_eq!(stats.sla.status, SlaStatus::Breach);
        assert_eq!(stats.risk_level, RiskLevel::Low);
    }

    #[test]
    fn absent_snapshot_is_no_data() {
        let stats = aggregate(&system(), None, None);
        assert_eq!(stats.status, SystemStatus::NoData);
        assert_eq!(stats.total_services, 0);
        assert_eq!(stats.health_pct, 0.0);
        assert_eq!(stats.error_density, 0.0);
        assert_eq!(stats.recommended_action.as_deref(), Some(NO_DATA_ACTION));
    }

    #[test]
    fn sla_thresholds_are_inclusive() {
        assert_eq!(SlaStatus::classify(99.5), SlaStatus::Meeting);
        assert_eq!(SlaStatus::classify(99.49), SlaStatus::AtRisk);
        assert_eq!(SlaStatus::classify(95.0), SlaStatus::AtRisk);
        assert_eq!(SlaStatus::classify(94.99), SlaStatus::Breach);
    }

    #[test]
    fn risk_thresholds() {
        assert_eq!(risk_level(0.31, 0.0), RiskLevel::High);
        assert_eq!(risk_level(0.0, 10.5), RiskLevel::High);
        assert_eq!(risk_level(0.2, 0.0), RiskLevel::Medium);
        assert_eq!(risk_level(0.0, 6.0), RiskLevel::Medium);
        assert_eq!(risk_level(0.1, 5.0), RiskLevel::Low);
    }

    #[test]
    fn stability_index_stays_in_range() {
        assert_eq!(stability_index(0.0, 50.0, 1.0), 0.0);
        assert_eq!(stability_index(100.0, 0.0, 0.0), 100.0);
    }

    #[test]
    fn aggregation_is_pure() {
        let snap = snapshot(&[("svc-x", 12), ("svc-a", 2)]);
        let a = serde_json::to_string(&aggregate(&system(), Some(&snap), None)).unwrap();
        let b = serde_json::to_string(&aggregate(&system(), Some(&snap), None)).unwrap();
        assert_eq!(a, b);
    }
}
