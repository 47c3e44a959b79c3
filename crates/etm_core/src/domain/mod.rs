use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub mod columns {
    pub const DOMAIN: &str = "Domain";
    pub const SERVICE_TYPE: &str = "ServiceType";
    pub const SERVICE_NAME: &str = "ServiceName";
    pub const ERROR_COUNT: &str = "ErrorCount";
    pub const ERROR_REASON: &str = "ErrorReason";
    pub const CAPTURED_AT: &str = "CapturedAt";
}

/// A service is critical once its summed error count reaches this value.
pub const CRITICAL_ERROR_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DisplayHints {
    pub color: String,
    pub icon: String,
}

/// Identity and ingestion parameters of one monitored platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemDescriptor {
    pub code: String,
    pub directory: PathBuf,
    /// Positional column names. Positions, not header text, are authoritative.
    pub schema: Vec<String>,
    pub skip_rows: usize,
    pub recipients: Vec<String>,
    pub display: DisplayHints,
    /// Exact base name of a CSV to attach instead of the latest snapshot.
    pub attachment: Option<String>,
    pub attach_snapshot: bool,
}

impl SystemDescriptor {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c == name)
    }
}

/// Non-fatal ingestion finding, kept next to the value it concerns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestWarning {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl IngestWarning {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotRow {
    pub service_name: String,
    pub error_count: i64,
    /// Every other schema column (and unnamed trailing fields) verbatim.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceTotal {
    pub name: String,
    pub errors: i64,
}

/// One parsed CSV file for one system.
///
/// Service aggregation is computed once at construction; rows stay in file order and
/// `services` keeps first-appearance order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub system: String,
    #[serde(with = "time::serde::rfc3339")]
    pub captured_at: OffsetDateTime,
    pub source: Option<PathBuf>,
    pub fingerprint: String,
    pub rows: Vec<SnapshotRow>,
    services: Vec<ServiceTotal>,
}

impl Snapshot {
    pub fn new(
        system: impl Into<String>,
        captured_at: OffsetDateTime,
        rows: Vec<SnapshotRow>,
    ) -> Self {
        let services = group_by_service(&rows);
        Self {
            system: system.into(),
            captured_at,
            source: None,
            fingerprint: String::new(),
            rows,
            services,
        }
    }

    pub fn with_source(mut self, source: PathBuf, fingerprint: String) -> Self {
        self.source = Some(source);
        self.fingerprint = fingerprint;
        self
    }

    pub fn by_service(&self) -> &[ServiceTotal] {
        &self.services
    }

    /// Saturates at `i64::MAX` instead of wrapping.
    pub fn total_errors(&self) -> i64 {
        self.rows
            .iter()
            .fold(0i64, |acc, r| acc.saturating_add(r.error_count))
    }

    pub fn total_services(&self) -> usize {
        self.services.len()
    }

    pub fn affected_services(&self) -> Vec<&ServiceTotal> {
        self.services.iter().filter(|s| s.errors > 0).collect()
    }

    pub fn critical_services(&self) -> Vec<&ServiceTotal> {
        self.services
            .iter()
            .filter(|s| s.errors >= CRITICAL_ERROR_THRESHOLD)
            .collect()
    }

    pub fn error_density(&self) -> f64 {
        let services = self.total_services();
        if services == 0 {
            return 0.0;
        }
        self.total_errors() as f64 / services as f64
    }

    pub fn reliability_score(&self) -> f64 {
        let services = self.total_services();
        if services == 0 {
            return 0.0;
        }
        let healthy = services - self.affected_services().len();
        healthy as f64 / services as f64 * 100.0
    }
}

fn group_by_service(rows: &[SnapshotRow]) -> Vec<ServiceTotal> {
    let mut order: Vec<ServiceTotal> = Vec::new();
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        match index.get(row.service_name.as_str()) {
            Some(&i) => order[i].errors = order[i].errors.saturating_add(row.error_count),
            None => {
                index.insert(row.service_name.as_str(), order.len());
                order.push(ServiceTotal {
                    name: row.service_name.clone(),
                    errors: row.error_count,
                });
            }
        }
    }
    order
}

/// Snapshots of one system inside `[now - days, now]`, ascending by capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWindow {
    pub system: String,
    pub days: u32,
    pub snapshots: Vec<Snapshot>,
}

impl HistoryWindow {
    pub fn empty(system: impl Into<String>, days: u32) -> Self {
        Self {
            system: system.into(),
            days,
            snapshots: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn latest(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    pub fn totals(&self) -> Vec<f64> {
        self.snapshots
            .iter()
            .map(|s| s.total_errors() as f64)
            .collect()
    }
}

/// Terminal state of one system within a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Done,
    Failed,
    TimeoutSkipped,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Done => "DONE",
            SystemState::Failed => "FAILED",
            SystemState::TimeoutSkipped => "TIMEOUT_SKIPPED",
        }
    }
}

/// Which flavour of per-system report the inputs allowed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReportKind {
    NoData,
    CurrentOnly,
    Full,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::NoData => "NO_DATA",
            ReportKind::CurrentOnly => "CURRENT_ONLY",
            ReportKind::Full => "FULL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn row(service: &str, errors: i64) -> SnapshotRow {
        SnapshotRow {
            service_name: service.to_string(),
            error_count: errors,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn groups_services_in_first_appearance_order() {
        let snap = Snapshot::new(
            "CIS",
            datetime!(2025-03-01 08:00 UTC),
            vec![row("zeta", 2), row("alpha", 0), row("zeta", 9), row("beta", 4)],
        );
        let names: Vec<&str> = snap.by_service().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "beta"]);
        assert_eq!(snap.by_service()[0].errors, 11);
        assert_eq!(snap.total_errors(), 15);
        assert_eq!(snap.total_services(), 3);
        assert_eq!(snap.affected_services().len(), 2);
        assert_eq!(snap.critical_services().len(), 1);
        assert!((snap.error_density() - 5.0).abs() < 1e-9);
        assert!((snap.reliability_score() - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_snapshot_has_zero_density_and_reliability() {
        let snap = Snapshot::new("ECW", datetime!(2025-03-01 08:00 UTC), Vec::new());
        assert_eq!(snap.total_errors(), 0);
        assert_eq!(snap.total_services(), 0);
        assert_eq!(snap.error_density(), 0.0);
        assert_eq!(snap.reliability_score(), 0.0);
    }

    #[test]
    fn huge_counts_saturate_instead_of_overflowing() {
        let snap = Snapshot::new(
            "CIS",
            datetime!(2025-03-01 08:00 UTC),
            vec![row("svc-a", i64::MAX), row("svc-b", 1), row("svc-a", 5)],
        );
        assert_eq!(snap.total_errors(), i64::MAX);
        assert_eq!(snap.by_service()[0].errors, i64::MAX);
        assert_eq!(snap.by_service()[1].errors, 1);
        assert!(snap.error_density() > 0.0);
    }

    #[test]
    fn critical_threshold_is_inclusive() {
        let snap = Snapshot::new(
            "IRM",
            datetime!(2025-03-01 08:00 UTC),
            vec![row("a", 10), row("b", 9)],
        );
        let critical: Vec<&str> = snap
            .critical_services()
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(critical, vec!["a"]);
    }
}
