mod common;

use etm_core::domain::ServiceTotal;
use etm_core::ingest::snapshot_csv::{fingerprint, parse_snapshot, SnapshotSource};
use etm_core::stats::{aggregate, SystemStatus};
use pretty_assertions::assert_eq;
use time::macros::{datetime, offset};
use time::UtcOffset;

const MESSY_EXPORT: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../fixtures/snapshots/messy_export.csv"
));
const EMBEDDED_TIMESTAMP: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../fixtures/snapshots/embedded_timestamp.csv"
));

fn source() -> SnapshotSource {
    SnapshotSource {
        path: None,
        file_time: datetime!(2025-03-05 08:00 UTC),
    }
}

#[test]
fn messy_export_is_ingested_with_warnings() {
    let mut system = common::system("ECW");
    system.skip_rows = 3;

    let parsed =
        parse_snapshot(&system, MESSY_EXPORT.as_bytes(), source(), UtcOffset::UTC).expect("parse");
    let snapshot = &parsed.snapshot;

    assert_eq!(snapshot.rows.len(), 5);
    assert_eq!(
        snapshot.by_service(),
        &[
            ServiceTotal {
                name: "invoice-svc".to_string(),
                errors: 7
            },
            ServiceTotal {
                name: "ledger-sync".to_string(),
                errors: 0
            },
            ServiceTotal {
                name: "token-svc".to_string(),
                errors: 0
            },
            ServiceTotal {
                name: "key-rotate".to_string(),
                errors: 1
            },
        ]
    );
    assert_eq!(snapshot.total_errors(), 8);
    assert_eq!(
        snapshot.rows[4].extra.get("column_6").map(String::as_str),
        Some("retry-3")
    );
    assert_eq!(snapshot.fingerprint, fingerprint(MESSY_EXPORT.as_bytes()));

    let codes: Vec<&str> = parsed.warnings.iter().map(|w| w.code.as_str()).collect();
    assert_eq!(
        codes,
        vec![
            "INGEST_NEGATIVE_COUNT_CLAMPED",
            "INGEST_COUNT_COERCED",
            "INGEST_ROW_TOO_SHORT",
        ]
    );

    let stats = aggregate(&system, Some(snapshot), None);
    assert_eq!(stats.total_services, 4);
    assert_eq!(stats.affected_services, 2);
    assert_eq!(
        stats.affected_services_list,
        vec!["invoice-svc".to_string(), "key-rotate".to_string()]
    );
    assert_eq!(stats.critical_services, 0);
    assert_ne!(stats.status, SystemStatus::NoData);
}

#[test]
fn embedded_capture_time_is_read_in_configured_offset() {
    let mut system = common::system("OPS");
    system.schema.push("CapturedAt".to_string());

    let parsed = parse_snapshot(
        &system,
        EMBEDDED_TIMESTAMP.as_bytes(),
        source(),
        offset!(+2),
    )
    .expect("parse");

    assert_eq!(parsed.snapshot.captured_at, datetime!(2025-03-05 04:15 UTC));
    assert_eq!(parsed.snapshot.rows.len(), 2);
    let codes: Vec<&str> = parsed.warnings.iter().map(|w| w.code.as_str()).collect();
    assert!(codes.contains(&"INGEST_HEADER_SKIPPED"));
    assert!(codes.contains(&"INGEST_TS_ASSUMED_OFFSET"));
}
