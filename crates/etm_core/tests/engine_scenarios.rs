mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{csv, engine, settings, system, MemorySnapshotStore};
use etm_core::domain::{ReportKind, SystemState};
use etm_core::error::codes;
use etm_core::mail::MemorySink;
use etm_core::report::executive::top_degrading;
use etm_core::report::ExecutiveEntry;
use etm_core::stats::{SystemStatus, TrendStatus};
use etm_core::trend::{Alignment, Stability};
use pretty_assertions::assert_eq;
use time::macros::datetime;
use time::OffsetDateTime;

const HEALTHY_CSV: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../fixtures/snapshots/healthy.csv"
));
const CRITICAL_CSV: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../../fixtures/snapshots/critical.csv"
));

const NOW: OffsetDateTime = datetime!(2025-03-07 14:30 UTC);

#[tokio::test]
async fn single_healthy_snapshot_reports_without_trend() {
    let store = MemorySnapshotStore::new().with_file(
        "CIS",
        "cis_0307.csv",
        datetime!(2025-03-07 14:00 UTC),
        HEALTHY_CSV,
    );
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("CIS")], store, Arc::clone(&sink), settings());

    let summary = engine.run_once(NOW, None).await;
    assert_eq!(summary.snapshots_read, 1);
    assert!(summary.executive_delivered);

    let run = &summary.systems[0];
    assert_eq!(run.state, SystemState::Done);
    assert_eq!(run.report_kind, Some(ReportKind::CurrentOnly));
    assert_eq!(run.fingerprint.as_ref().map(|f| f.len()), Some(64));
    let stats = run.stats.as_ref().expect("stats");
    assert_eq!(stats.status, SystemStatus::Healthy);
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.affected_services, 0);
    assert!(stats.trend.is_none());

    let sent = sink.sent();
    assert_eq!(sent.len(), 2);
    let report = &sent[0];
    assert!(report.subject.contains("CIS SYSTEM REPORT"));
    assert_eq!(report.to, vec!["cis-team@example.com".to_string()]);
    assert!(!report.html_body.contains("trend-analysis"));
    assert!(report.html_body.contains("<li>system healthy</li>"));
    assert_eq!(report.attachments.len(), 1);
    assert_eq!(report.attachments[0].filename, "cis_0307.csv");
    assert_eq!(report.attachments[0].bytes, HEALTHY_CSV.as_bytes());
    for (i, image) in report.inline_images.iter().enumerate() {
        assert_eq!(image.content_id, format!("chart{}", i + 1));
        assert!(report.html_body.contains(&format!("cid:chart{}", i + 1)));
    }

    assert!(sent[1].subject.contains("Error Monitoring Executive Summary - 2025-03-07"));
    assert_eq!(sent[1].to, vec!["exec@example.com".to_string()]);
}

#[tokio::test]
async fn stable_day_over_day_forecasts_flat() {
    let store = MemorySnapshotStore::new()
        .with_file(
            "ECW",
            "ecw_0306.csv",
            datetime!(2025-03-06 14:00 UTC),
            &csv(&[("svc-a", 6), ("svc-b", 4)]),
        )
        .with_file(
            "ECW",
            "ecw_0307.csv",
            datetime!(2025-03-07 14:00 UTC),
            &csv(&[("svc-a", 4), ("svc-b", 6)]),
        );
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("ECW")], store, Arc::clone(&sink), settings());

    let summary = engine.run_once(NOW, None).await;
    let run = &summary.systems[0];
    assert_eq!(run.report_kind, Some(ReportKind::Full));
    assert_eq!(run.snapshots_read, 2);

    let stats = run.stats.as_ref().expect("stats");
    assert_eq!(stats.trend_status, TrendStatus::Stable);
    let trend = stats.trend.as_ref().expect("trend");
    assert_eq!(trend.error_delta, 0);
    assert_eq!(trend.improvement_rate, 0.0);
    assert_eq!(trend.alignment, Alignment::SameTimeYesterday);
    assert_eq!(trend.predictions.consensus, 10);
    assert_eq!(trend.error_margin.range, 3.0);
    assert_eq!((trend.error_margin.lower, trend.error_margin.upper), (7.0, 13.0));

    let report = &sink.sent()[0];
    assert!(report.html_body.contains("trend-analysis"));
    assert!(report.subject.contains("STABLE"));
}

#[tokio::test]
async fn degrading_volatile_week_reaches_executive_top_list() {
    let mut store = MemorySnapshotStore::new();
    for (day, total) in [5, 6, 7, 25, 8, 9, 12].into_iter().enumerate() {
        let at = datetime!(2025-03-01 08:00 UTC) + time::Duration::days(day as i64);
        store = store.with_file(
            "IRM",
            &format!("irm_{day}.csv"),
            at,
            &csv(&[("svc-a", total), ("svc-b", 0)]),
        );
    }
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("IRM")], store, Arc::clone(&sink), settings());

    let summary = engine.run_once(NOW, None).await;
    let run = &summary.systems[0];
    assert_eq!(run.snapshots_read, 7);
    let stats = run.stats.clone().expect("stats");
    assert_eq!(stats.trend_status, TrendStatus::Degrading);
    let trend = stats.trend.as_ref().expect("trend");
    assert_eq!(trend.volatility, 6.87);
    assert_eq!(trend.stability, Stability::Moderate);
    assert!(trend
        .anomalies
        .iter()
        .any(|a| a.errors == 25 && a.kind.as_str() == "HIGH"));

    let entries = vec![ExecutiveEntry::reported(stats, run.state, None)];
    let top: Vec<String> = top_degrading(&entries).iter().map(|s| s.code.clone()).collect();
    assert_eq!(top, vec!["IRM".to_string()]);

    let executive = sink.sent().pop().expect("executive");
    assert!(executive.subject.starts_with("🚨 URGENT"));
    assert!(executive.html_body.contains("IRM"));
}

#[tokio::test]
async fn critical_service_flags_the_subject() {
    let store = MemorySnapshotStore::new().with_file(
        "CIS",
        "cis.csv",
        datetime!(2025-03-07 09:00 UTC),
        CRITICAL_CSV,
    );
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("CIS")], store, Arc::clone(&sink), settings());

    let summary = engine.run_once(NOW, None).await;
    let stats = summary.systems[0].stats.as_ref().expect("stats");
    assert_eq!(stats.critical_services, 1);
    assert_eq!(stats.critical_services_list, vec!["svc-x".to_string()]);
    assert_eq!(stats.status, SystemStatus::Critical);

    let subject = &sink.sent()[0].subject;
    assert!(subject.starts_with("🚨 "), "subject was {subject}");
}

#[tokio::test]
async fn previous_day_lookup_takes_closest_time_on_yesterdays_date() {
    let store = MemorySnapshotStore::new()
        .with_file("ECW", "a.csv", datetime!(2025-03-06 02:00 UTC), &csv(&[("svc-a", 2)]))
        .with_file("ECW", "b.csv", datetime!(2025-03-06 23:30 UTC), &csv(&[("svc-a", 3)]))
        .with_file("ECW", "c.csv", datetime!(2025-03-07 14:00 UTC), &csv(&[("svc-a", 4)]));
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("ECW")], store, sink, settings());

    let summary = engine.run_once(NOW, None).await;
    let trend = summary.systems[0]
        .stats
        .as_ref()
        .and_then(|s| s.trend.as_ref())
        .expect("trend");
    assert_eq!(trend.alignment, Alignment::SameDateYesterday);
    assert_eq!(trend.previous_captured_at, datetime!(2025-03-06 23:30 UTC));
    assert_eq!(trend.previous_total_errors, 3);
    assert_eq!(trend.error_delta, 1);
}

#[tokio::test]
async fn sink_failure_for_one_system_does_not_stop_the_others() {
    let at = datetime!(2025-03-07 14:00 UTC);
    let store = MemorySnapshotStore::new()
        .with_file("CIS", "cis.csv", at, HEALTHY_CSV)
        .with_file("ECW", "ecw.csv", at, HEALTHY_CSV)
        .with_file("IRM", "irm.csv", at, HEALTHY_CSV);
    let sink = Arc::new(MemorySink::new().failing_on("CIS"));
    let engine = engine(
        vec![system("CIS"), system("ECW"), system("IRM")],
        store,
        Arc::clone(&sink),
        settings(),
    );

    let summary = engine.run_once(NOW, None).await;
    let states: Vec<(&str, SystemState)> = summary
        .systems
        .iter()
        .map(|s| (s.code.as_str(), s.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("CIS", SystemState::Failed),
            ("ECW", SystemState::Done),
            ("IRM", SystemState::Done),
        ]
    );
    assert_eq!(
        summary.systems[0].error.as_ref().map(|e| e.code.as_str()),
        Some(codes::SINK_TRANSIENT)
    );
    assert!(summary.executive_delivered);
    assert_eq!(summary.snapshots_read, 3);

    let subjects = sink.sent_subjects();
    assert_eq!(subjects.len(), 3);
    assert!(subjects.iter().any(|s| s.contains("ECW SYSTEM REPORT")));
    assert!(subjects.iter().any(|s| s.contains("IRM SYSTEM REPORT")));
    assert!(subjects.iter().any(|s| s.contains("Executive Summary")));
    assert!(!subjects.iter().any(|s| s.contains("CIS SYSTEM REPORT")));
}

#[tokio::test]
async fn empty_directory_reports_no_data() {
    let sink = Arc::new(MemorySink::new());
    let engine = engine(
        vec![system("CIS")],
        MemorySnapshotStore::new(),
        Arc::clone(&sink),
        settings(),
    );

    let summary = engine.run_once(NOW, None).await;
    assert_eq!(summary.snapshots_read, 0);
    let run = &summary.systems[0];
    assert_eq!(run.state, SystemState::Done);
    assert_eq!(run.report_kind, Some(ReportKind::NoData));
    assert_eq!(run.fingerprint, None);
    let stats = run.stats.as_ref().expect("stats");
    assert_eq!(stats.status, SystemStatus::NoData);
    assert_eq!(stats.recommended_action.as_deref(), Some("NO_DATA"));

    let report = &sink.sent()[0];
    assert!(report.attachments.is_empty());
    assert!(report.inline_images.is_empty());
    assert!(!report.html_body.contains("trend-analysis"));
}

#[tokio::test]
async fn listing_failure_degrades_to_no_data() {
    let store = MemorySnapshotStore::new()
        .with_file("ECW", "ecw.csv", datetime!(2025-03-07 14:00 UTC), HEALTHY_CSV)
        .failing_for("ECW");
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("ECW")], store, sink, settings());

    let summary = engine.run_once(NOW, None).await;
    assert_eq!(summary.systems[0].state, SystemState::Done);
    assert_eq!(summary.systems[0].report_kind, Some(ReportKind::NoData));
}

#[tokio::test]
async fn stale_snapshot_falls_back_to_current_only() {
    let store = MemorySnapshotStore::new()
        .with_file("IRM", "old.csv", datetime!(2025-02-10 08:00 UTC), CRITICAL_CSV);
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("IRM")], store, sink, settings());

    let summary = engine.run_once(NOW, None).await;
    let run = &summary.systems[0];
    assert_eq!(run.report_kind, Some(ReportKind::CurrentOnly));
    assert_eq!(run.snapshots_read, 1);
    assert_eq!(
        run.stats.as_ref().and_then(|s| s.captured_at),
        Some(datetime!(2025-02-10 08:00 UTC))
    );
}

#[tokio::test]
async fn slow_reads_are_timeout_skipped() {
    let store = MemorySnapshotStore::new()
        .with_file("CIS", "cis.csv", datetime!(2025-03-07 14:00 UTC), HEALTHY_CSV)
        .slow_for("CIS", Duration::from_millis(500));
    let mut settings = settings();
    settings.read_timeout = Duration::from_millis(50);
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![system("CIS")], store, Arc::clone(&sink), settings);

    let summary = engine.run_once(NOW, None).await;
    let run = &summary.systems[0];
    assert_eq!(run.state, SystemState::TimeoutSkipped);
    assert_eq!(run.error.as_ref().map(|e| e.code.as_str()), Some(codes::TIMEOUT));
    assert!(summary.executive_delivered);
    assert_eq!(sink.sent().len(), 1);
}

#[tokio::test]
async fn run_deadline_skips_pending_systems_and_still_sends_summary() {
    let at = datetime!(2025-03-07 14:00 UTC);
    let store = MemorySnapshotStore::new()
        .with_file("CIS", "cis.csv", at, HEALTHY_CSV)
        .with_file("IRM", "irm.csv", at, HEALTHY_CSV)
        .slow_for("IRM", Duration::from_secs(3));
    let sink = Arc::new(MemorySink::new());
    let engine = engine(
        vec![system("CIS"), system("IRM")],
        store,
        Arc::clone(&sink),
        settings(),
    );

    let summary = engine.run_once(NOW, Some(Duration::from_secs(1))).await;
    assert_eq!(summary.systems[0].state, SystemState::Done);
    assert_eq!(summary.systems[1].state, SystemState::TimeoutSkipped);
    assert!(summary.executive_delivered);

    let executive = sink.sent().pop().expect("executive");
    assert!(executive.subject.contains("Executive Summary"));
    assert!(executive.html_body.contains("TIMEOUT_SKIPPED"));
}

#[tokio::test]
async fn systems_without_recipients_are_not_mailed() {
    let store = MemorySnapshotStore::new().with_file(
        "CIS",
        "cis.csv",
        datetime!(2025-03-07 14:00 UTC),
        HEALTHY_CSV,
    );
    let mut quiet = system("CIS");
    quiet.recipients.clear();
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![quiet], store, Arc::clone(&sink), settings());

    let summary = engine.run_once(NOW, None).await;
    assert_eq!(summary.systems[0].state, SystemState::Done);
    assert!(summary.systems[0].stats.is_some());
    let subjects = sink.sent_subjects();
    assert_eq!(subjects.len(), 1);
    assert!(subjects[0].contains("Executive Summary"));
}

#[tokio::test]
async fn configured_attachment_replaces_the_snapshot() {
    let store = MemorySnapshotStore::new()
        .with_file("ECW", "ECW_errors.csv", datetime!(2025-02-01 08:00 UTC), "detail\n")
        .with_file("ECW", "ecw.csv", datetime!(2025-03-07 14:00 UTC), HEALTHY_CSV);
    let mut ecw = system("ECW");
    ecw.attachment = Some("ECW_errors.csv".to_string());
    let sink = Arc::new(MemorySink::new());
    let engine = engine(vec![ecw], store, Arc::clone(&sink), settings());

    engine.run_once(NOW, None).await;
    let report = &sink.sent()[0];
    assert_eq!(report.attachments.len(), 1);
    assert_eq!(report.attachments[0].filename, "ECW_errors.csv");
    assert_eq!(report.attachments[0].bytes, b"detail\n".to_vec());
}

#[tokio::test]
async fn repeated_runs_render_identical_reports() {
    let build = || {
        MemorySnapshotStore::new()
            .with_file(
                "ECW",
                "a.csv",
                datetime!(2025-03-06 14:00 UTC),
                &csv(&[("svc-a", 3), ("svc-b", 11)]),
            )
            .with_file(
                "ECW",
                "b.csv",
                datetime!(2025-03-07 14:00 UTC),
                &csv(&[("svc-a", 1), ("svc-b", 14)]),
            )
    };
    let first = Arc::new(MemorySink::new());
    let second = Arc::new(MemorySink::new());
    engine(vec![system("ECW")], build(), Arc::clone(&first), settings())
        .run_once(NOW, None)
        .await;
    engine(vec![system("ECW")], build(), Arc::clone(&second), settings())
        .run_once(NOW, None)
        .await;

    let a = first.sent();
    let b = second.sent();
    assert_eq!(a.len(), b.len());
    for (x, y) in a.iter().zip(b.iter()) {
        assert_eq!(x.subject, y.subject);
        assert_eq!(x.html_body, y.html_body);
    }
}
