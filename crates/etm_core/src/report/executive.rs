use serde::{Deserialize, Serialize};

use crate::domain::{DisplayHints, SystemState};
use crate::stats::{SystemStats, SystemStatus, TrendStatus};
use crate::trend::ConfidenceLevel;

use super::recommend::{recommendations, Bucket, RecommendationKind};
use super::{
    bullet_list, escape_html, fill_template, fmt2, signed, status_badge, status_color,
    trend_color, trend_label, RenderContext,
};

const TEMPLATE: &str = include_str!("templates/executive_report.html");

pub const TOP_DEGRADING_LIMIT: usize = 5;
/// Confidence percent above which a prediction counts as high-accuracy.
pub const HIGH_ACCURACY_PERCENT: u8 = 80;

/// One system as seen by the executive summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutiveEntry {
    pub code: String,
    pub display: DisplayHints,
    pub state: SystemState,
    /// Absent when the system was skipped before stats were computed.
    pub stats: Option<SystemStats>,
    pub error: Option<String>,
}

impl ExecutiveEntry {
    pub fn reported(stats: SystemStats, state: SystemState, error: Option<String>) -> Self {
        Self {
            code: stats.code.clone(),
            display: stats.display.clone(),
            state,
            stats: Some(stats),
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GlobalMetrics {
    pub systems: usize,
    pub total_errors: i64,
    pub total_services: usize,
    pub affected_services: usize,
    pub critical_services: usize,
    /// Mean health over systems that had a snapshot.
    pub avg_health_pct: f64,
    pub healthy: usize,
    pub warning: usize,
    pub critical: usize,
    pub no_data: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl GlobalMetrics {
    pub fn from_entries(entries: &[ExecutiveEntry]) -> Self {
        let mut m = GlobalMetrics {
            systems: entries.len(),
            ..Default::default()
        };
        let mut health_sum = 0.0;
        let mut with_data = 0usize;
        for e in entries {
            match e.state {
                SystemState::TimeoutSkipped => m.skipped += 1,
                SystemState::Failed => m.failed += 1,
                SystemState::Done => {}
            }
            let Some(s) = &e.stats else { continue };
            m.total_errors = m.total_errors.saturating_add(s.total_errors);
            m.total_services += s.total_services;
            m.affected_services += s.affected_services;
            m.critical_services += s.critical_services;
            match s.status {
                SystemStatus::Healthy => m.healthy += 1,
                SystemStatus::Warning => m.warning += 1,
                SystemStatus::Critical => m.critical += 1,
                SystemStatus::NoData => m.no_data += 1,
            }
            if s.status != SystemStatus::NoData {
                health_sum += s.health_pct;
                with_data += 1;
            }
        }
        if with_data > 0 {
            m.avg_health_pct = crate::trend::math::round2(health_sum / with_data as f64);
        }
        m
    }
}

/// `🚨 URGENT` if any system is critical, else `📈 IMPROVING` if any improves, else
/// `📊 MONITORING`.
pub fn executive_priority(entries: &[ExecutiveEntry]) -> &'static str {
    let stats: Vec<&SystemStats> = entries.iter().filter_map(|e| e.stats.as_ref()).collect();
    if stats.iter().any(|s| s.status == SystemStatus::Critical) {
        "🚨 URGENT"
    } else if stats
        .iter()
        .any(|s| s.trend_status == TrendStatus::Improving)
    {
        "📈 IMPROVING"
    } else {
        "📊 MONITORING"
    }
}

pub fn executive_subject(entries: &[ExecutiveEntry], date: &str) -> String {
    format!(
        "{} - Error Monitoring Executive Summary - {date}",
        executive_priority(entries)
    )
}

/// Systems whose errors grew, largest growth first, ties by code.
pub fn top_degrading(entries: &[ExecutiveEntry]) -> Vec<&SystemStats> {
    let mut out: Vec<&SystemStats> = entries
        .iter()
        .filter_map(|e| e.stats.as_ref())
        .filter(|s| s.error_delta() > 0)
        .collect();
    out.sort_by(|a, b| {
        b.error_delta()
            .cmp(&a.error_delta())
            .then_with(|| a.code.cmp(&b.code))
    });
    out.truncate(TOP_DEGRADING_LIMIT);
    out
}

pub fn high_accuracy(entries: &[ExecutiveEntry]) -> Vec<&SystemStats> {
    entries
        .iter()
        .filter_map(|e| e.stats.as_ref())
        .filter(|s| {
            s.trend.as_ref().is_some_and(|t| {
                t.confidence.level == ConfidenceLevel::High
                    || t.confidence.percent > HIGH_ACCURACY_PERCENT
            })
        })
        .collect()
}

fn global_metrics(m: &GlobalMetrics) -> String {
    let cell = |label: &str, value: String| {
        format!(
            r#"<td style="border:1px solid #cfd8dc;"><div style="font-size:12px;color:#607d8b;">{label}</div><div style="font-size:20px;font-weight:bold;">{value}</div></td>"#
        )
    };
    let mut out = String::from("<table style=\"width:100%;\">\n<tr>");
    out.push_str(&cell("Systems", m.systems.to_string()));
    out.push_str(&cell("Total errors", m.total_errors.to_string()));
    out.push_str(&cell("Total services", m.total_services.to_string()));
    out.push_str(&cell("Affected services", m.affected_services.to_string()));
    out.push_str("</tr>\n<tr>");
    out.push_str(&cell("Critical services", m.critical_services.to_string()));
    out.push_str(&cell("Average health", format!("{}%", fmt2(m.avg_health_pct))));
    out.push_str(&cell(
        "Status mix",
        format!(
            "{} healthy / {} warning / {} critical / {} no data",
            m.healthy, m.warning, m.critical, m.no_data
        ),
    ));
    out.push_str(&cell(
        "Not reported",
        format!("{} skipped / {} failed", m.skipped, m.failed),
    ));
    out.push_str("</tr>\n</table>\n");
    out
}

fn system_card(e: &ExecutiveEntry) -> String {
    let border = e
        .stats
        .as_ref()
        .map(|s| status_color(s.status))
        .unwrap_or("#757575");
    let mut out = format!(
        "<div style=\"border:1px solid #cfd8dc;border-left:6px solid {border};padding:10px;margin:8px 0;\">\n<div style=\"font-size:16px;font-weight:bold;\">{} {}</div>\n",
        escape_html(&e.display.icon),
        escape_html(&e.code)
    );
    if e.state != SystemState::Done {
        out.push_str(&format!(
            "<div style=\"color:#c62828;font-weight:bold;\">{}</div>\n",
            e.state.as_str()
        ));
        if let Some(err) = &e.error {
            out.push_str(&format!("<div>{}</div>\n", escape_html(err)));
        }
    }
    if let Some(s) = &e.stats {
        out.push_str(&format!("<div>{}</div>\n", status_badge(s)));
        out.push_str(&format!(
            "<div>Errors {} across {} services ({} affected, {} critical), health {}%</div>\n",
            s.total_errors,
            s.total_services,
            s.affected_services,
            s.critical_services,
            fmt2(s.health_pct)
        ));
        out.push_str(&format!(
            "<div style=\"color:{};\">Trend {} ({})</div>\n",
            trend_color(s.trend_status),
            trend_label(s.trend_status),
            signed(s.error_delta())
        ));
        if let Some(t) = &s.trend {
            out.push_str(&format!(
                "<div>Prediction {} errors ({} to {}), confidence {} {}%</div>\n",
                t.predictions.consensus,
                fmt2(t.error_margin.lower),
                fmt2(t.error_margin.upper),
                t.confidence.level.as_str(),
                t.confidence.percent
            ));
        }
    }
    out.push_str("</div>\n");
    out
}

fn bucket_items(entries: &[ExecutiveEntry], bucket: Bucket) -> Vec<String> {
    let mut out = Vec::new();
    for e in entries {
        if bucket == Bucket::Immediate && e.state != SystemState::Done && e.stats.is_none() {
            out.push(format!(
                "{}: report {}, check the run log",
                e.code,
                e.state.as_str()
            ));
        }
        let Some(s) = &e.stats else { continue };
        for r in recommendations(s) {
            if r.kind != RecommendationKind::Healthy && r.kind.bucket() == bucket {
                out.push(format!("{}: {}", e.code, r.text));
            }
        }
    }
    out
}

/// Render the cross-system summary. Entries are shown in the order given.
pub fn render_executive_report(entries: &[ExecutiveEntry], ctx: &RenderContext) -> String {
    let metrics = GlobalMetrics::from_entries(entries);

    let cards: String = entries.iter().map(system_card).collect();

    let degrading: Vec<String> = top_degrading(entries)
        .into_iter()
        .map(|s| {
            let previous = s
                .trend
                .as_ref()
                .map(|t| t.previous_total_errors)
                .unwrap_or(0);
            format!(
                "{}: {} errors ({} to {})",
                s.code,
                signed(s.error_delta()),
                previous,
                s.total_errors
            )
        })
        .collect();

    let accurate: Vec<String> = high_accuracy(entries)
        .into_iter()
        .filter_map(|s| {
            let t = s.trend.as_ref()?;
            Some(format!(
                "{}: {} errors expected ({} to {}), confidence {} {}%",
                s.code,
                t.predictions.consensus,
                fmt2(t.error_margin.lower),
                fmt2(t.error_margin.upper),
                t.confidence.level.as_str(),
                t.confidence.percent
            ))
        })
        .collect();

    let critical: Vec<String> = entries
        .iter()
        .filter_map(|e| e.stats.as_ref())
        .flat_map(|s| {
            s.critical_services_list
                .iter()
                .map(move |name| format!("{}: {}", s.code, name))
        })
        .collect();

    fill_template(
        TEMPLATE,
        &[
            ("date", ctx.report_date()),
            ("priority", executive_priority(entries).to_string()),
            ("global_metrics", global_metrics(&metrics)),
            ("system_cards", cards),
            ("top_degrading", bullet_list(&degrading)),
            ("high_accuracy", bullet_list(&accurate)),
            ("critical_services", bullet_list(&critical)),
            (
                "immediate",
                bullet_list(&bucket_items(entries, Bucket::Immediate)),
            ),
            (
                "short_term",
                bullet_list(&bucket_items(entries, Bucket::ShortTerm)),
            ),
            (
                "predictive",
                bullet_list(&bucket_items(entries, Bucket::Predictive)),
            ),
            ("generated_at", ctx.footer_timestamp()),
        ],
    )
}
