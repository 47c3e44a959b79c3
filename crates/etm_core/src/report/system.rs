use crate::chart::ChartKind;
use crate::stats::{SystemStats, SystemStatus, TrendDigest};
use crate::trend::Seasonal;

use super::recommend::recommendations;
use super::{
    bullet_list, chart_content_id, escape_html, fill_template, fmt1, fmt2, signed, signed2,
    status_badge, trend_color, trend_label, RenderContext,
};

const TEMPLATE: &str = include_str!("templates/system_report.html");

/// `[🚨 ]<icon> <code> SYSTEM REPORT <indicator> <trend> - <date>`.
///
/// Critical systems get the urgent marker in front so they stand out in an inbox.
pub fn system_subject(stats: &SystemStats, date: &str) -> String {
    let urgent = if stats.status == SystemStatus::Critical {
        "🚨 "
    } else {
        ""
    };
    format!(
        "{urgent}{} {} SYSTEM REPORT {} - {date}",
        stats.display.icon,
        stats.code,
        trend_label(stats.trend_status)
    )
}

fn metric_cell(label: &str, value: &str) -> String {
    format!(
        r#"<td style="width:33%;border:1px solid #cfd8dc;"><div style="font-size:12px;color:#607d8b;">{label}</div><div style="font-size:20px;font-weight:bold;">{value}</div></td>"#
    )
}

fn grid(cells: &[(&str, String)]) -> String {
    let mut out = String::from(r#"<table style="width:100%;">"#);
    out.push('\n');
    for row in cells.chunks(3) {
        out.push_str("<tr>");
        for (label, value) in row {
            out.push_str(&metric_cell(label, &escape_html(value)));
        }
        out.push_str("</tr>\n");
    }
    out.push_str("</table>\n");
    out
}

fn kpi_grid(stats: &SystemStats) -> String {
    grid(&[
        ("Total errors", stats.total_errors.to_string()),
        ("Total services", stats.total_services.to_string()),
        ("Affected services", stats.affected_services.to_string()),
        ("Critical services", stats.critical_services.to_string()),
        ("Avg errors / service", fmt2(stats.avg_errors_per_service)),
        ("Health", format!("{}%", fmt2(stats.health_pct))),
    ])
}

fn advanced_panel(stats: &SystemStats) -> String {
    let top = match &stats.top_error_service {
        Some(s) => format!("{} ({})", s.name, s.errors),
        None => "None".to_string(),
    };
    grid(&[
        ("Top error service", top),
        (
            "Risk level",
            format!(
                "{} / impact {}",
                stats.risk_level.as_str(),
                stats.business_impact.as_str()
            ),
        ),
        ("Stability index", fmt2(stats.stability_index)),
        (
            "Uptime / SLA",
            format!("{}% {}", fmt2(stats.sla.uptime_pct), stats.sla.status.as_str()),
        ),
        ("Error density", fmt2(stats.error_density)),
        ("Critical ratio", fmt2(stats.critical_ratio)),
    ])
}

fn row(label: &str, value: &str) -> String {
    format!(
        "<tr><th style=\"border-bottom:1px solid #eceff1;\">{}</th><td style=\"border-bottom:1px solid #eceff1;\">{}</td></tr>\n",
        escape_html(label),
        escape_html(value)
    )
}

fn forecast_table(t: &TrendDigest) -> String {
    let p = &t.predictions;
    let model = |name: &str, value: Option<i64>, weight: f64| {
        let shown = value
            .map(|v| v.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        format!(
            "<tr><td>{name}</td><td>{shown}</td><td>{}%</td></tr>\n",
            fmt1(weight * 100.0)
        )
    };
    let mut out = String::from(
        "<table style=\"width:100%;border:1px solid #cfd8dc;\">\n<tr><th>Model</th><th>Prediction</th><th>Weight</th></tr>\n",
    );
    out.push_str(&model("Simple", Some(p.simple), p.weights.simple));
    out.push_str(&model("Moving average", p.moving_avg, p.weights.moving_avg));
    out.push_str(&model("Regression", p.regression, p.weights.regression));
    out.push_str(&format!(
        "<tr><th>Consensus</th><th>{}</th><th>{} to {}</th></tr>\n",
        p.consensus,
        fmt2(t.error_margin.lower),
        fmt2(t.error_margin.upper)
    ));
    out.push_str("</table>\n");
    out
}

fn seasonal_block(seasonal: &Seasonal) -> String {
    let Some(p) = seasonal.pattern() else {
        return "<p>Seasonal pattern: INSUFFICIENT_FOR_SEASONAL_ANALYSIS</p>\n".to_string();
    };
    let mut out = format!(
        "<p>Peak hour {:02}:00, quiet hour {:02}:00</p>\n<table style=\"border:1px solid #cfd8dc;\">\n<tr><th>Weekday</th><th>Mean errors</th><th>Samples</th></tr>\n",
        p.peak_hour, p.quiet_hour
    );
    for d in &p.by_weekday {
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&d.weekday),
            fmt2(d.mean_errors),
            d.samples
        ));
    }
    out.push_str("</table>\n");
    out
}

fn trend_section(stats: &SystemStats, ctx: &RenderContext) -> String {
    let Some(t) = &stats.trend else {
        return String::new();
    };
    let mut out = String::from(
        "<div class=\"trend-analysis\" style=\"margin-top:24px;padding:12px;border-left:4px solid ",
    );
    out.push_str(trend_color(stats.trend_status));
    out.push_str(";background:#fafafa;\">\n<h2>Trend analysis</h2>\n<table style=\"width:100%;\">\n");
    out.push_str(&row(
        "Compared with",
        &format!(
            "{} ({})",
            ctx.local_minute(t.previous_captured_at),
            t.alignment.as_str()
        ),
    ));
    out.push_str(&row("Trend", &trend_label(stats.trend_status)));
    out.push_str(&row("Error delta", &signed(t.error_delta)));
    out.push_str(&row("Affected delta", &signed(t.affected_delta)));
    out.push_str(&row("Critical delta", &signed(t.critical_delta)));
    out.push_str(&row(
        "Reliability delta",
        &format!("{} pts", signed2(t.reliability_delta)),
    ));
    out.push_str(&row(
        "Improvement rate",
        &format!("{}%", fmt2(t.improvement_rate)),
    ));
    out.push_str(&row(
        "Week trend",
        &format!("{} ({}%)", signed2(t.week_trend), signed2(t.week_trend_pct)),
    ));
    out.push_str(&row(
        "Volatility",
        &format!("{} {}", fmt2(t.volatility), t.stability.as_str()),
    ));
    out.push_str(&row("Momentum", t.momentum.as_str()));
    out.push_str(&row(
        "Confidence",
        &format!("{} ({}%)", t.confidence.level.as_str(), t.confidence.percent),
    ));
    out.push_str(&row("Data points", &t.data_points.to_string()));
    out.push_str(&row("Data quality", &fmt1(t.data_quality_score)));
    out.push_str("</table>\n<h3>Forecast</h3>\n");
    out.push_str(&forecast_table(t));

    out.push_str("<h3>Anomalies</h3>\n");
    let anomalies: Vec<String> = t
        .anomalies
        .iter()
        .map(|a| {
            format!(
                "{}: {} errors ({}, z={})",
                ctx.local_minute(a.captured_at),
                a.errors,
                a.kind.as_str(),
                fmt2(a.z_score)
            )
        })
        .collect();
    out.push_str(&bullet_list(&anomalies));
    out.push_str("<h3>Seasonality</h3>\n");
    out.push_str(&seasonal_block(&t.seasonal));
    out.push_str("</div>\n");
    out
}

fn chart_block(charts: &[ChartKind]) -> String {
    if charts.is_empty() {
        return String::new();
    }
    let mut out = String::from("<h2>Charts</h2>\n");
    for (i, kind) in charts.iter().enumerate() {
        out.push_str(&format!(
            "<div style=\"margin:8px 0;\"><div style=\"font-weight:bold;\">{}</div><img src=\"cid:{}\" alt=\"{}\" style=\"max-width:100%;\"></div>\n",
            kind.title(),
            chart_content_id(i),
            kind.title()
        ));
    }
    out
}

fn service_lists(stats: &SystemStats) -> String {
    let mut out = String::from("<h3>Affected services</h3>\n");
    out.push_str(&bullet_list(&stats.affected_services_list));
    out.push_str("<h3>Critical services</h3>\n");
    out.push_str(&bullet_list(&stats.critical_services_list));
    out
}

fn recommendation_list(stats: &SystemStats) -> String {
    let texts: Vec<String> = recommendations(stats).into_iter().map(|r| r.text).collect();
    bullet_list(&texts)
}

fn service_impact(stats: &SystemStats) -> String {
    let d = &stats.error_distribution;
    let mut out = format!(
        "<p>Distribution: {} without errors, {} low (1-5), {} medium (6-10), {} high (&gt;10)</p>\n",
        d.zero, d.low, d.medium, d.high
    );
    if stats.service_breakdown.is_empty() {
        out.push_str("<p>No services reported.</p>\n");
        return out;
    }
    out.push_str(
        "<table style=\"width:100%;border:1px solid #cfd8dc;\">\n<tr><th>Service</th><th>Errors</th><th>Share</th></tr>\n",
    );
    for s in &stats.service_breakdown {
        let share = if stats.total_errors > 0 {
            s.errors as f64 / stats.total_errors as f64 * 100.0
        } else {
            0.0
        };
        out.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td><div style=\"background:{};height:8px;width:{}%;\"></div>{}%</td></tr>\n",
            escape_html(&s.name),
            s.errors,
            escape_html(&stats.display.color),
            fmt1(share),
            fmt1(share)
        ));
    }
    out.push_str("</table>\n");
    out
}

/// Render the per-system report.
///
/// `charts` lists the inline images that will travel with the message, in attachment order;
/// each is referenced as `cid:chartN`.
pub fn render_system_report(
    stats: &SystemStats,
    charts: &[ChartKind],
    ctx: &RenderContext,
) -> String {
    let captured_at = stats
        .captured_at
        .map(|ts| ctx.local_minute(ts))
        .unwrap_or_else(|| "no snapshot".to_string());

    fill_template(
        TEMPLATE,
        &[
            (
                "title",
                escape_html(&format!("{} System Report", stats.code)),
            ),
            ("color", escape_html(&stats.display.color)),
            ("icon", escape_html(&stats.display.icon)),
            ("code", escape_html(&stats.code)),
            ("captured_at", escape_html(&captured_at)),
            ("trend_label", trend_label(stats.trend_status)),
            ("status_badge", status_badge(stats)),
            ("kpi_grid", kpi_grid(stats)),
            ("advanced_panel", advanced_panel(stats)),
            ("trend_section", trend_section(stats, ctx)),
            ("charts", chart_block(charts)),
            ("service_lists", service_lists(stats)),
            ("recommendations", recommendation_list(stats)),
            ("service_impact", service_impact(stats)),
            ("generated_at", ctx.footer_timestamp()),
        ],
    )
}
