//! Deterministic HTML rendering for the per-system report and the executive summary.
//!
//! Rendering is a pure function of its inputs: the only clock value used is the
//! `generated_at` carried in `RenderContext`. Templates live under `templates/` and use
//! `{{name}}` placeholders that are filled in a single pass.

pub mod executive;
pub mod recommend;
pub mod system;

use time::{OffsetDateTime, UtcOffset};

use crate::normalize::timestamps::{format_date, format_minute};
use crate::stats::{SystemStats, SystemStatus, TrendStatus};

pub use executive::{
    executive_priority, executive_subject, render_executive_report, ExecutiveEntry, GlobalMetrics,
};
pub use recommend::{recommendations, Bucket, Recommendation, RecommendationKind};
pub use system::{render_system_report, system_subject};

/// Clock and locale inputs shared by both report flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderContext {
    pub generated_at: OffsetDateTime,
    pub local_offset: UtcOffset,
}

impl RenderContext {
    pub fn new(generated_at: OffsetDateTime, local_offset: UtcOffset) -> Self {
        Self {
            generated_at,
            local_offset,
        }
    }

    pub fn report_date(&self) -> String {
        format_date(self.generated_at, self.local_offset)
    }

    pub fn footer_timestamp(&self) -> String {
        format!(
            "{} (UTC{})",
            format_minute(self.generated_at, self.local_offset),
            offset_label(self.local_offset)
        )
    }

    pub fn local_minute(&self, ts: OffsetDateTime) -> String {
        format_minute(ts, self.local_offset)
    }
}

fn offset_label(offset: UtcOffset) -> String {
    let (h, m, _) = offset.as_hms();
    let sign = if offset.is_negative() { '-' } else { '+' };
    format!("{sign}{:02}:{:02}", h.unsigned_abs(), m.unsigned_abs())
}

/// Content-ID of the n-th inline chart (0-based), as referenced by `cid:` in the HTML.
pub fn chart_content_id(index: usize) -> String {
    format!("chart{}", index + 1)
}

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Two decimals; never renders `-0.00`.
pub fn fmt2(value: f64) -> String {
    format!("{:.2}", value + 0.0)
}

pub fn fmt1(value: f64) -> String {
    format!("{:.1}", value + 0.0)
}

pub fn signed(value: i64) -> String {
    if value > 0 {
        format!("+{value}")
    } else {
        value.to_string()
    }
}

pub fn signed2(value: f64) -> String {
    if value > 0.0 {
        format!("+{}", fmt2(value))
    } else {
        fmt2(value)
    }
}

pub fn status_color(status: SystemStatus) -> &'static str {
    match status {
        SystemStatus::Healthy => "#2e7d32",
        SystemStatus::Warning => "#f9a825",
        SystemStatus::Critical => "#c62828",
        SystemStatus::NoData => "#757575",
    }
}

pub fn trend_color(status: TrendStatus) -> &'static str {
    match status {
        TrendStatus::Improving => "#2e7d32",
        TrendStatus::Degrading => "#c62828",
        TrendStatus::Stable => "#455a64",
    }
}

pub fn status_badge(stats: &SystemStats) -> String {
    format!(
        r#"<span style="display:inline-block;padding:4px 12px;border-radius:12px;background:{};color:#ffffff;font-weight:bold;">{} {}</span>"#,
        status_color(stats.status),
        stats.status.emoji(),
        stats.status.as_str()
    )
}

pub fn trend_label(status: TrendStatus) -> String {
    format!("{} {}", status.indicator(), status.as_str())
}

/// `<ul>` of escaped items, or a single "None" item.
pub fn bullet_list(items: &[String]) -> String {
    let mut out = String::from("<ul>\n");
    if items.is_empty() {
        out.push_str("<li>None</li>\n");
    }
    for item in items {
        out.push_str(&format!("<li>{}</li>\n", escape_html(item)));
    }
    out.push_str("</ul>\n");
    out
}

/// Substitute `{{key}}` tokens in one left-to-right pass. Unknown tokens are kept verbatim,
/// and substituted values are never rescanned.
pub fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len() * 2);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                match values.iter().find(|(k, _)| *k == key) {
                    Some((_, v)) => out.push_str(v),
                    None => out.push_str(&rest[start..start + 2 + end + 2]),
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn fill_template_is_single_pass() {
        let out = fill_template(
            "<p>{{a}} and {{ b }} and {{missing}}</p>",
            &[("a", "{{b}}".to_string()), ("b", "B".to_string())],
        );
        assert_eq!(out, "<p>{{b}} and B and {{missing}}</p>");
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<svc "a" & 'b'>"#),
            "&lt;svc &quot;a&quot; &amp; &#39;b&#39;&gt;"
        );
    }

    #[test]
    fn number_formatting_hides_negative_zero() {
        assert_eq!(fmt2(-0.0), "0.00");
        assert_eq!(signed2(-0.0), "0.00");
        assert_eq!(signed2(1.5), "+1.50");
        assert_eq!(signed(3), "+3");
        assert_eq!(signed(-2), "-2");
        assert_eq!(signed(0), "0");
    }

    #[test]
    fn footer_uses_local_offset() {
        let ctx = RenderContext::new(datetime!(2025-03-02 23:30 UTC), offset!(+2));
        assert_eq!(ctx.report_date(), "2025-03-03");
        assert_eq!(ctx.footer_timestamp(), "2025-03-03 01:30 (UTC+02:00)");
        let ctx = RenderContext::new(datetime!(2025-03-02 23:30 UTC), offset!(-5:30));
        assert_eq!(ctx.footer_timestamp(), "2025-03-02 18:00 (UTC-05:30)");
    }

    #[test]
    fn content_ids_are_one_based() {
        assert_eq!(chart_content_id(0), "chart1");
        assert_eq!(chart_content_id(3), "chart4");
    }
}
