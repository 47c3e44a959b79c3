use time::format_description::well_known::Rfc3339;
use time::{format_description, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::domain::IngestWarning;

/// Formats accepted for an embedded capture timestamp that carries no offset.
/// These are interpreted in the configured local offset.
const LOCAL_FORMATS: [&str; 4] = [
    "[year]-[month]-[day] [hour]:[minute]:[second]",
    "[year]-[month]-[day] [hour]:[minute]",
    "[year]-[month]-[day]T[hour]:[minute]:[second]",
    "[year]-[month]-[day]T[hour]:[minute]",
];

fn parse_primitive_in_offset(
    raw: &str,
    fmt: &str,
    offset: UtcOffset,
    warnings: &mut Vec<IngestWarning>,
) -> Option<OffsetDateTime> {
    let items = match format_description::parse(fmt) {
        Ok(i) => i,
        Err(e) => {
            warnings.push(
                IngestWarning::new(
                    "INGEST_TS_FORMAT_CONFIG_FAILED",
                    "Timestamp format config error",
                )
                .with_details(format!("fmt={fmt}; err={e}")),
            );
            return None;
        }
    };

    PrimitiveDateTime::parse(raw, &items)
        .ok()
        .map(|p| p.assume_offset(offset))
}

/// Parse an embedded capture timestamp.
///
/// RFC 3339 values are taken as-is. Offset-less values from the allow-list are read in
/// `offset` and produce an `INGEST_TS_ASSUMED_OFFSET` warning. Anything else yields `None`
/// with an `INGEST_TS_UNPARSEABLE` warning; callers keep the file time in that case.
pub fn parse_capture_timestamp(
    raw_input: &str,
    offset: UtcOffset,
    warnings: &mut Vec<IngestWarning>,
) -> Option<OffsetDateTime> {
    let trimmed = raw_input.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(dt);
    }

    for fmt in LOCAL_FORMATS {
        if let Some(dt) = parse_primitive_in_offset(trimmed, fmt, offset, warnings) {
            warnings.push(
                IngestWarning::new(
                    "INGEST_TS_ASSUMED_OFFSET",
                    "Embedded timestamp has no offset; read in configured offset",
                )
                .with_details(format!("raw={trimmed}; offset={offset}")),
            );
            return Some(dt);
        }
    }

    warnings.push(
        IngestWarning::new(
            "INGEST_TS_UNPARSEABLE",
            "Unparseable embedded timestamp; kept file time",
        )
        .with_details(format!("raw={trimmed}")),
    );
    None
}

/// `YYYY-MM-DD` of an instant seen from `offset`.
pub fn format_date(ts: OffsetDateTime, offset: UtcOffset) -> String {
    let local = ts.to_offset(offset);
    format!(
        "{:04}-{:02}-{:02}",
        local.year(),
        u8::from(local.month()),
        local.day()
    )
}

/// `YYYY-MM-DD HH:MM` of an instant seen from `offset`.
pub fn format_minute(ts: OffsetDateTime, offset: UtcOffset) -> String {
    let local = ts.to_offset(offset);
    format!(
        "{} {:02}:{:02}",
        format_date(ts, offset),
        local.hour(),
        local.minute()
    )
}

/// Parse `+HH:MM` / `-HH:MM` (or `Z`).
pub fn parse_utc_offset(raw: &str) -> Option<UtcOffset> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Some(UtcOffset::UTC);
    }
    let items =
        format_description::parse("[offset_hour sign:mandatory]:[offset_minute]").ok()?;
    UtcOffset::parse(trimmed, &items).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn rfc3339_is_taken_without_warning() {
        let mut warnings = Vec::new();
        let dt = parse_capture_timestamp("2025-03-01T08:30:00Z", offset!(+2), &mut warnings);
        assert_eq!(dt, Some(datetime!(2025-03-01 08:30 UTC)));
        assert!(warnings.is_empty());
    }

    #[test]
    fn local_format_uses_configured_offset() {
        let mut warnings = Vec::new();
        let dt = parse_capture_timestamp("2025-03-01 10:30", offset!(+2), &mut warnings);
        assert_eq!(dt, Some(datetime!(2025-03-01 08:30 UTC)));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].code, "INGEST_TS_ASSUMED_OFFSET");
    }

    #[test]
    fn garbage_is_reported_not_guessed() {
        let mut warnings = Vec::new();
        assert_eq!(
            parse_capture_timestamp("yesterday-ish", UtcOffset::UTC, &mut warnings),
            None
        );
        assert_eq!(warnings[0].code, "INGEST_TS_UNPARSEABLE");
    }

    #[test]
    fn offsets_parse_with_sign() {
        assert_eq!(parse_utc_offset("+01:00"), Some(offset!(+1)));
        assert_eq!(parse_utc_offset("-05:30"), Some(offset!(-5:30)));
        assert_eq!(parse_utc_offset("Z"), Some(UtcOffset::UTC));
        assert_eq!(parse_utc_offset("0100"), None);
    }

    #[test]
    fn date_formatting_crosses_midnight_with_offset() {
        let ts = datetime!(2025-03-01 23:30 UTC);
        assert_eq!(format_date(ts, UtcOffset::UTC), "2025-03-01");
        assert_eq!(format_date(ts, offset!(+1)), "2025-03-02");
        assert_eq!(format_minute(ts, offset!(+1)), "2025-03-02 00:30");
    }
}
