use std::collections::BTreeMap;
use std::path::PathBuf;

use sha2::{Digest, Sha256};
use time::{OffsetDateTime, UtcOffset};

use crate::domain::{columns, IngestWarning, Snapshot, SnapshotRow, SystemDescriptor};
use crate::error::{codes, AppError};
use crate::normalize::timestamps::parse_capture_timestamp;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSnapshot {
    pub snapshot: Snapshot,
    pub warnings: Vec<IngestWarning>,
}

/// Where the bytes came from and the filesystem-reported capture time.
#[derive(Debug, Clone)]
pub struct SnapshotSource {
    pub path: Option<PathBuf>,
    pub file_time: OffsetDateTime,
}

struct Layout {
    service_idx: usize,
    count_idx: usize,
    captured_idx: Option<usize>,
    required_len: usize,
}

impl Layout {
    fn for_system(system: &SystemDescriptor) -> Result<Self, AppError> {
        let service_idx = system.column_index(columns::SERVICE_NAME).ok_or_else(|| {
            AppError::config(format!("schema for {} lacks ServiceName", system.code))
        })?;
        let count_idx = system.column_index(columns::ERROR_COUNT).ok_or_else(|| {
            AppError::config(format!("schema for {} lacks ErrorCount", system.code))
        })?;
        Ok(Self {
            service_idx,
            count_idx,
            captured_idx: system.column_index(columns::CAPTURED_AT),
            required_len: service_idx.max(count_idx) + 1,
        })
    }
}

pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Drop the first `n` physical lines (LF or CRLF) and a leading UTF-8 BOM.
fn skip_lines(text: &str, n: usize) -> &str {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rest = text;
    for _ in 0..n {
        match rest.find('\n') {
            Some(i) => rest = &rest[i + 1..],
            None => return "",
        }
    }
    rest
}

/// A first row whose required cells repeat the schema names (any casing) is a header.
fn looks_like_header(record: &csv::StringRecord, system: &SystemDescriptor, layout: &Layout) -> bool {
    [layout.service_idx, layout.count_idx].iter().all(|&idx| {
        match (record.get(idx), system.schema.get(idx)) {
            (Some(cell), Some(name)) => cell.trim().eq_ignore_ascii_case(name),
            _ => false,
        }
    })
}

fn parse_error_count(
    raw: &str,
    row_no: usize,
    warnings: &mut Vec<IngestWarning>,
) -> i64 {
    let trimmed = raw.trim();
    match trimmed.parse::<i64>() {
        Ok(v) if v < 0 => {
            warnings.push(
                IngestWarning::new(
                    "INGEST_NEGATIVE_COUNT_CLAMPED",
                    "Negative ErrorCount clamped to 0",
                )
                .with_details(format!("row={row_no}; value={v}")),
            );
            0
        }
        Ok(v) => v,
        Err(e) => {
            warnings.push(
                IngestWarning::new("INGEST_COUNT_COERCED", "Non-numeric ErrorCount coerced to 0")
                    .with_details(format!("row={row_no}; value={trimmed}; err={e}")),
            );
            0
        }
    }
}

/// Parse one snapshot CSV for `system`.
///
/// Columns are positional per `system.schema` after `system.skip_rows` lines. Non-numeric counts
/// become 0, unknown trailing fields are kept in `extra`, an empty file is an empty snapshot.
/// A first row that neither looks like a header nor reaches the required positions makes the
/// whole file `PARSE_MALFORMED`; later short rows are skipped with a warning.
pub fn parse_snapshot(
    system: &SystemDescriptor,
    bytes: &[u8],
    source: SnapshotSource,
    local_offset: UtcOffset,
) -> Result<ParsedSnapshot, AppError> {
    let layout = Layout::for_system(system)?;
    let text = std::str::from_utf8(bytes).map_err(|e| {
        AppError::new(codes::PARSE_MALFORMED, "Snapshot is not valid UTF-8")
            .with_details(format!("system={}; err={e}", system.code))
    })?;
    let body = skip_lines(text, system.skip_rows);

    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut warnings = Vec::new();
    let mut rows = Vec::new();
    let mut embedded_ts: Option<OffsetDateTime> = None;
    let mut ts_checked = false;
    let mut first = true;

    for (i, result) in rdr.records().enumerate() {
        let row_no = system.skip_rows + i + 1;
        let record = result.map_err(|e| {
            AppError::new(codes::PARSE_MALFORMED, "Failed to parse snapshot CSV row")
                .with_details(format!("system={}; row={row_no}; err={e}", system.code))
        })?;

        if record.iter().all(|f| f.is_empty()) {
            continue;
        }

        let is_first = std::mem::replace(&mut first, false);
        if is_first && system.skip_rows == 0 && looks_like_header(&record, system, &layout) {
            warnings.push(
                IngestWarning::new("INGEST_HEADER_SKIPPED", "Leading header row skipped")
                    .with_details(format!("row={row_no}")),
            );
            continue;
        }

        if record.len() < layout.required_len {
            if is_first {
                return Err(AppError::new(
                    codes::PARSE_MALFORMED,
                    "First row lacks required columns",
                )
                .with_details(format!(
                    "system={}; row={row_no}; fields={}; required={}",
                    system.code,
                    record.len(),
                    layout.required_len
                )));
            }
            warnings.push(
                IngestWarning::new("INGEST_ROW_TOO_SHORT", "Row lacks required columns; skipped")
                    .with_details(format!("row={row_no}; fields={}", record.len())),
            );
            continue;
        }

        let service_name = record.get(layout.service_idx).unwrap_or_default().to_string();
        if service_name.is_empty() {
            warnings.push(
                IngestWarning::new("INGEST_EMPTY_SERVICE", "Row without ServiceName; skipped")
                    .with_details(format!("row={row_no}")),
            );
            continue;
        }
        let error_count =
            parse_error_count(record.get(layout.count_idx).unwrap_or_default(), row_no, &mut warnings);

        let mut extra = BTreeMap::new();
        for (idx, cell) in record.iter().enumerate() {
            if idx == layout.service_idx || idx == layout.count_idx {
                continue;
            }
            let name = system
                .schema
                .get(idx)
                .cloned()
                .unwrap_or_else(|| format!("column_{}", idx + 1));
            extra.insert(name, cell.to_string());
        }

        // Only the first data row carries the capture time.
        if !std::mem::replace(&mut ts_checked, true) {
            if let Some(raw) = layout.captured_idx.and_then(|idx| record.get(idx)) {
                embedded_ts = parse_capture_timestamp(raw, local_offset, &mut warnings);
            }
        }

        rows.push(SnapshotRow {
            service_name,
            error_count,
            extra,
        });
    }

    let captured_at = embedded_ts.unwrap_or(source.file_time);
    let mut snapshot = Snapshot::new(system.code.clone(), captured_at, rows);
    snapshot.fingerprint = fingerprint(bytes);
    snapshot.source = source.path;

    for w in &warnings {
        tracing::debug!(system = %system.code, code = %w.code, details = ?w.details, "ingest warning");
    }

    Ok(ParsedSnapshot { snapshot, warnings })
}
