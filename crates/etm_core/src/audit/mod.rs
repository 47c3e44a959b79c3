//! Optional SQLite trail of runs: one `runs` row per invocation, one `run_systems` row per system.

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::domain::SystemState;
use crate::engine::RunSummary;
use crate::error::{codes, AppError};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunSystemRecord {
    pub code: String,
    pub state: String,
    pub report_kind: Option<String>,
    pub status: Option<String>,
    pub total_errors: Option<i64>,
    pub fingerprint: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub systems_total: i64,
    pub systems_done: i64,
    pub systems_failed: i64,
    pub systems_timeout_skipped: i64,
    pub snapshots_read: i64,
    pub executive_delivered: bool,
    pub exit_code: i64,
    pub systems: Vec<RunSystemRecord>,
}

fn write_err(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::new(codes::AUDIT_WRITE_FAILED, format!("Failed to write {what}"))
        .with_details(e.to_string())
}

fn query_err(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::new(codes::DB_QUERY_FAILED, format!("Failed to read {what}"))
        .with_details(e.to_string())
}

fn rfc3339(ts: OffsetDateTime) -> Result<String, AppError> {
    ts.format(&Rfc3339)
        .map_err(|e| write_err("timestamp", e))
}

/// Persist a finished run in one transaction. Returns the new run id.
pub fn record_run(
    conn: &mut Connection,
    summary: &RunSummary,
    exit_code: i32,
    recorded_at: OffsetDateTime,
) -> Result<i64, AppError> {
    let tx = conn.transaction().map_err(|e| {
        AppError::new(codes::DB_TX_FAILED, "Failed to start audit transaction")
            .with_details(e.to_string())
    })?;

    tx.execute(
        "INSERT INTO runs(started_at, recorded_at, systems_total, systems_done, systems_failed,
           systems_timeout_skipped, snapshots_read, executive_delivered, exit_code)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            rfc3339(summary.started_at)?,
            rfc3339(recorded_at)?,
            summary.systems.len() as i64,
            summary.count(SystemState::Done) as i64,
            summary.count(SystemState::Failed) as i64,
            summary.count(SystemState::TimeoutSkipped) as i64,
            summary.snapshots_read as i64,
            summary.executive_delivered,
            exit_code,
        ],
    )
    .map_err(|e| write_err("run row", e))?;
    let run_id = tx.last_insert_rowid();

    for (position, s) in summary.systems.iter().enumerate() {
        let stats_json = s
            .stats
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| write_err("system stats", e))?;
        tx.execute(
            "INSERT INTO run_systems(run_id, position, code, state, report_kind, status,
               total_errors, total_services, fingerprint, error_code, error_message, stats_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                run_id,
                position as i64,
                s.code,
                s.state.as_str(),
                s.report_kind.map(|k| k.as_str()),
                s.stats.as_ref().map(|st| st.status.as_str()),
                s.stats.as_ref().map(|st| st.total_errors),
                s.stats.as_ref().map(|st| st.total_services as i64),
                s.fingerprint,
                s.error.as_ref().map(|e| e.code.clone()),
                s.error.as_ref().map(|e| e.message.clone()),
                stats_json,
            ],
        )
        .map_err(|e| write_err("system row", e))?;
    }

    tx.commit().map_err(|e| {
        AppError::new(codes::DB_TX_FAILED, "Failed to commit audit transaction")
            .with_details(e.to_string())
    })?;
    Ok(run_id)
}

fn systems_for(conn: &Connection, run_id: i64) -> Result<Vec<RunSystemRecord>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT code, state, report_kind, status, total_errors, fingerprint, error_code
             FROM run_systems WHERE run_id = ?1 ORDER BY position",
        )
        .map_err(|e| query_err("run systems", e))?;
    let rows = stmt
        .query_map([run_id], |row| {
            Ok(RunSystemRecord {
                code: row.get(0)?,
                state: row.get(1)?,
                report_kind: row.get(2)?,
                status: row.get(3)?,
                total_errors: row.get(4)?,
                fingerprint: row.get(5)?,
                error_code: row.get(6)?,
            })
        })
        .map_err(|e| query_err("run systems", e))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(|e| query_err("run system row", e))
}

/// Most recent runs first.
pub fn recent_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>, AppError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, started_at, systems_total, systems_done, systems_failed,
               systems_timeout_skipped, snapshots_read, executive_delivered, exit_code
             FROM runs ORDER BY id DESC LIMIT ?1",
        )
        .map_err(|e| query_err("runs", e))?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            Ok(RunRecord {
                id: row.get(0)?,
                started_at: row.get(1)?,
                systems_total: row.get(2)?,
                systems_done: row.get(3)?,
                systems_failed: row.get(4)?,
                systems_timeout_skipped: row.get(5)?,
                snapshots_read: row.get(6)?,
                executive_delivered: row.get(7)?,
                exit_code: row.get(8)?,
                systems: Vec::new(),
            })
        })
        .map_err(|e| query_err("runs", e))?;
    let mut runs = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| query_err("run row", e))?;
    for run in &mut runs {
        run.systems = systems_for(conn, run.id)?;
    }
    Ok(runs)
}
