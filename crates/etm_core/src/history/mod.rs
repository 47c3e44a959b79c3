use std::sync::Arc;
use std::time::Duration;

use time::{OffsetDateTime, UtcOffset};

use crate::domain::{HistoryWindow, Snapshot, SystemDescriptor};
use crate::error::{AppError, ErrorKind};
use crate::ingest::snapshot_csv::{parse_snapshot, ParsedSnapshot, SnapshotSource};
use crate::store::{SnapshotFile, SnapshotStore};
use crate::task::run_blocking;

/// Reads and parses snapshots for one system, each file read bounded by `read_timeout`.
#[derive(Clone)]
pub struct HistoryWindower {
    store: Arc<dyn SnapshotStore>,
    read_timeout: Duration,
    local_offset: UtcOffset,
}

impl HistoryWindower {
    pub fn new(store: Arc<dyn SnapshotStore>, read_timeout: Duration, local_offset: UtcOffset) -> Self {
        Self {
            store,
            read_timeout,
            local_offset,
        }
    }

    /// Snapshots captured in `[now - days, now]`, ascending.
    ///
    /// Listing failures propagate; a file that cannot be read or parsed is skipped with a warning.
    /// When every listed file timed out the window is not trusted and `TIMEOUT` is returned.
    pub async fn window(
        &self,
        system: &SystemDescriptor,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<HistoryWindow, AppError> {
        let files = {
            let store = Arc::clone(&self.store);
            let sys = system.clone();
            run_blocking(self.read_timeout, "snapshot listing", move || {
                store.list_recent(&sys, days, now)
            })
            .await?
        };

        let listed = files.len();
        let mut snapshots = Vec::with_capacity(listed);
        let mut timed_out = 0usize;
        for file in files {
            match self.load(system, &file).await {
                Ok(parsed) => snapshots.push(parsed.snapshot),
                Err(e) => {
                    if e.kind() == ErrorKind::Timeout {
                        timed_out += 1;
                    }
                    tracing::warn!(
                        system = %system.code,
                        path = %file.path.display(),
                        error = %e,
                        "skipping snapshot in history window"
                    );
                }
            }
        }

        if timed_out > 0 {
            if timed_out == listed {
                return Err(
                    AppError::timeout("Every snapshot read in the history window timed out")
                        .with_details(format!("system={}; files={listed}", system.code)),
                );
            }
            tracing::warn!(
                system = %system.code,
                timed_out,
                listed,
                "history window shortened by read timeouts"
            );
        }

        Ok(assemble_window(&system.code, days, now, snapshots))
    }

    /// Most recent snapshot of the system, parsed.
    pub async fn latest(&self, system: &SystemDescriptor) -> Result<Option<ParsedSnapshot>, AppError> {
        let latest = {
            let store = Arc::clone(&self.store);
            let sys = system.clone();
            run_blocking(self.read_timeout, "latest snapshot lookup", move || store.latest(&sys))
                .await?
        };
        match latest {
            Some(file) => self.load(system, &file).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn load(
        &self,
        system: &SystemDescriptor,
        file: &SnapshotFile,
    ) -> Result<ParsedSnapshot, AppError> {
        let bytes = self.read_bytes(file).await?;
        parse_snapshot(
            system,
            &bytes,
            SnapshotSource {
                path: Some(file.path.clone()),
                file_time: file.created_at,
            },
            self.local_offset,
        )
    }

    pub async fn read_bytes(&self, file: &SnapshotFile) -> Result<Vec<u8>, AppError> {
        let store = Arc::clone(&self.store);
        let f = file.clone();
        run_blocking(self.read_timeout, "snapshot read", move || store.read(&f)).await
    }

    pub async fn find_named(
        &self,
        system: &SystemDescriptor,
        base_name: &str,
    ) -> Result<Option<SnapshotFile>, AppError> {
        let store = Arc::clone(&self.store);
        let sys = system.clone();
        let name = base_name.to_string();
        run_blocking(self.read_timeout, "attachment lookup", move || {
            store.find_named(&sys, &name)
        })
        .await
    }
}

/// Order snapshots ascending by capture time and drop any outside `[now - days, now]`
/// or belonging to another system. An embedded timestamp may move a file out of the window.
pub fn assemble_window(
    system: &str,
    days: u32,
    now: OffsetDateTime,
    mut snapshots: Vec<Snapshot>,
) -> HistoryWindow {
    let start = now - time::Duration::days(i64::from(days));
    snapshots.retain(|s| s.system == system && s.captured_at >= start && s.captured_at <= now);
    snapshots.sort_by(|a, b| {
        (a.captured_at, &a.source).cmp(&(b.captured_at, &b.source))
    });
    HistoryWindow {
        system: system.to_string(),
        days,
        snapshots,
    }
}
