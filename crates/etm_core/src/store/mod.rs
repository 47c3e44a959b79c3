use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::domain::SystemDescriptor;
use crate::error::{codes, AppError};

/// Which filesystem time stands for the producer-side capture time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureTimeSource {
    /// Birth time; falls back to mtime where the filesystem does not report it.
    #[default]
    Created,
    Modified,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub created_at: OffsetDateTime,
}

impl SnapshotFile {
    pub fn base_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Read-only view over per-system snapshot directories.
///
/// Implementations are blocking; the engine calls them from `spawn_blocking` under a timeout.
pub trait SnapshotStore: Send + Sync {
    /// CSV files captured within `[now - days, now]`, ascending by capture time.
    fn list_recent(
        &self,
        system: &SystemDescriptor,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<Vec<SnapshotFile>, AppError>;

    /// Most recent CSV file, regardless of age.
    fn latest(&self, system: &SystemDescriptor) -> Result<Option<SnapshotFile>, AppError>;

    fn read(&self, file: &SnapshotFile) -> Result<Vec<u8>, AppError>;

    /// File with exactly this base name in the system directory, if present.
    fn find_named(
        &self,
        system: &SystemDescriptor,
        base_name: &str,
    ) -> Result<Option<SnapshotFile>, AppError>;
}

#[derive(Debug, Clone, Default)]
pub struct FsSnapshotStore {
    capture_time: CaptureTimeSource,
}

impl FsSnapshotStore {
    pub fn new(capture_time: CaptureTimeSource) -> Self {
        Self { capture_time }
    }

    fn capture_time_of(&self, meta: &fs::Metadata) -> std::io::Result<SystemTime> {
        match self.capture_time {
            CaptureTimeSource::Created => meta.created().or_else(|_| meta.modified()),
            CaptureTimeSource::Modified => meta.modified(),
        }
    }

    /// All CSV files of a directory with their capture times, ascending.
    /// Entries that cannot be inspected are skipped with a warning.
    fn scan(&self, system: &SystemDescriptor) -> Result<Vec<SnapshotFile>, AppError> {
        let entries = fs::read_dir(&system.directory).map_err(|e| {
            AppError::new(codes::IO_LIST_FAILED, "Failed to list snapshot directory")
                .with_details(format!("dir={}; err={e}", system.directory.display()))
                .with_retryable(true)
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(system = %system.code, error = %e, "skipping unreadable directory entry");
                    continue;
                }
            };
            let path = entry.path();
            if !is_csv(&path) {
                tracing::debug!(system = %system.code, path = %path.display(), "skipping non-CSV entry");
                continue;
            }
            let meta = match entry.metadata() {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(system = %system.code, path = %path.display(), error = %e, "skipping entry without metadata");
                    continue;
                }
            };
            match self.capture_time_of(&meta) {
                Ok(t) => files.push(SnapshotFile {
                    path,
                    created_at: OffsetDateTime::from(t),
                }),
                Err(e) => {
                    tracing::warn!(system = %system.code, path = %path.display(), error = %e, "skipping entry without capture time");
                }
            }
        }

        sort_files(&mut files);
        Ok(files)
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case("csv"))
        .unwrap_or(false)
}

/// Ascending by capture time; ties broken by path so ordering is deterministic.
pub fn sort_files(files: &mut [SnapshotFile]) {
    files.sort_by(|a, b| (a.created_at, &a.path).cmp(&(b.created_at, &b.path)));
}

/// Keep files whose capture time lies in `[now - days, now]`.
pub fn within_window(
    files: Vec<SnapshotFile>,
    days: u32,
    now: OffsetDateTime,
) -> Vec<SnapshotFile> {
    let start = now - Duration::days(i64::from(days));
    files
        .into_iter()
        .filter(|f| f.created_at >= start && f.created_at <= now)
        .collect()
}

impl SnapshotStore for FsSnapshotStore {
    fn list_recent(
        &self,
        system: &SystemDescriptor,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<Vec<SnapshotFile>, AppError> {
        Ok(within_window(self.scan(system)?, days, now))
    }

    fn latest(&self, system: &SystemDescriptor) -> Result<Option<SnapshotFile>, AppError> {
        Ok(self.scan(system)?.pop())
    }

    fn read(&self, file: &SnapshotFile) -> Result<Vec<u8>, AppError> {
        fs::read(&file.path).map_err(|e| {
            AppError::new(codes::IO_READ_FAILED, "Failed to read snapshot file")
                .with_details(format!("path={}; err={e}", file.path.display()))
        })
    }

    fn find_named(
        &self,
        system: &SystemDescriptor,
        base_name: &str,
    ) -> Result<Option<SnapshotFile>, AppError> {
        let path = system.directory.join(base_name);
        if path.file_name().map(|n| n.to_string_lossy() != base_name).unwrap_or(true) {
            return Ok(None);
        }
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {
                let created_at = self
                    .capture_time_of(&meta)
                    .map(OffsetDateTime::from)
                    .map_err(|e| {
                        AppError::new(codes::IO_READ_FAILED, "Failed to stat attachment")
                            .with_details(format!("path={}; err={e}", path.display()))
                    })?;
                Ok(Some(SnapshotFile { path, created_at }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::new(codes::IO_READ_FAILED, "Failed to stat attachment")
                .with_details(format!("path={}; err={e}", path.display()))),
        }
    }
}
