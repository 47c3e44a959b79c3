#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use etm_core::domain::{DisplayHints, SystemDescriptor};
use etm_core::engine::{EngineSettings, MonitoringEngine};
use etm_core::error::{codes, AppError};
use etm_core::mail::MemorySink;
use etm_core::registry::SystemRegistry;
use etm_core::store::{sort_files, within_window, SnapshotFile, SnapshotStore};
use time::{OffsetDateTime, UtcOffset};

pub const HEADER: &str = "Domain,ServiceType,ServiceName,ErrorCount,ErrorReason";

/// Snapshot store backed by a map of per-system files, with failure and latency injection.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    files: BTreeMap<String, Vec<(SnapshotFile, Vec<u8>)>>,
    failing: BTreeSet<String>,
    delays: BTreeMap<String, Duration>,
    read_delays: BTreeMap<String, Duration>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, code: &str, name: &str, at: OffsetDateTime, csv: &str) -> Self {
        let file = SnapshotFile {
            path: PathBuf::from(format!("mem/{code}/{name}")),
            created_at: at,
        };
        self.files
            .entry(code.to_string())
            .or_default()
            .push((file, csv.as_bytes().to_vec()));
        self
    }

    /// Every listing for `code` fails with `IO_LIST_FAILED`.
    pub fn failing_for(mut self, code: &str) -> Self {
        self.failing.insert(code.to_string());
        self
    }

    /// Listings for `code` block for `delay` before answering.
    pub fn slow_for(mut self, code: &str, delay: Duration) -> Self {
        self.delays.insert(code.to_string(), delay);
        self
    }

    /// Reads of the file named `name` block for `delay`; listings stay fast.
    pub fn slow_read_of(mut self, name: &str, delay: Duration) -> Self {
        self.read_delays.insert(name.to_string(), delay);
        self
    }

    fn files_of(&self, system: &SystemDescriptor) -> Result<Vec<SnapshotFile>, AppError> {
        if let Some(delay) = self.delays.get(&system.code) {
            std::thread::sleep(*delay);
        }
        if self.failing.contains(&system.code) {
            return Err(AppError::new(codes::IO_LIST_FAILED, "injected listing failure")
                .with_details(format!("system={}", system.code)));
        }
        let mut files: Vec<SnapshotFile> = self
            .files
            .get(&system.code)
            .map(|v| v.iter().map(|(f, _)| f.clone()).collect())
            .unwrap_or_default();
        sort_files(&mut files);
        Ok(files)
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn list_recent(
        &self,
        system: &SystemDescriptor,
        days: u32,
        now: OffsetDateTime,
    ) -> Result<Vec<SnapshotFile>, AppError> {
        Ok(within_window(self.files_of(system)?, days, now))
    }

    fn latest(&self, system: &SystemDescriptor) -> Result<Option<SnapshotFile>, AppError> {
        Ok(self.files_of(system)?.pop())
    }

    fn read(&self, file: &SnapshotFile) -> Result<Vec<u8>, AppError> {
        if let Some(delay) = self.read_delays.get(&file.base_name()) {
            std::thread::sleep(*delay);
        }
        self.files
            .values()
            .flatten()
            .find(|(f, _)| f.path == file.path)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| {
                AppError::new(codes::IO_READ_FAILED, "no such file")
                    .with_details(file.path.display().to_string())
            })
    }

    fn find_named(
        &self,
        system: &SystemDescriptor,
        base_name: &str,
    ) -> Result<Option<SnapshotFile>, AppError> {
        Ok(self
            .files_of(system)?
            .into_iter()
            .find(|f| f.base_name() == base_name))
    }
}

pub fn system(code: &str) -> SystemDescriptor {
    SystemDescriptor {
        code: code.to_string(),
        directory: PathBuf::from(format!("mem/{code}")),
        schema: HEADER.split(',').map(|c| c.to_string()).collect(),
        skip_rows: 0,
        recipients: vec![format!("{}-team@example.com", code.to_lowercase())],
        display: DisplayHints {
            color: "#1f4e79".to_string(),
            icon: "📊".to_string(),
        },
        attachment: None,
        attach_snapshot: true,
    }
}

/// CSV text with a header row and one row per `(service, errors)`.
pub fn csv(rows: &[(&str, i64)]) -> String {
    let mut out = format!("{HEADER}\n");
    for (service, errors) in rows {
        let reason = if *errors == 0 { "ok" } else { "failure" };
        out.push_str(&format!("D,T,{service},{errors},{reason}\n"));
    }
    out
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        history_days: 7,
        max_concurrency: 2,
        read_timeout: Duration::from_secs(5),
        send_timeout: Duration::from_secs(5),
        local_offset: UtcOffset::UTC,
        from_address: "etm@example.com".to_string(),
        summary_recipients: vec!["exec@example.com".to_string()],
    }
}

pub fn engine(
    systems: Vec<SystemDescriptor>,
    store: MemorySnapshotStore,
    sink: Arc<MemorySink>,
    settings: EngineSettings,
) -> MonitoringEngine {
    MonitoringEngine::new(SystemRegistry::new(systems), Arc::new(store), sink, settings)
}
