//! One monitoring run: per-system fan-out followed by the executive summary.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use time::{OffsetDateTime, UtcOffset};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chart::{render_charts, RenderedChart};
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::domain::{ReportKind, Snapshot, SystemDescriptor, SystemState};
use crate::error::{codes, AppError, ErrorKind};
use crate::history::HistoryWindower;
use crate::mail::{Attachment, EmailSink, InlineImage, Message, MIME_CSV, MIME_PNG};
use crate::registry::SystemRegistry;
use crate::report::{
    chart_content_id, executive_subject, render_executive_report, render_system_report,
    system_subject, ExecutiveEntry, RenderContext,
};
use crate::stats::{aggregate, SystemStats};
use crate::store::{SnapshotFile, SnapshotStore};
use crate::task::run_blocking;
use crate::trend::{analyze, TrendResult};

/// Upper bound on rasterizing one system's charts.
pub const CHART_TIMEOUT: Duration = Duration::from_secs(30);

/// Run parameters resolved from `EngineConfig`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub history_days: u32,
    pub max_concurrency: usize,
    pub read_timeout: Duration,
    pub send_timeout: Duration,
    pub local_offset: UtcOffset,
    pub from_address: String,
    pub summary_recipients: Vec<String>,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Result<Self, AppError> {
        Ok(Self {
            history_days: config.history_days,
            max_concurrency: config.max_concurrency.max(1),
            read_timeout: config.read_timeout(),
            send_timeout: config.send_timeout(),
            local_offset: config.local_offset()?,
            from_address: config.email.from_address.clone(),
            summary_recipients: config.email.summary_recipients.clone(),
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SystemRun {
    pub code: String,
    pub state: SystemState,
    /// Absent when the system never got as far as building a report.
    pub report_kind: Option<ReportKind>,
    pub stats: Option<SystemStats>,
    pub error: Option<AppError>,
    /// Fingerprint of the snapshot the report was built from.
    pub fingerprint: Option<String>,
    pub snapshots_read: usize,
}

impl SystemRun {
    fn skipped(code: &str, state: SystemState, error: AppError) -> Self {
        Self {
            code: code.to_string(),
            state,
            report_kind: None,
            stats: None,
            error: Some(error),
            fingerprint: None,
            snapshots_read: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    /// Registry order.
    pub systems: Vec<SystemRun>,
    pub executive_delivered: bool,
    pub executive_error: Option<AppError>,
    /// Snapshots parsed across all systems.
    pub snapshots_read: usize,
}

impl RunSummary {
    pub fn count(&self, state: SystemState) -> usize {
        self.systems.iter().filter(|s| s.state == state).count()
    }
}

struct Shared {
    windower: HistoryWindower,
    sink: Arc<dyn EmailSink>,
    settings: EngineSettings,
}

pub struct MonitoringEngine {
    registry: SystemRegistry,
    shared: Arc<Shared>,
}

impl MonitoringEngine {
    pub fn new(
        registry: SystemRegistry,
        store: Arc<dyn SnapshotStore>,
        sink: Arc<dyn EmailSink>,
        settings: EngineSettings,
    ) -> Self {
        let windower = HistoryWindower::new(store, settings.read_timeout, settings.local_offset);
        Self {
            registry,
            shared: Arc::new(Shared {
                windower,
                sink,
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    pub async fn run_with_clock(&self, clock: &dyn Clock, deadline: Option<Duration>) -> RunSummary {
        self.run_once(clock.now(), deadline).await
    }

    /// Process every registered system, then deliver the executive summary.
    ///
    /// Never fails: per-system problems are recorded in the summary. Systems still pending
    /// when `deadline` expires are marked `TIMEOUT_SKIPPED`; the executive summary is sent
    /// regardless.
    pub async fn run_once(&self, now: OffsetDateTime, deadline: Option<Duration>) -> RunSummary {
        let started = tokio::time::Instant::now();
        tracing::info!(
            systems = self.registry.len(),
            max_concurrency = self.shared.settings.max_concurrency,
            "run started"
        );

        let results: Arc<Mutex<BTreeMap<String, SystemRun>>> = Arc::new(Mutex::new(BTreeMap::new()));
        let permits = Arc::new(Semaphore::new(self.shared.settings.max_concurrency));
        let mut tasks = JoinSet::new();

        for system in self.registry.iter() {
            let shared = Arc::clone(&self.shared);
            let results = Arc::clone(&results);
            let permits = Arc::clone(&permits);
            let system = system.clone();
            tasks.spawn(async move {
                let run = match permits.acquire_owned().await {
                    Ok(_permit) => process_system(&shared, &system, now).await,
                    Err(_) => SystemRun::skipped(
                        &system.code,
                        SystemState::Failed,
                        AppError::new(codes::TASK_FAILED, "Concurrency limiter closed"),
                    ),
                };
                record(&results, run);
            });
        }

        let join_all = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "system task aborted");
                }
            }
        };
        let timed_out = match deadline {
            Some(limit) => tokio::time::timeout_at(started + limit, join_all).await.is_err(),
            None => {
                join_all.await;
                false
            }
        };
        if timed_out {
            tracing::warn!("run deadline expired; skipping pending systems");
            tasks.abort_all();
        }

        let mut finished = results
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default();

        let systems: Vec<SystemRun> = self
            .registry
            .iter()
            .map(|system| match finished.remove(&system.code) {
                Some(run) => run,
                None if timed_out => SystemRun::skipped(
                    &system.code,
                    SystemState::TimeoutSkipped,
                    AppError::timeout("Run deadline expired before the system finished"),
                ),
                None => SystemRun::skipped(
                    &system.code,
                    SystemState::Failed,
                    AppError::new(codes::TASK_FAILED, "System task ended without a result"),
                ),
            })
            .collect();

        let (executive_delivered, executive_error) =
            match self.deliver_executive(&systems, now).await {
                Ok(delivered) => (delivered, None),
                Err(e) => {
                    tracing::error!(error = %e, "executive summary delivery failed");
                    (false, Some(e))
                }
            };

        let summary = RunSummary {
            started_at: now,
            snapshots_read: systems.iter().map(|s| s.snapshots_read).sum(),
            systems,
            executive_delivered,
            executive_error,
        };
        tracing::info!(
            done = summary.count(SystemState::Done),
            failed = summary.count(SystemState::Failed),
            timeout_skipped = summary.count(SystemState::TimeoutSkipped),
            snapshots_read = summary.snapshots_read,
            executive_delivered = summary.executive_delivered,
            "run finished"
        );
        summary
    }

    async fn deliver_executive(
        &self,
        systems: &[SystemRun],
        now: OffsetDateTime,
    ) -> Result<bool, AppError> {
        let settings = &self.shared.settings;
        let entries: Vec<ExecutiveEntry> = systems
            .iter()
            .zip(self.registry.iter())
            .map(|(run, descriptor)| ExecutiveEntry {
                code: run.code.clone(),
                display: descriptor.display.clone(),
                state: run.state,
                stats: run.stats.clone(),
                error: run.error.as_ref().map(|e| e.to_string()),
            })
            .collect();

        if settings.summary_recipients.is_empty() {
            tracing::info!("no summary recipients configured; executive summary not sent");
            return Ok(false);
        }

        let ctx = RenderContext::new(now, settings.local_offset);
        let message = Message::new(
            settings.from_address.clone(),
            settings.summary_recipients.clone(),
            executive_subject(&entries, &ctx.report_date()),
            render_executive_report(&entries, &ctx),
        );
        deliver(self.shared.sink.as_ref(), &message, settings.send_timeout).await?;
        tracing::info!(subject = %message.subject, "executive summary delivered");
        Ok(true)
    }
}

fn record(results: &Mutex<BTreeMap<String, SystemRun>>, run: SystemRun) {
    match results.lock() {
        Ok(mut guard) => {
            if guard.contains_key(&run.code) {
                tracing::warn!(system = %run.code, "duplicate system result ignored");
            } else {
                guard.insert(run.code.clone(), run);
            }
        }
        Err(_) => tracing::error!(system = %run.code, "result map poisoned"),
    }
}

/// Send under `limit`. An expired limit is `TIMEOUT`.
pub async fn deliver(
    sink: &dyn EmailSink,
    message: &Message,
    limit: Duration,
) -> Result<(), AppError> {
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout("Message delivery timed out").with_details(format!(
            "sink={} limit_ms={}",
            sink.name(),
            limit.as_millis()
        ))),
    }
}

/// Current snapshot and the window it belongs to.
struct Inputs {
    current: Option<Snapshot>,
    trend: Option<TrendResult>,
    snapshots_read: usize,
}

async fn gather_inputs(
    shared: &Shared,
    system: &SystemDescriptor,
    now: OffsetDateTime,
) -> Result<Inputs, AppError> {
    let settings = &shared.settings;
    let window = match shared
        .windower
        .window(system, settings.history_days, now)
        .await
    {
        Ok(w) => w,
        Err(e) if e.kind() == ErrorKind::Timeout => return Err(e),
        Err(e) => {
            tracing::warn!(system = %system.code, error = %e, "history unavailable; reporting without it");
            crate::domain::HistoryWindow::empty(&system.code, settings.history_days)
        }
    };

    if let Some(latest) = window.latest() {
        return Ok(Inputs {
            current: Some(latest.clone()),
            trend: analyze(&window, settings.local_offset),
            snapshots_read: window.len(),
        });
    }

    // Nothing recent: fall back to the newest file of any age.
    match shared.windower.latest(system).await {
        Ok(Some(parsed)) => {
            tracing::info!(
                system = %system.code,
                captured_at = %parsed.snapshot.captured_at,
                "no snapshot in history window; using latest available"
            );
            Ok(Inputs {
                current: Some(parsed.snapshot),
                trend: None,
                snapshots_read: 1,
            })
        }
        Ok(None) => Ok(Inputs {
            current: None,
            trend: None,
            snapshots_read: 0,
        }),
        Err(e) if e.kind() == ErrorKind::Timeout => Err(e),
        Err(e) => {
            tracing::warn!(system = %system.code, error = %e, "latest snapshot unreadable");
            Ok(Inputs {
                current: None,
                trend: None,
                snapshots_read: 0,
            })
        }
    }
}

async fn charts_for(
    system: &SystemDescriptor,
    trend: Option<&TrendResult>,
    current: Option<&Snapshot>,
) -> Vec<RenderedChart> {
    if trend.is_none() && current.is_none() {
        return Vec::new();
    }
    let trend = trend.cloned();
    let current = current.cloned();
    match run_blocking(CHART_TIMEOUT, "chart rendering", move || {
        Ok(render_charts(trend.as_ref(), current.as_ref()))
    })
    .await
    {
        Ok(charts) => charts,
        Err(e) => {
            tracing::warn!(system = %system.code, error = %e, "charts skipped");
            Vec::new()
        }
    }
}

async fn attachment_for(
    shared: &Shared,
    system: &SystemDescriptor,
    current: Option<&Snapshot>,
) -> Option<Attachment> {
    let file = match &system.attachment {
        Some(name) => match shared.windower.find_named(system, name).await {
            Ok(Some(file)) => file,
            Ok(None) => {
                tracing::warn!(system = %system.code, attachment = %name, "configured attachment not found");
                return None;
            }
            Err(e) => {
                tracing::warn!(system = %system.code, error = %e, "attachment lookup failed");
                return None;
            }
        },
        None if system.attach_snapshot => {
            let snap = current?;
            SnapshotFile {
                path: snap.source.clone()?,
                created_at: snap.captured_at,
            }
        }
        None => return None,
    };

    match shared.windower.read_bytes(&file).await {
        Ok(bytes) => Some(Attachment {
            filename: file.base_name(),
            mime: MIME_CSV.to_string(),
            bytes,
        }),
        Err(e) => {
            tracing::warn!(system = %system.code, path = %file.path.display(), error = %e, "attachment unreadable");
            None
        }
    }
}

async fn process_system(shared: &Shared, system: &SystemDescriptor, now: OffsetDateTime) -> SystemRun {
    let settings = &shared.settings;
    let inputs = match gather_inputs(shared, system, now).await {
        Ok(inputs) => inputs,
        Err(e) => {
            tracing::warn!(system = %system.code, error = %e, "system skipped");
            return SystemRun::skipped(&system.code, SystemState::TimeoutSkipped, e);
        }
    };

    let report_kind = match (&inputs.current, &inputs.trend) {
        (None, _) => ReportKind::NoData,
        (Some(_), None) => ReportKind::CurrentOnly,
        (Some(_), Some(_)) => ReportKind::Full,
    };
    let stats = aggregate(system, inputs.current.as_ref(), inputs.trend.as_ref());
    tracing::info!(
        system = %system.code,
        report = report_kind.as_str(),
        status = stats.status.as_str(),
        total_errors = stats.total_errors,
        "stats computed"
    );

    let charts = charts_for(system, inputs.trend.as_ref(), inputs.current.as_ref()).await;
    let kinds: Vec<_> = charts.iter().map(|c| c.kind).collect();
    let ctx = RenderContext::new(now, settings.local_offset);
    let html = render_system_report(&stats, &kinds, &ctx);

    let mut run = SystemRun {
        code: system.code.clone(),
        state: SystemState::Done,
        report_kind: Some(report_kind),
        stats: None,
        error: None,
        fingerprint: inputs
            .current
            .as_ref()
            .map(|s| s.fingerprint.clone())
            .filter(|f| !f.is_empty()),
        snapshots_read: inputs.snapshots_read,
    };

    if system.recipients.is_empty() {
        tracing::info!(system = %system.code, "no recipients configured; report not sent");
        run.stats = Some(stats);
        return run;
    }

    let mut message = Message::new(
        settings.from_address.clone(),
        system.recipients.clone(),
        system_subject(&stats, &ctx.report_date()),
        html,
    );
    for (i, chart) in charts.into_iter().enumerate() {
        message = message.with_inline_image(InlineImage {
            content_id: chart_content_id(i),
            mime: MIME_PNG.to_string(),
            bytes: chart.png,
        });
    }
    if let Some(attachment) = attachment_for(shared, system, inputs.current.as_ref()).await {
        message = message.with_attachment(attachment);
    }

    match deliver(shared.sink.as_ref(), &message, settings.send_timeout).await {
        Ok(()) => {
            tracing::info!(system = %system.code, subject = %message.subject, "report delivered");
        }
        Err(e) => {
            tracing::error!(system = %system.code, error = %e, "report delivery failed");
            run.state = if e.kind() == ErrorKind::Timeout {
                SystemState::TimeoutSkipped
            } else {
                SystemState::Failed
            };
            run.error = Some(e);
        }
    }
    run.stats = Some(stats);
    run
}
