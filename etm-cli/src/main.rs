use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use etm_core::audit;
use etm_core::clock::{Clock, FixedClock, SystemClock};
use etm_core::config::EngineConfig;
use etm_core::db;
use etm_core::engine::{EngineSettings, MonitoringEngine, RunSummary};
use etm_core::error::AppError;
use etm_core::registry::SystemRegistry;
use etm_core::store::FsSnapshotStore;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

const EXIT_CONFIG: u8 = 2;
const EXIT_NO_SNAPSHOTS: u8 = 3;
const EXIT_SINK_INIT: u8 = 4;

#[derive(Parser)]
#[command(name = "etm")]
#[command(about = "Error trend monitor: snapshot trends and emailed reports", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process every configured system once and send the reports
    Run {
        #[arg(long, default_value = "etm.toml")]
        config: PathBuf,
        /// Write .eml files into this directory instead of sending over SMTP
        #[arg(long)]
        dry_run: Option<PathBuf>,
        /// Overall run deadline; 0 disables it
        #[arg(long)]
        deadline_secs: Option<u64>,
        /// Freeze the clock at this RFC 3339 instant
        #[arg(long)]
        now: Option<String>,
        /// Restrict the run to one system code
        #[arg(long)]
        only: Option<String>,
    },
    /// Load and validate the configuration, then list the systems
    CheckConfig {
        #[arg(long, default_value = "etm.toml")]
        config: PathBuf,
    },
    /// Show the most recent runs from the audit database
    History {
        #[arg(long, default_value = "etm.toml")]
        config: PathBuf,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "etm=debug,etm_core=debug,etm_mail=debug"
    } else {
        "etm=info,etm_core=info,etm_mail=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let outcome = match cli.command {
        Commands::Run {
            config,
            dry_run,
            deadline_secs,
            now,
            only,
        } => {
            run(RunArgs {
                config,
                dry_run,
                deadline_secs,
                now,
                only,
            })
            .await
        }
        Commands::CheckConfig { config } => check_config(&config),
        Commands::History { config, limit } => history(&config, limit),
    };

    match outcome {
        Ok(code) => code,
        Err(failure) => {
            eprintln!("etm: {:#}", failure.error);
            ExitCode::from(failure.exit_code)
        }
    }
}

/// A fatal startup problem and the exit code it maps to.
struct Failure {
    exit_code: u8,
    error: anyhow::Error,
}

impl Failure {
    fn config(error: impl Into<anyhow::Error>) -> Self {
        Self {
            exit_code: EXIT_CONFIG,
            error: error.into(),
        }
    }
}

struct RunArgs {
    config: PathBuf,
    dry_run: Option<PathBuf>,
    deadline_secs: Option<u64>,
    now: Option<String>,
    only: Option<String>,
}

fn load_config(path: &Path) -> Result<EngineConfig, Failure> {
    EngineConfig::load(path)
        .map_err(anyhow::Error::new)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
        .map_err(Failure::config)
}

fn clock_from(now: Option<&str>) -> Result<Box<dyn Clock>, Failure> {
    match now {
        None => Ok(Box::new(SystemClock)),
        Some(raw) => {
            let at = OffsetDateTime::parse(raw, &Rfc3339)
                .with_context(|| format!("--now must be an RFC 3339 timestamp, got {raw}"))
                .map_err(Failure::config)?;
            Ok(Box::new(FixedClock(at)))
        }
    }
}

async fn run(args: RunArgs) -> Result<ExitCode, Failure> {
    let config = load_config(&args.config)?;
    let clock = clock_from(args.now.as_deref())?;

    let mut registry = SystemRegistry::from_config(&config);
    if let Some(code) = args.only.as_deref() {
        registry = registry
            .only(code.trim())
            .map_err(anyhow::Error::new)
            .context("--only names a system that is not configured")
            .map_err(Failure::config)?;
    }
    let settings = EngineSettings::from_config(&config)
        .map_err(anyhow::Error::new)
        .map_err(Failure::config)?;
    let deadline = match args.deadline_secs {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => config.run_deadline(),
    };

    let sink = etm_mail::build_sink(&config.email, args.dry_run.as_deref()).map_err(|e| Failure {
        exit_code: EXIT_SINK_INIT,
        error: anyhow::Error::new(e).context("failed to initialize the email sink"),
    })?;
    tracing::info!(sink = sink.name(), systems = registry.len(), "sink ready");

    let store = Arc::new(FsSnapshotStore::new(config.capture_time));
    let engine = MonitoringEngine::new(registry, store, sink, settings);
    let summary = engine.run_with_clock(clock.as_ref(), deadline).await;

    let exit_code = if summary.snapshots_read == 0 {
        tracing::error!("no snapshot could be read for any system");
        EXIT_NO_SNAPSHOTS
    } else {
        0
    };

    if let Some(path) = config.audit_db.as_deref() {
        match write_audit(path, &summary, exit_code, clock.now()) {
            Ok(run_id) => tracing::info!(run_id, path = %path.display(), "audit trail recorded"),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "audit trail not recorded"),
        }
    }

    print_summary(&summary);
    Ok(ExitCode::from(exit_code))
}

fn write_audit(
    path: &Path,
    summary: &RunSummary,
    exit_code: u8,
    recorded_at: OffsetDateTime,
) -> Result<i64, AppError> {
    let mut conn = db::open(path)?;
    db::migrate(&mut conn)?;
    audit::record_run(&mut conn, summary, i32::from(exit_code), recorded_at)
}

fn print_summary(summary: &RunSummary) {
    for system in &summary.systems {
        let kind = system.report_kind.map(|k| k.as_str()).unwrap_or("-");
        let status = system
            .stats
            .as_ref()
            .map(|s| s.status.as_str())
            .unwrap_or("-");
        match &system.error {
            Some(e) => println!(
                "{:<8} {:<16} {:<13} {:<9} {e}",
                system.code,
                system.state.as_str(),
                kind,
                status
            ),
            None => println!(
                "{:<8} {:<16} {:<13} {}",
                system.code,
                system.state.as_str(),
                kind,
                status
            ),
        }
    }
    match &summary.executive_error {
        Some(e) => println!("executive summary not delivered: {e}"),
        None if summary.executive_delivered => println!("executive summary delivered"),
        None => println!("executive summary not delivered"),
    }
}

fn check_config(path: &Path) -> Result<ExitCode, Failure> {
    let config = load_config(path)?;
    let registry = SystemRegistry::from_config(&config);
    for system in registry.iter() {
        println!(
            "{:<8} {} ({} recipient(s))",
            system.code,
            system.directory.display(),
            system.recipients.len()
        );
    }
    println!("configuration OK: {} system(s)", registry.len());
    Ok(ExitCode::SUCCESS)
}

fn history(path: &Path, limit: usize) -> Result<ExitCode, Failure> {
    let config = load_config(path)?;
    let Some(db_path) = config.audit_db.as_deref() else {
        return Err(Failure::config(anyhow::anyhow!(
            "audit_db is not set in {}",
            path.display()
        )));
    };
    let runs = db::open(db_path)
        .and_then(|mut conn| {
            db::migrate(&mut conn)?;
            audit::recent_runs(&conn, limit)
        })
        .map_err(anyhow::Error::new)
        .context("failed to read the audit trail")
        .map_err(|error| Failure { exit_code: 1, error })?;

    for run in runs {
        println!(
            "#{} {} done={} failed={} skipped={} snapshots={} executive={} exit={}",
            run.id,
            run.started_at,
            run.systems_done,
            run.systems_failed,
            run.systems_timeout_skipped,
            run.snapshots_read,
            run.executive_delivered,
            run.exit_code
        );
        for system in run.systems {
            println!(
                "    {:<8} {:<16} {}",
                system.code,
                system.state,
                system.status.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_flags_parse() {
        let cli = Cli::try_parse_from([
            "etm",
            "run",
            "--config",
            "ops.toml",
            "--dry-run",
            "out",
            "--deadline-secs",
            "0",
            "--now",
            "2025-03-02T14:00:00Z",
            "--only",
            "CIS",
        ])
        .expect("parse");
        match cli.command {
            Commands::Run {
                config,
                dry_run,
                deadline_secs,
                now,
                only,
            } => {
                assert_eq!(config, PathBuf::from("ops.toml"));
                assert_eq!(dry_run, Some(PathBuf::from("out")));
                assert_eq!(deadline_secs, Some(0));
                assert_eq!(now.as_deref(), Some("2025-03-02T14:00:00Z"));
                assert_eq!(only.as_deref(), Some("CIS"));
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn frozen_clock_comes_from_now_flag() {
        let clock = clock_from(Some("2025-03-02T14:00:00+02:00")).ok().expect("clock");
        assert_eq!(clock.now().unix_timestamp(), 1_740_916_800);
        let failure = clock_from(Some("yesterday")).err().expect("bad timestamp");
        assert_eq!(failure.exit_code, EXIT_CONFIG);
    }

    #[test]
    fn missing_config_maps_to_exit_code_two() {
        let dir = tempfile::tempdir().expect("tempdir");
        let failure = load_config(&dir.path().join("absent.toml"))
            .err()
            .expect("missing file");
        assert_eq!(failure.exit_code, EXIT_CONFIG);
    }
}
