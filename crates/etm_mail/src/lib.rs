//! `EmailSink` adapters: SMTP delivery and `.eml` files for dry runs.

pub mod dryrun;
pub mod mime;
pub mod smtp;

use std::path::Path;
use std::sync::Arc;

use etm_core::config::EmailConfig;
use etm_core::error::AppError;
use etm_core::mail::EmailSink;

pub use dryrun::DryRunSink;
pub use mime::to_lettre;
pub use smtp::SmtpSink;

/// Pick the sink for a run: a dry-run directory (flag first, then config) wins over SMTP.
pub fn build_sink(
    config: &EmailConfig,
    dry_run_dir: Option<&Path>,
) -> Result<Arc<dyn EmailSink>, AppError> {
    match dry_run_dir.or(config.dry_run_dir.as_deref()) {
        Some(dir) => Ok(Arc::new(DryRunSink::create(dir)?)),
        None => Ok(Arc::new(SmtpSink::new(config)?)),
    }
}
