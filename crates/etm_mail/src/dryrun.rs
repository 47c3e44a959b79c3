use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use etm_core::error::{codes, AppError};
use etm_core::mail::{EmailSink, Message};

use crate::mime::to_lettre;

/// Writes each message as an RFC 5322 `.eml` file instead of sending it.
pub struct DryRunSink {
    dir: PathBuf,
    sequence: AtomicUsize,
}

impl DryRunSink {
    /// Create the output directory if needed.
    pub fn create(dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(dir).map_err(|e| {
            AppError::new(codes::SINK_INIT_FAILED, "Failed to create dry-run directory")
                .with_details(format!("path={} err={e}", dir.display()))
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
            sequence: AtomicUsize::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Lower-case ASCII words of the subject joined by `_`.
pub fn subject_slug(subject: &str) -> String {
    let words: Vec<String> = subject
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_lowercase())
        .collect();
    if words.is_empty() {
        "message".to_string()
    } else {
        words.join("_")
    }
}

#[async_trait]
impl EmailSink for DryRunSink {
    async fn send(&self, message: &Message) -> Result<(), AppError> {
        let raw = to_lettre(message)?.formatted();
        let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let path = self
            .dir
            .join(format!("{n:03}_{}.eml", subject_slug(&message.subject)));
        tokio::fs::write(&path, raw).await.map_err(|e| {
            AppError::sink_transient("Failed to write dry-run message")
                .with_details(format!("path={} err={e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "dry-run message written");
        Ok(())
    }

    fn name(&self) -> &str {
        "dry-run"
    }
}
