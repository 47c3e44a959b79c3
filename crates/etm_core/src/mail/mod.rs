//! Outbound message envelope and the sink abstraction that delivers it.
//!
//! Transport adapters (SMTP, dry-run files) live in the `etm_mail` crate; this module only
//! defines the contract and an in-memory sink for tests.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{codes, AppError};

pub const MIME_PNG: &str = "image/png";
pub const MIME_CSV: &str = "text/csv";

/// Image referenced from the HTML body as `cid:<content_id>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineImage {
    pub content_id: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// A fully composed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub inline_images: Vec<InlineImage>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn new(
        from: impl Into<String>,
        to: Vec<String>,
        subject: impl Into<String>,
        html_body: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to,
            subject: subject.into(),
            html_body: html_body.into(),
            inline_images: Vec::new(),
            attachments: Vec::new(),
        }
    }

    pub fn with_inline_image(mut self, image: InlineImage) -> Self {
        self.inline_images.push(image);
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Every message needs a sender and at least one recipient.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.from.trim().is_empty() {
            return Err(AppError::new(codes::MESSAGE_INVALID, "Message has no sender"));
        }
        if self.to.iter().all(|r| r.trim().is_empty()) {
            return Err(
                AppError::new(codes::MESSAGE_INVALID, "Message has no recipients")
                    .with_details(self.subject.clone()),
            );
        }
        Ok(())
    }
}

#[async_trait]
pub trait EmailSink: Send + Sync {
    /// Deliver one message. Transport failures are `SINK_TRANSIENT`.
    async fn send(&self, message: &Message) -> Result<(), AppError>;

    fn name(&self) -> &str;
}

/// Records messages in memory. Sends whose subject contains one of the configured failure
/// markers are rejected with `SINK_TRANSIENT`.
#[derive(Debug, Default)]
pub struct MemorySink {
    sent: Mutex<Vec<Message>>,
    fail_markers: BTreeSet<String>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every message whose subject mentions `marker` (typically a system code).
    pub fn failing_on(mut self, marker: impl Into<String>) -> Self {
        self.fail_markers.insert(marker.into());
        self
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn sent_subjects(&self) -> Vec<String> {
        self.sent().into_iter().map(|m| m.subject).collect()
    }

    fn should_fail(&self, subject: &str) -> Option<&str> {
        self.fail_markers
            .iter()
            .find(|m| subject.split_whitespace().any(|word| word == m.as_str()))
            .map(|m| m.as_str())
    }
}

#[async_trait]
impl EmailSink for MemorySink {
    async fn send(&self, message: &Message) -> Result<(), AppError> {
        message.validate()?;
        if let Some(marker) = self.should_fail(&message.subject) {
            return Err(AppError::sink_transient("Injected delivery failure")
                .with_details(format!("marker={marker}")));
        }
        let mut guard = self
            .sent
            .lock()
            .map_err(|_| AppError::new(codes::TASK_FAILED, "Memory sink lock poisoned"))?;
        guard.push(message.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(subject: &str) -> Message {
        Message::new(
            "etm@example.com",
            vec!["ops@example.com".to_string()],
            subject,
            "<p>hi</p>",
        )
    }

    #[tokio::test]
    async fn memory_sink_records_messages() {
        let sink = MemorySink::new();
        sink.send(&message("📊 ECW SYSTEM REPORT")).await.expect("send");
        assert_eq!(sink.sent_subjects(), vec!["📊 ECW SYSTEM REPORT"]);
    }

    #[tokio::test]
    async fn memory_sink_injects_failures_by_word() {
        let sink = MemorySink::new().failing_on("CIS");
        let err = sink
            .send(&message("🏦 CIS SYSTEM REPORT"))
            .await
            .expect_err("must fail");
        assert_eq!(err.code, codes::SINK_TRANSIENT);
        assert!(err.retryable);
        // Only whole words match.
        sink.send(&message("🏦 CISX SYSTEM REPORT")).await.expect("send");
        assert_eq!(sink.sent().len(), 1);
    }

    #[test]
    fn messages_need_recipients() {
        let mut m = message("x");
        m.to.clear();
        assert_eq!(m.validate().unwrap_err().code, codes::MESSAGE_INVALID);
        m.to.push("a@b.c".to_string());
        m.from = " ".to_string();
        assert!(m.validate().is_err());
    }
}
