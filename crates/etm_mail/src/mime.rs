use etm_core::error::{codes, AppError};
use etm_core::mail::Message;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};

fn invalid(what: &str, e: impl std::fmt::Display) -> AppError {
    AppError::new(codes::MESSAGE_INVALID, format!("Invalid {what}")).with_details(e.to_string())
}

fn content_type(mime: &str) -> Result<ContentType, AppError> {
    ContentType::parse(mime).map_err(|e| invalid("content type", format!("{mime}: {e}")))
}

/// Build the MIME tree: `related(html, inline images...)`, wrapped in `mixed` when there
/// are attachments.
pub fn to_lettre(message: &Message) -> Result<lettre::Message, AppError> {
    message.validate()?;

    let from: Mailbox = message
        .from
        .parse()
        .map_err(|e| invalid("sender address", format!("{}: {e}", message.from)))?;
    let mut builder = lettre::Message::builder()
        .from(from)
        .subject(message.subject.clone());
    for to in message.to.iter().filter(|t| !t.trim().is_empty()) {
        let mailbox: Mailbox = to
            .parse()
            .map_err(|e| invalid("recipient address", format!("{to}: {e}")))?;
        builder = builder.to(mailbox);
    }

    let mut related = MultiPart::related().singlepart(SinglePart::html(message.html_body.clone()));
    for image in &message.inline_images {
        related = related.singlepart(
            Attachment::new_inline(image.content_id.clone())
                .body(image.bytes.clone(), content_type(&image.mime)?),
        );
    }

    let body = if message.attachments.is_empty() {
        related
    } else {
        let mut mixed = MultiPart::mixed().multipart(related);
        for attachment in &message.attachments {
            mixed = mixed.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(attachment.bytes.clone(), content_type(&attachment.mime)?),
            );
        }
        mixed
    };

    builder.multipart(body).map_err(|e| invalid("message", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etm_core::mail::{Attachment as CsvAttachment, InlineImage, MIME_CSV, MIME_PNG};

    fn message() -> Message {
        Message::new(
            "etm@example.com",
            vec!["ops@example.com".to_string(), "lead@example.com".to_string()],
            "📊 CIS SYSTEM REPORT ➡️ STABLE - 2025-03-02",
            r#"<p>report</p><img src="cid:chart1">"#,
        )
    }

    #[test]
    fn builds_related_body_with_inline_images() {
        let m = message().with_inline_image(InlineImage {
            content_id: "chart1".to_string(),
            mime: MIME_PNG.to_string(),
            bytes: vec![0x89, b'P', b'N', b'G'],
        });
        let raw = String::from_utf8_lossy(&to_lettre(&m).expect("build").formatted()).to_string();
        assert!(raw.contains("multipart/related"));
        assert!(raw.contains("Content-ID: <chart1>"));
        assert!(raw.contains("To: ops@example.com, lead@example.com"));
        assert!(!raw.contains("multipart/mixed"));
    }

    #[test]
    fn attachments_wrap_in_mixed() {
        let m = message().with_attachment(CsvAttachment {
            filename: "CIS_errors.csv".to_string(),
            mime: MIME_CSV.to_string(),
            bytes: b"D1,T1,svc-a,0,ok\n".to_vec(),
        });
        let raw = String::from_utf8_lossy(&to_lettre(&m).expect("build").formatted()).to_string();
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("CIS_errors.csv"));
    }

    #[test]
    fn rejects_bad_addresses() {
        let mut m = message();
        m.to = vec!["not an address".to_string()];
        assert_eq!(to_lettre(&m).unwrap_err().code, codes::MESSAGE_INVALID);
        m.to.clear();
        assert_eq!(to_lettre(&m).unwrap_err().code, codes::MESSAGE_INVALID);
    }
}
