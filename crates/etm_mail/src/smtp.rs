use async_trait::async_trait;
use etm_core::config::EmailConfig;
use etm_core::error::{codes, AppError};
use etm_core::mail::{EmailSink, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};

use crate::mime::to_lettre;

/// Port of SMTP submission over implicit TLS.
const SUBMISSIONS_PORT: u16 = 465;

pub struct SmtpSink {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
}

impl SmtpSink {
    /// Implicit TLS on 465, STARTTLS when credentials are configured, plain SMTP otherwise.
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        let host = config.smtp_host.trim();
        if host.is_empty() {
            return Err(AppError::new(codes::SINK_INIT_FAILED, "SMTP host is empty"));
        }
        let init_err = |e: lettre::transport::smtp::Error| {
            AppError::new(codes::SINK_INIT_FAILED, "Failed to configure SMTP transport")
                .with_details(format!("host={host} err={e}"))
        };

        let builder = if config.smtp_port == SUBMISSIONS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(host).map_err(init_err)?
        } else if config.smtp_username.is_some() {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(init_err)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
        };
        let mut builder = builder.port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        tracing::debug!(host, port = config.smtp_port, "smtp transport configured");
        Ok(Self {
            transport: builder.build(),
            host: host.to_string(),
        })
    }
}

#[async_trait]
impl EmailSink for SmtpSink {
    async fn send(&self, message: &Message) -> Result<(), AppError> {
        let email = to_lettre(message)?;
        self.transport.send(email).await.map_err(|e| {
            AppError::sink_transient("SMTP delivery failed")
                .with_details(format!("host={} err={e}", self.host))
        })?;
        tracing::debug!(subject = %message.subject, recipients = message.to.len(), "smtp message sent");
        Ok(())
    }

    fn name(&self) -> &str {
        "smtp"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: u16) -> EmailConfig {
        EmailConfig {
            smtp_host: host.to_string(),
            smtp_port: port,
            smtp_username: None,
            smtp_password: None,
            from_address: "etm@example.com".to_string(),
            summary_recipients: Vec::new(),
            dry_run_dir: None,
        }
    }

    #[tokio::test]
    async fn empty_host_fails_init() {
        let err = SmtpSink::new(&config("  ", 25)).err().expect("init must fail");
        assert_eq!(err.code, codes::SINK_INIT_FAILED);
    }

    #[tokio::test]
    async fn plain_transport_builds_without_connecting() {
        let sink = SmtpSink::new(&config("localhost", 2525)).expect("init");
        assert_eq!(sink.name(), "smtp");
    }
}
