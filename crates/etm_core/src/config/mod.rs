use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::UtcOffset;

use crate::domain::columns;
use crate::error::{codes, AppError};
use crate::normalize::timestamps::parse_utc_offset;
use crate::store::CaptureTimeSource;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_history_days")]
    pub history_days: u32,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Whole-run deadline; 0 disables it.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    /// Offset defining the local calendar date and hour of day (`+HH:MM`).
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    #[serde(default)]
    pub capture_time: CaptureTimeSource,
    #[serde(default)]
    pub audit_db: Option<PathBuf>,
    pub email: EmailConfig,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailConfig {
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_username: Option<String>,
    #[serde(default)]
    pub smtp_password: Option<String>,
    pub from_address: String,
    #[serde(default)]
    pub summary_recipients: Vec<String>,
    /// When set, messages are written as `.eml` files here instead of being sent.
    #[serde(default)]
    pub dry_run_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SystemConfig {
    pub code: String,
    pub directory: PathBuf,
    #[serde(default = "default_schema")]
    pub schema: Vec<String>,
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default)]
    pub recipients: Vec<String>,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default = "default_icon")]
    pub icon: String,
    #[serde(default)]
    pub attachment: Option<String>,
    #[serde(default = "default_attach_snapshot")]
    pub attach_snapshot: bool,
}

fn default_history_days() -> u32 {
    7
}

fn default_max_concurrency() -> usize {
    4
}

fn default_run_deadline_secs() -> u64 {
    300
}

fn default_read_timeout_secs() -> u64 {
    10
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

fn default_smtp_host() -> String {
    "localhost".to_string()
}

fn default_smtp_port() -> u16 {
    25
}

fn default_schema() -> Vec<String> {
    [
        columns::DOMAIN,
        columns::SERVICE_TYPE,
        columns::SERVICE_NAME,
        columns::ERROR_COUNT,
        columns::ERROR_REASON,
    ]
    .iter()
    .map(|c| c.to_string())
    .collect()
}

fn default_color() -> String {
    "#1f4e79".to_string()
}

fn default_icon() -> String {
    "📊".to_string()
}

fn default_attach_snapshot() -> bool {
    true
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::new(codes::CONFIG_READ_FAILED, "Failed to read configuration file")
                .with_details(format!("path={}; err={e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, AppError> {
        let config: Self = toml::from_str(content).map_err(|e| {
            AppError::config("Failed to parse configuration").with_details(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.history_days == 0 {
            return Err(AppError::config("history_days must be at least 1"));
        }
        if self.max_concurrency == 0 {
            return Err(AppError::config("max_concurrency must be at least 1"));
        }
        if self.read_timeout_secs == 0 || self.send_timeout_secs == 0 {
            return Err(AppError::config("per-operation timeouts must be positive"));
        }
        self.local_offset()?;
        if self.email.from_address.trim().is_empty() {
            return Err(AppError::config("email.from_address is required"));
        }
        check_recipients("email.summary_recipients", &self.email.summary_recipients)?;

        let mut seen = HashSet::new();
        for system in &self.systems {
            let code = system.code.trim();
            if code.is_empty() {
                return Err(AppError::config("system code must not be empty"));
            }
            if code != code.to_uppercase() {
                return Err(AppError::config("system code must be upper-case")
                    .with_details(format!("code={code}")));
            }
            if !seen.insert(code.to_string()) {
                return Err(AppError::config("duplicate system code")
                    .with_details(format!("code={code}")));
            }
            for required in [columns::ERROR_COUNT, columns::SERVICE_NAME] {
                if !system.schema.iter().any(|c| c == required) {
                    return Err(AppError::config(format!(
                        "schema for {code} is missing required column {required}"
                    )));
                }
            }
            check_recipients(&format!("systems.{code}.recipients"), &system.recipients)?;
        }
        Ok(())
    }

    pub fn local_offset(&self) -> Result<UtcOffset, AppError> {
        parse_utc_offset(&self.utc_offset).ok_or_else(|| {
            AppError::config("utc_offset must look like +HH:MM")
                .with_details(format!("value={}", self.utc_offset))
        })
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        (self.run_deadline_secs > 0).then(|| Duration::from_secs(self.run_deadline_secs))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

fn check_recipients(field: &str, recipients: &[String]) -> Result<(), AppError> {
    for r in recipients {
        if r.trim().is_empty() || !r.contains('@') {
            return Err(AppError::config(format!("{field} contains an invalid address"))
                .with_details(format!("value={r}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
[email]
from_address = "monitor@example.com"
summary_recipients = ["ops@example.com"]

[[systems]]
code = "CIS"
directory = "/data/cis"
skip_rows = 1
recipients = ["cis-team@example.com"]
icon = "🏦"
"#;

    #[test]
    fn defaults_fill_optional_fields() {
        let cfg = EngineConfig::from_toml_str(MINIMAL).expect("config");
        assert_eq!(cfg.history_days, 7);
        assert_eq!(cfg.max_concurrency, 4);
        assert_eq!(cfg.read_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.send_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.run_deadline(), Some(Duration::from_secs(300)));
        assert_eq!(cfg.capture_time, CaptureTimeSource::Created);
        assert_eq!(cfg.email.smtp_port, 25);
        assert_eq!(cfg.systems.len(), 1);
        assert_eq!(
            cfg.systems[0].schema,
            vec!["Domain", "ServiceType", "ServiceName", "ErrorCount", "ErrorReason"]
        );
        assert!(cfg.systems[0].attach_snapshot);
        assert_eq!(cfg.local_offset().unwrap(), UtcOffset::UTC);
    }

    #[test]
    fn missing_required_column_is_config_error() {
        let text = MINIMAL.replace(
            "skip_rows = 1",
            "skip_rows = 1\nschema = [\"Domain\", \"ServiceName\"]",
        );
        let err = EngineConfig::from_toml_str(&text).unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
        assert!(err.message.contains("ErrorCount"));
    }

    #[test]
    fn duplicate_codes_are_rejected() {
        let text = format!(
            "{MINIMAL}\n[[systems]]\ncode = \"CIS\"\ndirectory = \"/data/cis2\"\n"
        );
        let err = EngineConfig::from_toml_str(&text).unwrap_err();
        assert_eq!(err.message, "duplicate system code");
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = EngineConfig::from_toml_str("[email\nfrom_address=").unwrap_err();
        assert_eq!(err.code, codes::CONFIG_INVALID);
    }

    #[test]
    fn bad_offset_is_rejected() {
        let text = format!("utc_offset = \"CET\"\n{MINIMAL}");
        let err = EngineConfig::from_toml_str(&text).unwrap_err();
        assert!(err.message.contains("utc_offset"));
    }

    #[test]
    fn zero_deadline_disables_it() {
        let text = format!("run_deadline_secs = 0\n{MINIMAL}");
        let cfg = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(cfg.run_deadline(), None);
    }

    #[test]
    fn example_configuration_is_valid() {
        let text = include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../../config/etm.example.toml"
        ));
        let cfg = EngineConfig::from_toml_str(text).expect("example config");
        assert_eq!(cfg.systems.len(), 3);
        assert_eq!(cfg.systems[1].attachment.as_deref(), Some("ECW_errors.csv"));
        assert!(!cfg.systems[2].attach_snapshot);
        assert_eq!(cfg.local_offset().unwrap().whole_hours(), 2);
    }
}
