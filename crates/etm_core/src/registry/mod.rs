use crate::config::{EngineConfig, SystemConfig};
use crate::domain::{DisplayHints, SystemDescriptor};
use crate::error::{codes, AppError};

/// Read-only catalog of monitored systems, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SystemRegistry {
    systems: Vec<SystemDescriptor>,
}

impl SystemRegistry {
    pub fn new(systems: Vec<SystemDescriptor>) -> Self {
        Self { systems }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.systems.iter().map(descriptor_from_config).collect())
    }

    pub fn get(&self, code: &str) -> Result<&SystemDescriptor, AppError> {
        self.systems
            .iter()
            .find(|s| s.code == code)
            .ok_or_else(|| {
                AppError::new(codes::UNKNOWN_SYSTEM, "Unknown system code")
                    .with_details(format!("code={code}"))
            })
    }

    /// A registry holding only `code`, for single-system runs.
    pub fn only(&self, code: &str) -> Result<Self, AppError> {
        let descriptor = self.get(code)?.clone();
        Ok(Self::new(vec![descriptor]))
    }

    pub fn iter(&self) -> impl Iterator<Item = &SystemDescriptor> {
        self.systems.iter()
    }

    pub fn codes(&self) -> Vec<&str> {
        self.systems.iter().map(|s| s.code.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }
}

fn descriptor_from_config(cfg: &SystemConfig) -> SystemDescriptor {
    SystemDescriptor {
        code: cfg.code.trim().to_string(),
        directory: cfg.directory.clone(),
        schema: cfg.schema.iter().map(|c| c.trim().to_string()).collect(),
        skip_rows: cfg.skip_rows,
        recipients: cfg.recipients.clone(),
        display: DisplayHints {
            color: cfg.color.clone(),
            icon: cfg.icon.clone(),
        },
        attachment: cfg.attachment.clone().filter(|a| !a.trim().is_empty()),
        attach_snapshot: cfg.attach_snapshot,
    }
}
