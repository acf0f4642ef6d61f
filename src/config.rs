use crate::types::Config;
use anyhow::{bail, Context, Result};
use std::fs;

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path))?;
        let config: Config =
            serde_yaml::from_str(&contents).with_context(|| format!("Invalid config {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would misbehave silently at runtime.
    /// Credential presence is checked by the provider itself, after the
    /// environment override has been applied.
    pub fn validate(&self) -> Result<()> {
        if self.detection.labels.is_empty() {
            bail!("detection.labels must name at least one object class");
        }
        for label in &self.detection.labels {
            if label.trim().is_empty() || label.contains(',') {
                bail!("detection.labels entries must be plain words, got '{}'", label);
            }
        }
        if self.detection.frame_stride == 0 {
            bail!("detection.frame_stride must be at least 1");
        }
        if !(0.0..1.0).contains(&self.tracking.iou_threshold) {
            bail!(
                "tracking.iou_threshold must be in [0,1), got {}",
                self.tracking.iou_threshold
            );
        }
        if self.tracking.linger_threshold == 0 {
            bail!("tracking.linger_threshold must be at least 1");
        }
        if self.tracking.presence_min == 0 {
            bail!("tracking.presence_min must be at least 1");
        }
        if self.provider.timeout_secs == 0 {
            bail!("provider.timeout_secs must be at least 1");
        }
        Ok(())
    }
}
