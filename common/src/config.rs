// Configuration management with layered configuration (file, env)

use crate::errors::ConfigurationError;
use crate::models::TriggerDefinition;
use crate::queue::NatsConfig;
use crate::scheduler::SchedulerConfig;
use crate::worker::AckPolicy;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub nats: NatsConfig,
    pub scheduler: SchedulerConfig,
    pub worker: WorkerConfig,
    pub observability: ObservabilityConfig,
    /// Inline trigger definitions, used when no trigger file is configured
    pub triggers: Vec<TriggerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of competing listener loops
    pub listeners: usize,
    pub ack_policy: AckPolicy,
    pub receive_error_backoff_ms: u64,
}

impl WorkerConfig {
    pub fn receive_error_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_error_backoff_ms)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listeners: 4,
            ack_policy: AckPolicy::AfterResolve,
            receive_error_backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub json_logs: bool,
    /// Prometheus exporter port; metrics are disabled when absent
    pub metrics_port: Option<u16>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: true,
            metrics_port: Some(9090),
        }
    }
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigurationError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific directory
    ///
    /// `default.toml` then `local.toml` (both optional), then `APP__`
    /// environment variables, e.g. `APP__NATS__URL`.
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigurationError> {
        let config_dir = config_dir.as_ref();

        let config = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| Err(ConfigurationError::Invalid(reason.to_string()));

        if self.nats.url.trim().is_empty() {
            return invalid("NATS URL cannot be empty");
        }
        if self.nats.stream_name.trim().is_empty() {
            return invalid("NATS stream_name cannot be empty");
        }
        if self.nats.subject.trim().is_empty() {
            return invalid("NATS subject cannot be empty");
        }
        if self.nats.consumer_name.trim().is_empty() {
            return invalid("NATS consumer_name cannot be empty");
        }
        if self.scheduler.tick_interval_ms == 0 {
            return invalid("Scheduler tick_interval_ms must be greater than 0");
        }
        if self.scheduler.max_fires_per_tick == 0 {
            return invalid("Scheduler max_fires_per_tick must be greater than 0");
        }
        if self.worker.listeners == 0 {
            return invalid("Worker listeners must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.worker.ack_policy, AckPolicy::AfterResolve);
        assert!(settings.triggers.is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_listeners() {
        let mut settings = Settings::default();
        settings.worker.listeners = 0;
        assert!(matches!(
            settings.validate(),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_tick() {
        let mut settings = Settings::default();
        settings.scheduler.tick_interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_nats_url() {
        let mut settings = Settings::default();
        settings.nats.url = " ".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_from_path_reads_default_toml() {
        let dir = tempfile::tempdir().unwrap();
        let mut file = std::fs::File::create(dir.path().join("default.toml")).unwrap();
        write!(
            file,
            r#"
[worker]
listeners = 2
ack_policy = "after_completion"

[[triggers]]
id = "nightly-digest"
job_identity = "DigestJob"
kind = "cron"
cron_expression = "0 0 * * *"
"#
        )
        .unwrap();

        let settings = Settings::load_from_path(dir.path()).unwrap();
        assert_eq!(settings.worker.listeners, 2);
        assert_eq!(settings.worker.ack_policy, AckPolicy::AfterCompletion);
        assert_eq!(settings.triggers.len(), 1);
        assert_eq!(settings.triggers[0].job_identity, "DigestJob");
        // Untouched sections keep their defaults
        assert_eq!(settings.nats, NatsConfig::default());
    }

    #[test]
    fn test_load_from_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::load_from_path(dir.path().join("absent")).unwrap();
        assert_eq!(settings.scheduler, SchedulerConfig::default());
    }
}
