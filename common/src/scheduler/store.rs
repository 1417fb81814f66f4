// Trigger stores: where the scheduler loads trigger definitions from

use crate::errors::StorageError;
use crate::models::TriggerDefinition;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{info, instrument};

/// Read-only source of trigger definitions, read once at startup
#[async_trait]
pub trait TriggerStore: Send + Sync {
    async fn load_all(&self) -> Result<Vec<TriggerDefinition>, StorageError>;
}

/// Definitions held in memory, typically from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticTriggerStore {
    triggers: Vec<TriggerDefinition>,
}

impl StaticTriggerStore {
    pub fn new(triggers: Vec<TriggerDefinition>) -> Self {
        Self { triggers }
    }
}

#[async_trait]
impl TriggerStore for StaticTriggerStore {
    async fn load_all(&self) -> Result<Vec<TriggerDefinition>, StorageError> {
        Ok(self.triggers.clone())
    }
}

/// JSON array of definitions in a file
#[derive(Debug, Clone)]
pub struct JsonFileTriggerStore {
    path: PathBuf,
}

impl JsonFileTriggerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TriggerStore for JsonFileTriggerStore {
    #[instrument(skip(self), fields(path = %self.path.display()))]
    async fn load_all(&self) -> Result<Vec<TriggerDefinition>, StorageError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            StorageError::FileSystemError(format!("{}: {}", self.path.display(), e))
        })?;
        let triggers: Vec<TriggerDefinition> = serde_json::from_str(&content)?;

        info!(trigger_count = triggers.len(), "Trigger definitions read from file");
        Ok(triggers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_json_file_store_loads_definitions() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "digest", "job_identity": "DigestJob", "kind": "cron", "cron_expression": "0 0 * * *"}},
                {{"id": "sync", "job_identity": "SyncJob", "kind": "simple", "interval_seconds": 60, "repeat_forever": true}}
            ]"#
        )
        .unwrap();

        let triggers = JsonFileTriggerStore::new(file.path()).load_all().await.unwrap();
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[1].interval_seconds, Some(60));
    }

    #[tokio::test]
    async fn test_json_file_store_reports_bad_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        let result = JsonFileTriggerStore::new(file.path()).load_all().await;
        assert!(matches!(result, Err(StorageError::InvalidJson(_))));
    }

    #[tokio::test]
    async fn test_json_file_store_reports_missing_file() {
        let result = JsonFileTriggerStore::new("/nonexistent/triggers.json")
            .load_all()
            .await;
        assert!(matches!(result, Err(StorageError::FileSystemError(_))));
    }

    #[tokio::test]
    async fn test_static_store_returns_copy() {
        let store = StaticTriggerStore::new(vec![TriggerDefinition::simple("once", "SyncJob")]);
        assert_eq!(store.load_all().await.unwrap().len(), 1);
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }
}
