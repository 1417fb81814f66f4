// Heartbeat job: writes one line to the Log capability per run

use crate::capability::{Capabilities, Capability, LogSink};
use crate::registry::{Job, JobDefinition};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Level;

pub struct HeartbeatJob {
    log: Arc<dyn LogSink>,
}

#[async_trait]
impl Job for HeartbeatJob {
    async fn run(&mut self) -> anyhow::Result<()> {
        self.log.write(
            Level::INFO,
            &format!("heartbeat at {}", chrono::Utc::now().to_rfc3339()),
        );
        Ok(())
    }
}

impl JobDefinition for HeartbeatJob {
    const IDENTITY: &'static str = "HeartbeatJob";
    const CAPABILITIES: &'static [Capability] = &[Capability::Log];

    fn build(capabilities: &Capabilities) -> anyhow::Result<Self> {
        Ok(Self {
            log: capabilities.require_log()?,
        })
    }
}
