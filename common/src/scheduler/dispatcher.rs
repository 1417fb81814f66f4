// Dispatcher: turns a fired job identity into a queued dispatch message

use crate::errors::DispatchError;
use crate::models::DispatchMessage;
use crate::queue::MessagePublisher;
use crate::telemetry;
use std::sync::Arc;
use tracing::{info, instrument};

/// Publishes one dispatch message per call
///
/// No retry: a refused publish is returned to the caller, which decides
/// whether the occurrence is simply lost.
#[derive(Clone)]
pub struct Dispatcher {
    publisher: Arc<dyn MessagePublisher>,
}

impl Dispatcher {
    pub fn new(publisher: Arc<dyn MessagePublisher>) -> Self {
        Self { publisher }
    }

    #[instrument(skip(self))]
    pub async fn publish(&self, job_identity: &str) -> Result<DispatchMessage, DispatchError> {
        let message = DispatchMessage::new(job_identity).ok_or(DispatchError::EmptyIdentity)?;

        match self.publisher.publish(&message).await {
            Ok(()) => {
                telemetry::record_dispatch_published(job_identity);
                info!("Dispatch message published");
                Ok(message)
            }
            Err(source) => {
                telemetry::record_dispatch_failure(job_identity);
                Err(DispatchError::PublishFailed {
                    job_identity: job_identity.to_string(),
                    source,
                })
            }
        }
    }
}
