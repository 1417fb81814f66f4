// Error handling framework
// Every non-fatal kind is contained at the boundary that detects it;
// only ConfigurationError is allowed to abort a process.

use crate::capability::Capability;
use thiserror::Error;

/// Schedule-related errors
#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid trigger definition '{trigger_id}': {reason}")]
    InvalidTriggerDefinition { trigger_id: String, reason: String },
}

/// Queue-related errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Failed to connect to queue: {0}")]
    Connection(String),

    #[error("Failed to create stream: {0}")]
    StreamCreation(String),

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Failed to create consumer: {0}")]
    ConsumerCreation(String),

    #[error("Failed to publish message: {0}")]
    PublishFailed(String),

    #[error("Failed to consume message: {0}")]
    ConsumeFailed(String),

    #[error("Failed to acknowledge message: {0}")]
    AckFailed(String),

    #[error("Message decoding failed: {0}")]
    DecodeFailed(String),

    #[error("Health check failed: {0}")]
    HealthCheck(String),

    #[error("Queue operation timeout: {0}")]
    Timeout(String),

    #[error("Queue is closed")]
    Closed,
}

/// Errors reported by the dispatcher to its caller
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Failed to dispatch job '{job_identity}': {source}")]
    PublishFailed {
        job_identity: String,
        #[source]
        source: QueueError,
    },

    #[error("Cannot dispatch an empty job identity")]
    EmptyIdentity,
}

/// Job registry errors, raised while the registry is being built
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Job identity registered more than once: {0}")]
    DuplicateIdentity(String),

    #[error("Job identity cannot be empty")]
    EmptyIdentity,

    #[error("Job '{job_identity}' requires capability {capability} which is not provided")]
    CapabilityNotProvided {
        job_identity: String,
        capability: Capability,
    },
}

/// Job execution errors
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No job registered for identity: {0}")]
    UnresolvedJobIdentity(String),

    #[error("Failed to construct job '{job_identity}': {reason}")]
    ConstructionFailed { job_identity: String, reason: String },

    #[error("Job '{job_identity}' failed: {reason}")]
    RunFailed { job_identity: String, reason: String },

    #[error("Job '{job_identity}' panicked: {reason}")]
    Panicked { job_identity: String, reason: String },
}

/// Errors raised by capability collaborators (mail, persistence, log, search)
#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Capability {0} was not declared by this job")]
    NotDeclared(Capability),

    #[error("{capability} operation failed: {reason}")]
    OperationFailed {
        capability: Capability,
        reason: String,
    },
}

/// Trigger store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Filesystem error: {0}")]
    FileSystemError(String),

    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
}

/// Scheduler lifecycle errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is already running")]
    AlreadyRunning,

    #[error("Scheduler has been shut down")]
    ShutDown,

    #[error("Trigger not found: {0}")]
    TriggerNotFound(String),

    #[error("Failed to load triggers: {0}")]
    TriggerStore(#[from] StorageError),
}

/// Startup misconfiguration. Fatal.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::FileSystemError(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::InvalidJson(err.to_string())
    }
}
