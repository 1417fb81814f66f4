// Data models for triggers and dispatch messages

use crate::errors::QueueError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// TriggerKind selects how fire times are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Simple,
    Cron,
}

/// TriggerDefinition is a schedule that fires a job identity
///
/// Owned by the trigger store; the scheduler only keeps a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerDefinition {
    pub id: String,
    pub job_identity: String,
    pub kind: TriggerKind,
    /// Simple only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    /// Cron only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    /// Cron only, IANA name. UTC when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Absent means fire immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Simple only
    #[serde(default)]
    pub repeat_forever: bool,
}

impl TriggerDefinition {
    /// A simple trigger that fires once, immediately unless a start time is set
    pub fn simple(id: impl Into<String>, job_identity: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            job_identity: job_identity.into(),
            kind: TriggerKind::Simple,
            interval_seconds: None,
            cron_expression: None,
            timezone: None,
            start_time: None,
            repeat_forever: false,
        }
    }

    /// A simple trigger repeating every `interval_seconds` until cancelled
    pub fn every(
        id: impl Into<String>,
        job_identity: impl Into<String>,
        interval_seconds: u64,
    ) -> Self {
        Self {
            interval_seconds: Some(interval_seconds),
            repeat_forever: true,
            ..Self::simple(id, job_identity)
        }
    }

    pub fn cron(
        id: impl Into<String>,
        job_identity: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            job_identity: job_identity.into(),
            kind: TriggerKind::Cron,
            interval_seconds: None,
            cron_expression: Some(expression.into()),
            timezone: None,
            start_time: None,
            repeat_forever: false,
        }
    }

    pub fn starting_at(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn in_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Lifecycle state of a loaded trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Scheduled,
    Firing,
    /// A non-repeating trigger that has fired, or a cron with no further occurrence
    Completed,
    Cancelled,
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerState::Scheduled => write!(f, "scheduled"),
            TriggerState::Firing => write!(f, "firing"),
            TriggerState::Completed => write!(f, "completed"),
            TriggerState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// DispatchMessage is the queue payload produced when a trigger fires
///
/// On the wire the body is the job identity as UTF-8 and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchMessage {
    job_identity: String,
}

impl DispatchMessage {
    /// Returns None for a blank identity
    pub fn new(job_identity: impl Into<String>) -> Option<Self> {
        let job_identity = job_identity.into();
        if job_identity.trim().is_empty() {
            return None;
        }
        Some(Self { job_identity })
    }

    pub fn job_identity(&self) -> &str {
        &self.job_identity
    }

    pub fn encode(&self) -> Vec<u8> {
        self.job_identity.as_bytes().to_vec()
    }

    pub fn decode(body: &[u8]) -> Result<Self, QueueError> {
        let text = std::str::from_utf8(body)
            .map_err(|e| QueueError::DecodeFailed(format!("Body is not valid UTF-8: {}", e)))?;

        Self::new(text.trim())
            .ok_or_else(|| QueueError::DecodeFailed("Body does not name a job identity".to_string()))
    }
}

impl fmt::Display for DispatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.job_identity)
    }
}
