// Capability ports and autowiring
//
// A job declares the capability kinds it needs when it is registered; the
// listener hands it a Capabilities bundle holding only those collaborators.

use crate::errors::{CapabilityError, RegistryError};
use crate::registry::JobRegistry;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Level};

/// Capability kinds a job may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Capability {
    Mail,
    Persistence,
    Log,
    Search,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Mail,
        Capability::Persistence,
        Capability::Log,
        Capability::Search,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Mail => write!(f, "Mail"),
            Capability::Persistence => write!(f, "Persistence"),
            Capability::Log => write!(f, "Log"),
            Capability::Search => write!(f, "Search"),
        }
    }
}

/// Ordered set of declared capability kinds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<&[Capability]> for CapabilitySet {
    fn from(capabilities: &[Capability]) -> Self {
        capabilities.iter().copied().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Outbound mail
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, message: MailMessage) -> Result<(), CapabilityError>;
}

/// Keyed document persistence
#[async_trait]
pub trait PersistenceContext: Send + Sync {
    async fn save(&self, key: &str, document: serde_json::Value) -> Result<(), CapabilityError>;
    async fn load(&self, key: &str) -> Result<Option<serde_json::Value>, CapabilityError>;
}

/// Log sink for job output
pub trait LogSink: Send + Sync {
    fn write(&self, level: Level, message: &str);
}

/// Search index client
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn index(&self, id: &str, document: serde_json::Value) -> Result<(), CapabilityError>;
    async fn query(&self, query: &str) -> Result<Vec<serde_json::Value>, CapabilityError>;
}

/// Collaborators wired into a single job instance
///
/// Only the declared capabilities are set. References are shared with every
/// other instance; the bundle never owns a collaborator exclusively.
#[derive(Clone, Default)]
pub struct Capabilities {
    mail: Option<Arc<dyn MailSender>>,
    persistence: Option<Arc<dyn PersistenceContext>>,
    log: Option<Arc<dyn LogSink>>,
    search: Option<Arc<dyn SearchClient>>,
}

impl Capabilities {
    pub fn mail(&self) -> Option<&Arc<dyn MailSender>> {
        self.mail.as_ref()
    }

    pub fn persistence(&self) -> Option<&Arc<dyn PersistenceContext>> {
        self.persistence.as_ref()
    }

    pub fn log(&self) -> Option<&Arc<dyn LogSink>> {
        self.log.as_ref()
    }

    pub fn search(&self) -> Option<&Arc<dyn SearchClient>> {
        self.search.as_ref()
    }

    pub fn require_mail(&self) -> Result<Arc<dyn MailSender>, CapabilityError> {
        self.mail
            .clone()
            .ok_or(CapabilityError::NotDeclared(Capability::Mail))
    }

    pub fn require_persistence(&self) -> Result<Arc<dyn PersistenceContext>, CapabilityError> {
        self.persistence
            .clone()
            .ok_or(CapabilityError::NotDeclared(Capability::Persistence))
    }

    pub fn require_log(&self) -> Result<Arc<dyn LogSink>, CapabilityError> {
        self.log
            .clone()
            .ok_or(CapabilityError::NotDeclared(Capability::Log))
    }

    pub fn require_search(&self) -> Result<Arc<dyn SearchClient>, CapabilityError> {
        self.search
            .clone()
            .ok_or(CapabilityError::NotDeclared(Capability::Search))
    }

    /// Capability kinds present in this bundle
    pub fn wired(&self) -> CapabilitySet {
        Capability::ALL
            .into_iter()
            .filter(|capability| match capability {
                Capability::Mail => self.mail.is_some(),
                Capability::Persistence => self.persistence.is_some(),
                Capability::Log => self.log.is_some(),
                Capability::Search => self.search.is_some(),
            })
            .collect()
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("mail", &self.mail.is_some())
            .field("persistence", &self.persistence.is_some())
            .field("log", &self.log.is_some())
            .field("search", &self.search.is_some())
            .finish()
    }
}

/// Shared capability collaborators owned by the composition root
#[derive(Clone, Default)]
pub struct CapabilityProvider {
    mail: Option<Arc<dyn MailSender>>,
    persistence: Option<Arc<dyn PersistenceContext>>,
    log: Option<Arc<dyn LogSink>>,
    search: Option<Arc<dyn SearchClient>>,
}

impl CapabilityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mail(mut self, mail: Arc<dyn MailSender>) -> Self {
        self.mail = Some(mail);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceContext>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn SearchClient>) -> Self {
        self.search = Some(search);
        self
    }

    /// Capability kinds this provider can satisfy
    pub fn available(&self) -> CapabilitySet {
        self.wire(&Capability::ALL.into_iter().collect()).wired()
    }

    /// Build the bundle for a job declaring `declared`
    pub fn wire(&self, declared: &CapabilitySet) -> Capabilities {
        let pick = |capability: Capability| declared.contains(capability);

        Capabilities {
            mail: self.mail.clone().filter(|_| pick(Capability::Mail)),
            persistence: self
                .persistence
                .clone()
                .filter(|_| pick(Capability::Persistence)),
            log: self.log.clone().filter(|_| pick(Capability::Log)),
            search: self.search.clone().filter(|_| pick(Capability::Search)),
        }
    }

    /// Check every registered job can be fully wired
    pub fn validate(&self, registry: &JobRegistry) -> Result<(), RegistryError> {
        let available = self.available();

        for descriptor in registry.descriptors() {
            if let Some(missing) = descriptor
                .capabilities()
                .iter()
                .find(|capability| !available.contains(*capability))
            {
                return Err(RegistryError::CapabilityNotProvided {
                    job_identity: descriptor.identity().to_string(),
                    capability: missing,
                });
            }
        }

        Ok(())
    }
}

impl fmt::Debug for CapabilityProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityProvider")
            .field("available", &self.available())
            .finish()
    }
}

/// Log capability backed by tracing
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn write(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => error!(target: "job", "{}", message),
            Level::WARN => warn!(target: "job", "{}", message),
            Level::INFO => info!(target: "job", "{}", message),
            Level::DEBUG => debug!(target: "job", "{}", message),
            _ => trace!(target: "job", "{}", message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::JobRegistryBuilder;

    struct NullMail;

    #[async_trait]
    impl MailSender for NullMail {
        async fn send(&self, _message: MailMessage) -> Result<(), CapabilityError> {
            Ok(())
        }
    }

    fn provider() -> CapabilityProvider {
        CapabilityProvider::new()
            .with_mail(Arc::new(NullMail))
            .with_log(Arc::new(TracingLogSink))
    }

    #[test]
    fn test_wire_sets_only_declared_capabilities() {
        let declared: CapabilitySet = [Capability::Log].into_iter().collect();
        let capabilities = provider().wire(&declared);

        assert!(capabilities.log().is_some());
        assert!(capabilities.mail().is_none());
        assert!(capabilities.persistence().is_none());
        assert!(capabilities.search().is_none());
        assert!(matches!(
            capabilities.require_mail(),
            Err(CapabilityError::NotDeclared(Capability::Mail))
        ));
    }

    #[test]
    fn test_declared_but_unprovided_stays_unset() {
        let declared: CapabilitySet = [Capability::Search].into_iter().collect();
        assert!(provider().wire(&declared).search().is_none());
    }

    #[test]
    fn test_available_lists_provided_capabilities() {
        let available = provider().available();
        assert_eq!(
            available.iter().collect::<Vec<_>>(),
            vec![Capability::Mail, Capability::Log]
        );
    }

    #[test]
    fn test_validate_reports_missing_capability() {
        let registry = JobRegistryBuilder::new()
            .register_fn("Indexer", &[Capability::Search], |_| {
                anyhow::bail!("not constructed in this test")
            })
            .build()
            .unwrap();

        let err = provider().validate(&registry).unwrap_err();
        assert_eq!(
            err,
            RegistryError::CapabilityNotProvided {
                job_identity: "Indexer".to_string(),
                capability: Capability::Search,
            }
        );
    }

    #[test]
    fn test_capability_set_is_ordered() {
        let set: CapabilitySet = [Capability::Search, Capability::Mail].into_iter().collect();
        assert_eq!(
            set.iter().collect::<Vec<_>>(),
            vec![Capability::Mail, Capability::Search]
        );
    }
}
