// Job registry
//
// Built once at startup from explicit registrations and read-only afterwards.
// Each identity maps to a factory plus the capability kinds the job declared.

use crate::capability::{Capabilities, Capability, CapabilitySet};
use crate::errors::RegistryError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// A unit of work. One instance per dispatch message, never reused.
#[async_trait]
pub trait Job: Send {
    async fn run(&mut self) -> anyhow::Result<()>;
}

/// A job type registered by its identity
///
/// `build` receives only the capabilities listed in `CAPABILITIES`.
pub trait JobDefinition: Job + Sized + 'static {
    const IDENTITY: &'static str;
    const CAPABILITIES: &'static [Capability] = &[];

    fn build(capabilities: &Capabilities) -> anyhow::Result<Self>;
}

pub type JobFactory = Arc<dyn Fn(&Capabilities) -> anyhow::Result<Box<dyn Job>> + Send + Sync>;

/// Identity, declared capabilities and factory of one job type
#[derive(Clone)]
pub struct JobDescriptor {
    identity: String,
    capabilities: CapabilitySet,
    factory: JobFactory,
}

impl JobDescriptor {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Construct a fresh job instance
    pub fn instantiate(&self, capabilities: &Capabilities) -> anyhow::Result<Box<dyn Job>> {
        (self.factory)(capabilities)
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("identity", &self.identity)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Read-only map from job identity to descriptor
#[derive(Debug, Clone, Default)]
pub struct JobRegistry {
    descriptors: HashMap<String, JobDescriptor>,
}

impl JobRegistry {
    pub fn builder() -> JobRegistryBuilder {
        JobRegistryBuilder::new()
    }

    pub fn resolve(&self, identity: &str) -> Option<&JobDescriptor> {
        self.descriptors.get(identity)
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &JobDescriptor> {
        self.descriptors.values()
    }

    /// Registered identities, sorted
    pub fn identities(&self) -> Vec<&str> {
        let mut identities: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        identities.sort_unstable();
        identities
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Collects registrations and validates them into a JobRegistry
#[derive(Default)]
pub struct JobRegistryBuilder {
    pending: Vec<JobDescriptor>,
}

impl JobRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job type under its declared identity
    pub fn register<J: JobDefinition>(self) -> Self {
        self.register_fn(J::IDENTITY, J::CAPABILITIES, |capabilities| {
            J::build(capabilities).map(|job| Box::new(job) as Box<dyn Job>)
        })
    }

    /// Register an explicit factory
    pub fn register_fn<F>(
        mut self,
        identity: impl Into<String>,
        capabilities: &[Capability],
        factory: F,
    ) -> Self
    where
        F: Fn(&Capabilities) -> anyhow::Result<Box<dyn Job>> + Send + Sync + 'static,
    {
        self.pending.push(JobDescriptor {
            identity: identity.into(),
            capabilities: CapabilitySet::from(capabilities),
            factory: Arc::new(factory),
        });
        self
    }

    pub fn build(self) -> Result<JobRegistry, RegistryError> {
        let mut descriptors = HashMap::with_capacity(self.pending.len());

        for descriptor in self.pending {
            if descriptor.identity.trim().is_empty() {
                return Err(RegistryError::EmptyIdentity);
            }
            if descriptors.contains_key(&descriptor.identity) {
                return Err(RegistryError::DuplicateIdentity(descriptor.identity));
            }
            descriptors.insert(descriptor.identity.clone(), descriptor);
        }

        let registry = JobRegistry { descriptors };
        info!(
            job_count = registry.len(),
            identities = ?registry.identities(),
            "Job registry built"
        );
        Ok(registry)
    }
}
