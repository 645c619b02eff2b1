//! Wiring shared by the driver and the job runner

use crate::error::{StrataError, StrataResult};
use crate::lock::LockManager;
use crate::queue::OperationQueue;
use crate::transaction::TransactionCoordinator;
use std::collections::BTreeMap;
use std::sync::Arc;
use strata_composite::{Composites, Sources};
use strata_spec::{Config, SpecError, SpecRegistry};
use strata_store::{DocumentStore, JobTransport, SearchProvider};

/// Everything bound to one configured store
#[derive(Debug)]
pub struct StoreServices {
    /// Store name
    pub name: String,
    /// Specifications of the store
    pub registry: Arc<SpecRegistry>,
    /// Views, tables and search documents
    pub composites: Composites,
    /// Base document writes
    pub coordinator: TransactionCoordinator,
}

impl StoreServices {
    /// Fail unless `pod` is declared by the store
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for undeclared pods
    pub fn require_pod(&self, pod: &str) -> StrataResult<()> {
        if self.registry.has_pod(pod) {
            Ok(())
        } else {
            Err(SpecError::Config(format!("store '{}' has no pod '{pod}'", self.name)).into())
        }
    }
}

/// Immutable services built once from a [`Config`]
pub struct Services {
    /// Validated configuration
    pub config: Arc<Config>,
    /// Backing document store
    pub documents: Arc<dyn DocumentStore>,
    /// Per-store services by name
    pub stores: BTreeMap<String, StoreServices>,
    /// Job submission
    pub queue: OperationQueue,
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl Services {
    /// Validate `config` and wire every store
    ///
    /// # Errors
    /// [`StrataError::Configuration`] when the configuration is invalid
    pub fn new(
        config: Config,
        documents: Arc<dyn DocumentStore>,
        provider: Arc<dyn SearchProvider>,
        transport: Arc<dyn JobTransport>,
    ) -> StrataResult<Self> {
        let registries = config.registries()?;
        let locks = LockManager::new(documents.clone(), config.transaction);

        let stores = registries
            .into_iter()
            .map(|(name, registry)| {
                let sources = Sources::new(name.clone(), registry.clone(), documents.clone());
                let services = StoreServices {
                    composites: Composites::new(&sources, provider.clone()),
                    coordinator: TransactionCoordinator::new(name.clone(), documents.clone(), locks.clone()),
                    registry,
                    name: name.clone(),
                };
                (name, services)
            })
            .collect();

        Ok(Self {
            queue: OperationQueue::new(transport, config.queue.clone()),
            config: Arc::new(config),
            documents,
            stores,
        })
    }

    /// Services of one store
    ///
    /// # Errors
    /// [`StrataError::Configuration`] for unknown stores
    pub fn store(&self, name: &str) -> StrataResult<&StoreServices> {
        self.stores
            .get(name)
            .ok_or_else(|| StrataError::Configuration(SpecError::UnknownStore(name.to_string())))
    }
}
