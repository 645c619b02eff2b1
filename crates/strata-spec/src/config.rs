//! Immutable runtime configuration
//!
//! One [`Config`] value is loaded at start-up and handed to every component
//! that needs it. Loading validates all specifications, so a configuration
//! that loads never causes a configuration error later.

use crate::error::{SpecError, SpecResult};
use crate::registry::SpecRegistry;
use crate::spec::{CompositeKind, Specification};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// One logical store: its pods and the composites built from them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base document collections
    pub pods: Vec<String>,
    /// View specifications
    #[serde(default)]
    pub view_specifications: Vec<Specification>,
    /// Table specifications
    #[serde(default)]
    pub table_specifications: Vec<Specification>,
    /// Search document specifications
    #[serde(default)]
    pub search_specifications: Vec<Specification>,
    /// Search provider name; the in-memory provider when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_provider: Option<String>,
}

/// Lock acquisition behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Attempts per document before the batch is abandoned
    pub lock_attempts: u32,
    /// Base pause between attempts in milliseconds
    pub lock_backoff_ms: u64,
    /// Age after which a lock is considered abandoned, in seconds
    pub lock_lease_secs: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            lock_attempts: 20,
            lock_backoff_ms: 10,
            lock_lease_secs: 60,
        }
    }
}

impl TransactionConfig {
    /// Lease as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    /// Base backoff as a [`Duration`]
    #[inline]
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.lock_backoff_ms)
    }
}

/// Job submission behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue for impact discovery jobs
    pub discover_queue: String,
    /// Default queue for apply jobs
    pub apply_queue: String,
    /// Enqueue attempts before a queuing error
    pub enqueue_attempts: u32,
    /// Backoff base in milliseconds; attempt `n` waits `n * base`
    pub enqueue_backoff_ms: u64,
    /// Confirm each job with a status call after enqueue
    pub verify_status: bool,
    /// Resources per apply job when backfilling a spec
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            discover_queue: "strata::discover".to_string(),
            apply_queue: "strata::apply".to_string(),
            enqueue_attempts: 5,
            enqueue_backoff_ms: 200,
            verify_status: true,
            batch_size: 100,
        }
    }
}

/// Per-operation sync/async switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsyncOperations {
    /// Materialize views through the queue
    pub views: bool,
    /// Materialize tables through the queue
    pub tables: bool,
    /// Materialize search documents through the queue
    pub search: bool,
}

impl Default for AsyncOperations {
    fn default() -> Self {
        Self {
            views: false,
            tables: true,
            search: true,
        }
    }
}

impl AsyncOperations {
    /// Whether `kind` is materialized asynchronously
    #[inline]
    #[must_use]
    pub fn is_async(&self, kind: CompositeKind) -> bool {
        match kind {
            CompositeKind::View => self.views,
            CompositeKind::Table => self.tables,
            CompositeKind::Search => self.search,
        }
    }

    /// Everything inline
    #[inline]
    #[must_use]
    pub fn all_sync() -> Self {
        Self {
            views: false,
            tables: false,
            search: false,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Context used when a caller gives none
    pub default_context: String,
    /// Stores by name
    pub stores: BTreeMap<String, StoreConfig>,
    /// Locking
    #[serde(default)]
    pub transaction: TransactionConfig,
    /// Queueing
    #[serde(default)]
    pub queue: QueueConfig,
    /// Sync/async per operation
    #[serde(default)]
    pub async_operations: AsyncOperations,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_context: "http://talisaspire.com/".to_string(),
            stores: BTreeMap::new(),
            transaction: TransactionConfig::default(),
            queue: QueueConfig::default(),
            async_operations: AsyncOperations::default(),
        }
    }
}

impl Config {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a store
    #[must_use]
    pub fn with_store(mut self, name: impl Into<String>, store: StoreConfig) -> Self {
        self.stores.insert(name.into(), store);
        self
    }

    /// With default context
    #[inline]
    #[must_use]
    pub fn with_default_context(mut self, context: impl Into<String>) -> Self {
        self.default_context = context.into();
        self
    }

    /// With sync/async switches
    #[inline]
    #[must_use]
    pub fn with_async_operations(mut self, ops: AsyncOperations) -> Self {
        self.async_operations = ops;
        self
    }

    /// With transaction settings
    #[inline]
    #[must_use]
    pub fn with_transaction(mut self, transaction: TransactionConfig) -> Self {
        self.transaction = transaction;
        self
    }

    /// With queue settings
    #[inline]
    #[must_use]
    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    /// Parse JSON and validate
    ///
    /// # Errors
    /// [`SpecError::Parse`] or any validation error
    pub fn from_json_str(s: &str) -> SpecResult<Self> {
        let config: Self = serde_json::from_str(s).map_err(|e| SpecError::Parse {
            format: "json",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML and validate
    ///
    /// # Errors
    /// [`SpecError::Parse`] or any validation error
    pub fn from_yaml_str(s: &str) -> SpecResult<Self> {
        let config: Self = serde_yaml::from_str(s).map_err(|e| SpecError::Parse {
            format: "yaml",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML and validate
    ///
    /// # Errors
    /// [`SpecError::Parse`] or any validation error
    pub fn from_toml_str(s: &str) -> SpecResult<Self> {
        let config: Self = toml::from_str(s).map_err(|e| SpecError::Parse {
            format: "toml",
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, choosing the format by extension
    ///
    /// # Errors
    /// I/O, parse or validation errors; unknown extensions are a
    /// [`SpecError::Config`]
    pub fn from_path(path: impl AsRef<Path>) -> SpecResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SpecError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        tracing::debug!(path = %path.display(), "loading configuration");
        match ext.as_deref() {
            Some("json") => Self::from_json_str(&text),
            Some("yaml" | "yml") => Self::from_yaml_str(&text),
            Some("toml") => Self::from_toml_str(&text),
            _ => Err(SpecError::Config(format!(
                "cannot infer configuration format of {}",
                path.display()
            ))),
        }
    }

    /// Check every store and spec
    ///
    /// # Errors
    /// The first problem found
    pub fn validate(&self) -> SpecResult<()> {
        self.registries().map(|_| ())
    }

    /// Build a validated registry per store
    ///
    /// # Errors
    /// The first problem found
    pub fn registries(&self) -> SpecResult<BTreeMap<String, Arc<SpecRegistry>>> {
        if self.default_context.is_empty() {
            return Err(SpecError::Config("default_context must not be empty".to_string()));
        }
        if self.transaction.lock_attempts == 0 {
            return Err(SpecError::Config("transaction.lock_attempts must be at least 1".to_string()));
        }
        if self.queue.enqueue_attempts == 0 {
            return Err(SpecError::Config("queue.enqueue_attempts must be at least 1".to_string()));
        }
        if self.queue.batch_size == 0 {
            return Err(SpecError::Config("queue.batch_size must be at least 1".to_string()));
        }

        let mut out = BTreeMap::new();
        for (name, store) in &self.stores {
            if store.pods.is_empty() {
                return Err(SpecError::Config(format!("store '{name}' declares no pods")));
            }
            let registry = SpecRegistry::new(
                store.pods.iter().cloned(),
                store.view_specifications.clone(),
                store.table_specifications.clone(),
                store.search_specifications.clone(),
            )?;
            out.insert(name.clone(), Arc::new(registry));
        }
        Ok(out)
    }

    /// Store section by name
    ///
    /// # Errors
    /// [`SpecError::UnknownStore`]
    pub fn store(&self, name: &str) -> SpecResult<&StoreConfig> {
        self.stores
            .get(name)
            .ok_or_else(|| SpecError::UnknownStore(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const JSON: &str = r#"{
        "default_context": "http://talisaspire.com/",
        "stores": {
            "tripod_php_testing": {
                "pods": ["CBD_testing"],
                "table_specifications": [{
                    "_id": "t_resource",
                    "type": "bibo:Book",
                    "from": "CBD_testing",
                    "fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]
                }]
            }
        }
    }"#;

    #[test]
    fn defaults_fill_omitted_sections() {
        let config = Config::from_json_str(JSON).unwrap();
        assert_eq!(config.transaction, TransactionConfig::default());
        assert_eq!(config.transaction.lock_attempts, 20);
        assert_eq!(config.transaction.lease(), Duration::from_secs(60));
        assert_eq!(config.queue.enqueue_attempts, 5);
        assert!(!config.async_operations.is_async(CompositeKind::View));
        assert!(config.async_operations.is_async(CompositeKind::Table));

        let registries = config.registries().unwrap();
        assert_eq!(registries["tripod_php_testing"].len(), 1);
    }

    #[test]
    fn yaml_and_toml_are_equivalent() {
        let json = Config::from_json_str(JSON).unwrap();

        let yaml = serde_yaml::to_string(&json).unwrap();
        assert_eq!(Config::from_yaml_str(&yaml).unwrap(), json);

        let toml_text = toml::to_string(&json).unwrap();
        assert_eq!(Config::from_toml_str(&toml_text).unwrap(), json);
    }

    #[test]
    fn from_path_picks_format_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(JSON.as_bytes()).unwrap();
        let config = Config::from_path(file.path()).unwrap();
        assert!(config.store("tripod_php_testing").is_ok());
        assert!(matches!(config.store("nope"), Err(SpecError::UnknownStore(_))));

        let mut other = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        other.write_all(JSON.as_bytes()).unwrap();
        assert!(matches!(Config::from_path(other.path()), Err(SpecError::Config(_))));
    }

    #[test]
    fn invalid_specs_fail_at_load() {
        let bad = JSON.replace(r#""predicates": ["rdf:type"]"#, r#""predicates": ["rdf:type"], "value": "_link_""#);
        assert!(matches!(Config::from_json_str(&bad), Err(SpecError::Invalid { .. })));

        let bad_operator = JSON.replace(
            r#""fields": [{"fieldName": "type", "predicates": ["rdf:type"]}]"#,
            r#""computed_fields": [{"fieldName": "x", "value": {"arithmetic": {"operator": "^", "operands": [1, 2]}}}]"#,
        );
        assert!(matches!(Config::from_json_str(&bad_operator), Err(SpecError::Parse { .. })));
    }

    #[test]
    fn stores_need_pods() {
        let config = Config::new().with_store("s", StoreConfig::default());
        assert!(matches!(config.validate(), Err(SpecError::Config(_))));
    }
}
