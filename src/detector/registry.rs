//! Runtime-replaceable threshold table

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::data::{ConfigError, ThresholdConfig};

type ThresholdTable = HashMap<String, Arc<ThresholdConfig>>;

/// Holds the current per-signal threshold configuration.
///
/// The table is immutable once published; updates build a new table and swap
/// the pointer, so readers see either the old or the new table, never a mix.
pub struct ThresholdRegistry {
    table: RwLock<Arc<ThresholdTable>>,
}

impl ThresholdRegistry {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Create a registry populated with `configs`
    pub fn with_configs(configs: Vec<ThresholdConfig>) -> Result<Self, ConfigError> {
        let registry = Self::new();
        registry.replace_all(configs)?;
        Ok(registry)
    }

    /// Look up the config for a signal
    pub fn get(&self, signal_id: &str) -> Result<Arc<ThresholdConfig>, RegistryError> {
        self.table
            .read()
            .get(signal_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(signal_id.to_string()))
    }

    pub fn contains(&self, signal_id: &str) -> bool {
        self.table.read().contains_key(signal_id)
    }

    /// Atomically swap the whole table. Nothing is applied if any config is invalid.
    pub fn replace_all(&self, configs: Vec<ThresholdConfig>) -> Result<usize, ConfigError> {
        let mut next = HashMap::with_capacity(configs.len());
        for config in configs {
            config.validate()?;
            next.insert(config.signal_id.clone(), Arc::new(config));
        }

        let count = next.len();
        *self.table.write() = Arc::new(next);

        tracing::info!(signals = count, "Threshold table replaced");
        Ok(count)
    }

    /// Replace or add the config of a single signal
    pub fn upsert(&self, config: ThresholdConfig) -> Result<(), ConfigError> {
        config.validate()?;

        let mut table = self.table.write();
        let mut next = ThresholdTable::clone(&table);
        tracing::info!(signal_id = %config.signal_id, "Threshold updated");
        next.insert(config.signal_id.clone(), Arc::new(config));
        *table = Arc::new(next);

        Ok(())
    }

    /// Consistent view of the whole table
    pub fn snapshot(&self) -> Arc<ThresholdTable> {
        Arc::clone(&self.table.read())
    }

    /// All configs, sorted by signal id
    pub fn list(&self) -> Vec<ThresholdConfig> {
        let mut configs: Vec<ThresholdConfig> = self
            .snapshot()
            .values()
            .map(|c| ThresholdConfig::clone(c))
            .collect();
        configs.sort_by(|a, b| a.signal_id.cmp(&b.signal_id));
        configs
    }

    pub fn len(&self) -> usize {
        self.table.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ThresholdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("No threshold configured for signal '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(signal_id: &str, warning_max: f64) -> ThresholdConfig {
        ThresholdConfig::new(signal_id, "frequency").with_warning(Some(59.0), Some(warning_max))
    }

    #[test]
    fn test_get_and_not_found() {
        let registry = ThresholdRegistry::with_configs(vec![config("a", 61.0)]).unwrap();

        assert_eq!(registry.get("a").unwrap().warning_max, Some(61.0));
        assert!(matches!(registry.get("b"), Err(RegistryError::NotFound(_))));
    }

    #[test]
    fn test_replace_all_swaps_whole_table() {
        let registry =
            ThresholdRegistry::with_configs(vec![config("a", 61.0), config("b", 61.0)]).unwrap();
        let before = registry.snapshot();

        registry.replace_all(vec![config("c", 62.0)]).unwrap();

        assert!(!registry.contains("a"));
        assert!(registry.contains("c"));
        // Earlier snapshots are unaffected by the swap
        assert_eq!(before.len(), 2);
        assert!(before.contains_key("a"));
    }

    #[test]
    fn test_replace_all_is_all_or_nothing() {
        let registry = ThresholdRegistry::with_configs(vec![config("a", 61.0)]).unwrap();

        let bad = config("b", 61.0).with_trigger(0, Duration::from_secs(1));
        assert!(registry.replace_all(vec![config("c", 62.0), bad]).is_err());

        assert!(registry.contains("a"));
        assert!(!registry.contains("c"));
    }

    #[test]
    fn test_upsert_single_signal() {
        let registry = ThresholdRegistry::with_configs(vec![config("a", 61.0)]).unwrap();

        registry.upsert(config("a", 63.0)).unwrap();
        registry.upsert(config("b", 64.0)).unwrap();

        let listed = registry.list();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].signal_id, "a");
        assert_eq!(listed[0].warning_max, Some(63.0));
    }
}
