//! Persistent typed configuration, stored in the database manifest.

use std::collections::BTreeMap;

/// A known configuration key with a default value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigKey {
    /// Maximum candidate byte values for a position to start or end a
    /// query subgraph.
    QueryMaxEdge,
    /// Maximum number of concrete w-grams at a subgraph tip.
    QueryMaxNgram,
    /// Maximum number of datasets merged by one compaction.
    MergeMaxDatasets,
    /// Maximum total file count merged by one compaction.
    MergeMaxFiles,
    /// Number of worker threads servicing requests.
    DatabaseWorkers,
    /// Files larger than this are skipped during indexing.
    IndexMaxFileSize,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 6] = [
        ConfigKey::QueryMaxEdge,
        ConfigKey::QueryMaxNgram,
        ConfigKey::MergeMaxDatasets,
        ConfigKey::MergeMaxFiles,
        ConfigKey::DatabaseWorkers,
        ConfigKey::IndexMaxFileSize,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ConfigKey::QueryMaxEdge => "query_max_edge",
            ConfigKey::QueryMaxNgram => "query_max_ngram",
            ConfigKey::MergeMaxDatasets => "merge_max_datasets",
            ConfigKey::MergeMaxFiles => "merge_max_files",
            ConfigKey::DatabaseWorkers => "database_workers",
            ConfigKey::IndexMaxFileSize => "index_max_file_size",
        }
    }

    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    #[must_use]
    pub const fn default_value(self) -> u64 {
        match self {
            ConfigKey::QueryMaxEdge => 16,
            ConfigKey::QueryMaxNgram => 65536,
            ConfigKey::MergeMaxDatasets => 10,
            ConfigKey::MergeMaxFiles => 2_000_000,
            ConfigKey::DatabaseWorkers => 4,
            ConfigKey::IndexMaxFileSize => 128 * 1024 * 1024,
        }
    }
}

/// The key/value map from the database manifest. Unknown keys are kept
/// (for forward compatibility) but warned about.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    values: BTreeMap<String, u64>,
}

impl DatabaseConfig {
    #[must_use]
    pub fn from_map(values: BTreeMap<String, u64>) -> Self {
        for (key, value) in &values {
            if ConfigKey::parse(key).is_some() {
                tracing::info!("CONFIG: {}={}", key, value);
            } else {
                tracing::warn!("Unexpected config key: {}={}", key, value);
            }
        }
        Self { values }
    }

    #[must_use]
    pub fn get(&self, key: ConfigKey) -> u64 {
        self.values
            .get(key.name())
            .copied()
            .unwrap_or_else(|| key.default_value())
    }

    pub fn set(&mut self, key: ConfigKey, value: u64) {
        self.values.insert(key.name().to_string(), value);
    }

    /// Every known key with its effective value.
    #[must_use]
    pub fn get_all(&self) -> BTreeMap<&'static str, u64> {
        ConfigKey::ALL
            .into_iter()
            .map(|key| (key.name(), self.get(key)))
            .collect()
    }

    /// The raw stored map, for serialization.
    #[must_use]
    pub fn raw(&self) -> &BTreeMap<String, u64> {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_until_set() {
        let mut config = DatabaseConfig::default();
        assert_eq!(config.get(ConfigKey::QueryMaxEdge), 16);
        assert_eq!(config.get(ConfigKey::QueryMaxNgram), 65536);
        config.set(ConfigKey::QueryMaxEdge, 4);
        assert_eq!(config.get(ConfigKey::QueryMaxEdge), 4);
    }

    #[test]
    fn parse_knows_every_key() {
        for key in ConfigKey::ALL {
            assert_eq!(ConfigKey::parse(key.name()), Some(key));
        }
        assert_eq!(ConfigKey::parse("no_such_key"), None);
    }
}
