//! # Grove Configuration
//!
//! TOML configuration of the binary: store settings, the engine schema and
//! named publications. Without a `--config` file the built-in
//! `config/default.toml` is used.

use grove_core::{EngineSpec, GraphEngine, GroveError, RecordFilter, StoreConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

/// Maximum configuration file size (1 MB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroveConfig {
    #[serde(default)]
    pub store: StoreSettings,
    pub engine: EngineSpec,
    #[serde(default)]
    pub publications: Vec<PublicationConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Upper bound on one raw transaction, in milliseconds.
    pub transaction_timeout_ms: Option<u64>,
}

impl StoreSettings {
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            transaction_timeout: self.transaction_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// A named record filter over the snapshots of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublicationConfig {
    pub name: String,
    pub source: String,
    /// Field equalities every published record must satisfy.
    #[serde(rename = "where")]
    pub matches: BTreeMap<String, Value>,
    pub sort: Option<String>,
    pub descending: bool,
    pub limit: Option<usize>,
    pub fields: Option<Vec<String>>,
}

impl PublicationConfig {
    /// An ad-hoc publication over `source` with no stages.
    #[must_use]
    pub fn over(source: impl Into<String>) -> Self {
        let source = source.into();
        Self {
            name: source.clone(),
            source,
            ..Self::default()
        }
    }

    /// Build the record filter.
    ///
    /// Records must match the configured equalities and every entry of the
    /// subscription params.
    pub fn to_filter(&self) -> Result<RecordFilter, GroveError> {
        let matches = self.matches.clone();
        let mut filter = RecordFilter::new(self.source.as_str())
            .named(self.name.as_str())
            .filter(move |item, args| {
                let mut required = matches.iter().chain(
                    args.params
                        .as_object()
                        .into_iter()
                        .flat_map(|params| params.iter()),
                );
                required.all(|(field, value)| item.get(field) == Some(value))
            });
        if let Some(sort) = &self.sort {
            filter = filter.sort_by(sort.as_str(), self.descending);
        }
        if let Some(limit) = self.limit {
            filter = filter.limit(limit);
        }
        if let Some(fields) = &self.fields {
            filter = filter.fields(fields.iter().cloned());
        }
        filter.build()?;
        Ok(filter)
    }
}

impl GroveConfig {
    /// The built-in configuration.
    pub fn builtin() -> Result<Self, GroveError> {
        Self::parse(DEFAULT_CONFIG)
    }

    /// Parse a configuration and validate its engine schema.
    pub fn parse(text: &str) -> Result<Self, GroveError> {
        let config: Self = toml::from_str(text)
            .map_err(|e| GroveError::SerializationError(format!("config: {}", e)))?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Load from `path`, or the built-in configuration when `None`.
    pub fn load(path: Option<&Path>) -> Result<Self, GroveError> {
        let Some(path) = path else {
            return Self::builtin();
        };
        let metadata = std::fs::metadata(path)
            .map_err(|e| GroveError::IoError(format!("Cannot read config metadata: {}", e)))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(GroveError::SerializationError(format!(
                "Config size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| GroveError::IoError(format!("Read config: {}", e)))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Self::parse(&text)
    }

    pub fn engine(&self) -> Result<GraphEngine, GroveError> {
        GraphEngine::new(self.engine.clone())
    }

    #[must_use]
    pub fn publication(&self, name: &str) -> Option<&PublicationConfig> {
        self.publications.iter().find(|p| p.name == name)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builtin_config_parses() {
        let config = GroveConfig::builtin().expect("builtin");
        assert_eq!(config.engine.key, "catalog");
        assert_eq!(
            config.store.store_config().transaction_timeout,
            Some(Duration::from_secs(5))
        );
        assert!(config.publication("items-by-price").is_some());
        config.engine().expect("engine");
    }

    #[test]
    fn invalid_engine_is_rejected() {
        let text = r#"
            [engine]
            key = "broken"
            top = "nowhere"
        "#;
        assert!(matches!(
            GroveConfig::parse(text),
            Err(GroveError::InvalidEngine(_))
        ));
    }

    #[test]
    fn publication_matches_config_and_params() {
        let publication = PublicationConfig {
            matches: BTreeMap::from([("kind".to_string(), json!("book"))]),
            ..PublicationConfig::over("Item")
        };
        let filter = publication.to_filter().expect("filter");
        let items = vec![
            json!({ "recordId": "a", "version": 1, "kind": "book", "shelf": 1 }),
            json!({ "recordId": "b", "version": 1, "kind": "book", "shelf": 2 }),
            json!({ "recordId": "c", "version": 1, "kind": "film", "shelf": 1 }),
        ];
        assert_eq!(filter.apply(items.clone(), Value::Null).expect("apply").len(), 2);
        let narrowed = filter.apply(items, json!({ "shelf": 1 })).expect("apply");
        assert_eq!(narrowed.len(), 1);
        assert_eq!(narrowed[0]["recordId"], json!("a"));
    }
}
