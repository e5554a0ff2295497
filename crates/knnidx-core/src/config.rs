//! Index configuration.
//!
//! [`IndexConfig`] describes everything needed to build an empty index: the
//! metric space and the engine parameters. It is read from YAML with
//! camelCase keys:
//!
//! ```yaml
//! metric: angular
//! dimension: 128
//! capacity: 50000
//! m: 32
//! efConstruction: 200
//! efSearch: 64
//! ```
//!
//! The user-level file lives at `~/.knnidx/config.yaml`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::{
    EngineParams, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_M, DEFAULT_SEED, MAX_M,
};
use crate::error::{KnnError, KnnResult};
use crate::metric::MetricKind;

/// Default maximum number of elements.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Config file name inside the config directory.
const CONFIG_FILE_NAME: &str = "config.yaml";

// ============================================================================
// IndexConfig
// ============================================================================

/// Metric space and engine parameters for one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexConfig {
    /// Distance family.
    #[serde(default)]
    pub metric: MetricKind,

    /// Vector dimension.
    pub dimension: usize,

    /// Normalize vectors for Euclidean and InnerProduct. Angular always
    /// normalizes.
    #[serde(default)]
    pub normalize: bool,

    /// Maximum number of elements.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Graph fan-out.
    #[serde(default = "default_m")]
    pub m: usize,

    /// Search breadth while inserting.
    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    /// Random seed for level assignment.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Search breadth while querying.
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_m() -> usize {
    DEFAULT_M
}

fn default_ef_construction() -> usize {
    DEFAULT_EF_CONSTRUCTION
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_ef_search() -> usize {
    DEFAULT_EF_SEARCH
}

impl IndexConfig {
    /// Defaults for a `dimension`-wide Euclidean index.
    pub fn new(dimension: usize) -> Self {
        Self {
            metric: MetricKind::default(),
            dimension,
            normalize: false,
            capacity: DEFAULT_CAPACITY,
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            seed: DEFAULT_SEED,
            ef_search: DEFAULT_EF_SEARCH,
        }
    }

    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef_construction: usize) -> Self {
        self.ef_construction = ef_construction;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_ef_search(mut self, ef_search: usize) -> Self {
        self.ef_search = ef_search;
        self
    }

    /// Engine parameters for `Index::initialize_empty`.
    pub fn engine_params(&self) -> EngineParams {
        EngineParams::new(self.capacity)
            .with_m(self.m)
            .with_ef_construction(self.ef_construction)
            .with_seed(self.seed)
    }

    /// Load the configuration from `~/.knnidx/config.yaml`.
    ///
    /// Returns `Ok(None)` when the home directory is unknown or the file does
    /// not exist.
    pub fn load_default() -> KnnResult<Option<Self>> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_path(&path).map(Some),
            Some(path) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(None)
            }
            None => {
                tracing::debug!("Could not determine home directory, using defaults");
                Ok(None)
            }
        }
    }

    /// Load the configuration from a specific path.
    ///
    /// # Errors
    ///
    /// - [`KnnError::ConfigNotFound`] if the file does not exist
    /// - [`KnnError::InvalidConfiguration`] if it cannot be read, parsed or
    ///   fails validation
    pub fn from_path(path: &Path) -> KnnResult<Self> {
        if !path.exists() {
            return Err(KnnError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            KnnError::InvalidConfiguration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            KnnError::InvalidConfiguration(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Get the default config directory (`~/.knnidx`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".knnidx"))
    }

    /// Get the default config file path (`~/.knnidx/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Validate the configuration, returning warnings for questionable values.
    ///
    /// # Errors
    ///
    /// `InvalidConfiguration` if `dimension`, `capacity`, `m`,
    /// `efConstruction` or `efSearch` is zero.
    ///
    /// # Warnings
    ///
    /// - `efSearch < 10`: recall drops sharply
    /// - `m > 100`: memory use grows with little recall gain
    /// - `efConstruction < m`: graph quality suffers
    /// - `normalize` set with Angular: redundant
    pub fn validate(&self) -> KnnResult<Vec<String>> {
        let required = [
            ("dimension", self.dimension),
            ("capacity", self.capacity),
            ("m", self.m),
            ("efConstruction", self.ef_construction),
            ("efSearch", self.ef_search),
        ];
        for (name, value) in required {
            if value == 0 {
                return Err(KnnError::InvalidConfiguration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.m > MAX_M {
            return Err(KnnError::InvalidConfiguration(format!(
                "m must be at most {}, got {}",
                MAX_M, self.m
            )));
        }

        let mut warnings = Vec::new();

        if self.ef_search < DEFAULT_EF_SEARCH {
            warnings.push(format!(
                "efSearch={} is very low; recall will suffer (recommended: at least {})",
                self.ef_search, DEFAULT_EF_SEARCH
            ));
        }

        if self.m > 100 {
            warnings.push(format!(
                "m={} is very large; memory grows with little recall gain (recommended: 16-64)",
                self.m
            ));
        }

        if self.ef_construction < self.m {
            warnings.push(format!(
                "efConstruction={} is below m={}; graph quality will suffer",
                self.ef_construction, self.m
            ));
        }

        if self.normalize && self.metric == MetricKind::Angular {
            warnings.push("normalize is implied by the angular metric".to_string());
        }

        Ok(warnings)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_uses_defaults() {
        let config = IndexConfig::new(16);
        assert_eq!(config.metric, MetricKind::Euclidean);
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
        assert_eq!(config.m, 50);
        assert_eq!(config.ef_construction, 50);
        assert_eq!(config.seed, 42);
        assert_eq!(config.ef_search, 10);
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let config: IndexConfig = serde_yaml::from_str("dimension: 8").unwrap();
        assert_eq!(config, IndexConfig::new(8));
    }

    #[test]
    fn test_parse_camel_case_yaml() {
        let yaml = r#"
metric: cosine
dimension: 128
capacity: 500
m: 16
efConstruction: 200
seed: 7
efSearch: 64
"#;
        let config: IndexConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.metric, MetricKind::Angular);
        assert_eq!(config.dimension, 128);
        assert_eq!(config.ef_construction, 200);
        assert_eq!(config.ef_search, 64);

        let params = config.engine_params();
        assert_eq!(params.capacity, 500);
        assert_eq!(params.m, 16);
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn test_missing_dimension_fails() {
        let result: Result<IndexConfig, _> = serde_yaml::from_str("metric: euclidean");
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        assert!(IndexConfig::new(0).validate().is_err());
        assert!(IndexConfig::new(4).with_capacity(0).validate().is_err());
        assert!(IndexConfig::new(4).with_m(0).validate().is_err());
        assert!(IndexConfig::new(4).with_ef_search(0).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_oversized_m() {
        assert!(IndexConfig::new(4).with_m(256).validate().is_ok());
        let err = IndexConfig::new(4).with_m(300).validate().unwrap_err();
        assert!(matches!(err, KnnError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("at most 256"));
    }

    #[test]
    fn test_validate_warnings() {
        let warnings = IndexConfig::new(4)
            .with_ef_search(4)
            .with_m(120)
            .with_ef_construction(60)
            .validate()
            .unwrap();
        assert_eq!(warnings.len(), 3);
        assert!(warnings[0].contains("efSearch=4"));

        let warnings = IndexConfig::new(4)
            .with_metric(MetricKind::Angular)
            .with_normalize(true)
            .validate()
            .unwrap();
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_from_path() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        fs::write(&path, "metric: innerproduct\ndimension: 3\nefSearch: 20\n").unwrap();

        let config = IndexConfig::from_path(&path).unwrap();
        assert_eq!(config.metric, MetricKind::InnerProduct);
        assert_eq!(config.ef_search, 20);
    }

    #[test]
    fn test_from_path_missing() {
        let temp = TempDir::new().unwrap();
        let result = IndexConfig::from_path(&temp.path().join("absent.yaml"));
        assert!(matches!(result, Err(KnnError::ConfigNotFound(_))));
    }

    #[test]
    fn test_from_path_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");

        fs::write(&path, "dimension: [not, a, number]").unwrap();
        assert!(matches!(
            IndexConfig::from_path(&path),
            Err(KnnError::InvalidConfiguration(_))
        ));

        fs::write(&path, "dimension: 4\ncapacity: 0\n").unwrap();
        assert!(matches!(
            IndexConfig::from_path(&path),
            Err(KnnError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_default_path_layout() {
        if let Some(path) = IndexConfig::default_path() {
            assert!(path.ends_with(".knnidx/config.yaml"));
        }
    }
}
