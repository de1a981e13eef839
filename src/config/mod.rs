//! Configuration management for Leibniz
//!
//! Loads the TOML configuration file, applies profile and environment
//! overrides, and validates the result before anything is built from it.

use crate::error::{LeibnizError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub fusion: FusionSettings,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default = "default_profiles")]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.leibniz"),
        }
    }
}

/// Request limits and the fan-out latency budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Result count used when the request does not name one
    pub default_limit: usize,
    /// Largest result count a request may ask for
    pub max_limit: usize,
    /// Longest accepted query text, in characters
    pub max_query_chars: usize,
    /// Fan-out deadline used when the request does not override it
    pub deadline_ms: u64,
    /// Largest deadline a request may ask for
    pub max_deadline_ms: u64,
    /// Per-call timeout enforced inside each adapter
    pub backend_timeout_ms: u64,
    /// Adapters fetch `limit * candidate_multiplier` candidates
    pub candidate_multiplier: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 20,
            max_limit: 100,
            max_query_chars: 500,
            deadline_ms: 200,
            max_deadline_ms: 10_000,
            backend_timeout_ms: 150,
            candidate_multiplier: 3,
        }
    }
}

/// Fusion method and per-backend weight table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionSettings {
    /// "weighted" or "reciprocal_rank"
    pub method: String,
    /// RRF K constant (typically 60)
    pub rrf_k: f32,
    /// Weight for backends missing from the table
    pub default_weight: f32,
    pub weights: BTreeMap<String, f32>,
}

impl Default for FusionSettings {
    fn default() -> Self {
        let weights = [("vector", 1.0), ("graph", 0.8), ("keyword", 0.6)]
            .into_iter()
            .map(|(name, weight)| (name.to_string(), weight))
            .collect();

        Self {
            method: "weighted".to_string(),
            rrf_k: 60.0,
            default_weight: 0.5,
            weights,
        }
    }
}

/// Two-tier result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum entries held by the in-process tier
    pub local_capacity: u64,
    pub ttl_secs: u64,
    /// TTL for fingerprints whose fused list came back empty
    pub empty_ttl_secs: u64,
    pub cache_empty_results: bool,
    /// Shared tier backend: "sqlite", "memory" or "none"
    pub shared: String,
    /// SQLite file for the shared tier (defaults to `<data_dir>/cache.sqlite`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_path: Option<PathBuf>,
    /// Shared-tier values at least this many bytes are zstd-compressed
    pub compression_threshold: usize,
    /// Upper bound on any single shared-tier call; expiry counts as a miss
    #[serde(default = "default_shared_timeout_ms")]
    pub shared_timeout_ms: u64,
}

fn default_shared_timeout_ms() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_capacity: 10_000,
            ttl_secs: 3600,
            empty_ttl_secs: 300,
            cache_empty_results: true,
            shared: "sqlite".to_string(),
            shared_path: None,
            compression_threshold: 1024,
            shared_timeout_ms: default_shared_timeout_ms(),
        }
    }
}

/// Reference backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    pub vector: bool,
    pub graph: bool,
    pub keyword: bool,
    /// JSON paper collection; the built-in demo collection is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<PathBuf>,
    pub vector_dim: usize,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    /// Score multiplier applied per citation hop
    pub graph_hop_decay: f32,
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            vector: true,
            graph: true,
            keyword: true,
            corpus_path: None,
            vector_dim: 256,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            graph_hop_decay: 0.5,
        }
    }
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fusion_method: Option<String>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LeibnizError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| LeibnizError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| LeibnizError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| LeibnizError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(deadline_ms) = overrides.deadline_ms {
            self.search.deadline_ms = deadline_ms;
            self.clamp_backend_timeout();
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = enabled;
        }
        if let Some(method) = overrides.fusion_method {
            self.fusion.method = method;
        }
        Ok(())
    }

    /// Adapters may not outlive a shortened fan-out deadline
    fn clamp_backend_timeout(&mut self) {
        self.search.backend_timeout_ms =
            self.search.backend_timeout_ms.min(self.search.deadline_ms);
    }

    /// Apply environment variable overrides
    /// Environment variables in format: LEIBNIZ_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    /// Apply `LEIBNIZ_`-prefixed overrides from an arbitrary variable source
    pub fn apply_overrides<I>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut deadline_set = false;
        let mut backend_timeout_set = false;
        for (key, value) in vars {
            let Some(config_key) = key.strip_prefix("LEIBNIZ_") else {
                continue;
            };
            match self.set_value_from_env(config_key, &value) {
                Ok(()) => match config_key {
                    "SEARCH__DEADLINE_MS" | "QUERY_TIMEOUT_MS" => deadline_set = true,
                    "SEARCH__BACKEND_TIMEOUT_MS" => backend_timeout_set = true,
                    _ => {}
                },
                Err(e) => tracing::warn!("Failed to apply env override {}: {}", key, e),
            }
        }

        // An explicit backend timeout is left for validation to judge
        if deadline_set && !backend_timeout_set {
            self.clamp_backend_timeout();
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "SEARCH__DEADLINE_MS" | "QUERY_TIMEOUT_MS" => {
                self.search.deadline_ms = parse_value(path, value)?;
            }
            "SEARCH__BACKEND_TIMEOUT_MS" => {
                self.search.backend_timeout_ms = parse_value(path, value)?;
            }
            "SEARCH__DEFAULT_LIMIT" => {
                self.search.default_limit = parse_value(path, value)?;
            }
            "CACHE__ENABLED" => {
                self.cache.enabled = parse_value(path, value)?;
            }
            "CACHE__TTL_SECS" | "CACHE_TTL_SECONDS" => {
                self.cache.ttl_secs = parse_value(path, value)?;
            }
            "CACHE__SHARED" => {
                self.cache.shared = value.to_string();
            }
            "FUSION__METHOD" => {
                self.fusion.method = value.to_string();
            }
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "BACKENDS__CORPUS_PATH" => {
                self.backends.corpus_path = Some(PathBuf::from(value));
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Resolved location of the SQLite shared cache tier
    pub fn shared_cache_path(&self) -> Result<PathBuf> {
        match &self.cache.shared_path {
            Some(path) => expand_tilde(path),
            None => Ok(expand_tilde(&self.storage.data_dir)?.join("cache.sqlite")),
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| LeibnizError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("leibniz").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| LeibnizError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".leibniz"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            meta: MetaConfig {
                schema_version: "1.0.0".to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            search: SearchConfig::default(),
            fusion: FusionSettings::default(),
            cache: CacheConfig::default(),
            backends: BackendsConfig::default(),
            profiles: default_profiles(),
        }
    }
}

fn default_profiles() -> HashMap<String, ProfileOverrides> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "fast".to_string(),
        ProfileOverrides {
            deadline_ms: Some(100),
            cache_enabled: None,
            fusion_method: None,
        },
    );
    profiles
}

fn parse_value<T: FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| LeibnizError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_tilde(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| LeibnizError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| LeibnizError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
