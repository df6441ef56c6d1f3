//! Retriever configuration.
//!
//! Resolution order, later wins:
//!
//! 1. Built-in defaults.
//! 2. `<config_dir>/retriever.toml` (or the file passed with `--config`).
//! 3. `RETRIEVER_*` environment variables (a `.env` file is honored).
//! 4. Command-line flags, applied by the caller.
//!
//! # Example
//!
//! ```toml
//! cache_dir = "/var/cache/retriever"
//! batch_size = 64
//! corpus_chunk_size = 20000
//! show_progress = false
//! score_function = "dot"
//! top_k = 5
//! embedder_dimension = 256
//! quantization = "f16"
//! ```

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::search::cache::Quantization;
use crate::search::encoder::DEFAULT_CHUNK_SIZE;
use crate::search::hash_embedder::DEFAULT_DIMENSION;
use crate::search::ranker::ScoreFunction;

pub const CONFIG_FILE_NAME: &str = "retriever.toml";

/// Errors that can occur when working with configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Invalid configuration: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Root of the corpus embedding cache. Defaults to the platform cache dir.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Texts per model invocation.
    pub batch_size: usize,

    /// Documents per provider call during corpus encoding.
    pub corpus_chunk_size: usize,

    pub show_progress: bool,

    pub score_function: ScoreFunction,

    pub top_k: usize,

    /// Output dimension of the built-in hash embedder.
    pub embedder_dimension: usize,

    /// Storage precision of cached corpus matrices.
    pub quantization: Quantization,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            batch_size: 128,
            corpus_chunk_size: DEFAULT_CHUNK_SIZE,
            show_progress: true,
            score_function: ScoreFunction::CosSim,
            top_k: 10,
            embedder_dimension: DEFAULT_DIMENSION,
            quantization: Quantization::F32,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "dense-retriever", "retriever")
}

impl RetrieverConfig {
    /// Load from the default location, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load from `path` (missing file → defaults), then apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::config_path()?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf, ConfigError> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Effective cache root: `cache_dir` if set, else the platform cache dir.
    pub fn cache_root(&self) -> Result<PathBuf, ConfigError> {
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.cache_dir().join("corpus_embeddings"))
            .ok_or(ConfigError::NoConfigDir)
    }

    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(dir) = dotenvy::var("RETRIEVER_CACHE_DIR")
            && !dir.trim().is_empty()
        {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = env_usize("RETRIEVER_BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = env_usize("RETRIEVER_CHUNK_SIZE")? {
            self.corpus_chunk_size = v;
        }
        if let Some(v) = env_usize("RETRIEVER_EMBEDDER_DIM")? {
            self.embedder_dimension = v;
        }
        if let Ok(raw) = dotenvy::var("RETRIEVER_SCORE_FUNCTION") {
            self.score_function = raw
                .trim()
                .parse()
                .map_err(|e: crate::search::ranker::InvalidScoreFunction| {
                    ConfigError::Validation(e.to_string())
                })?;
        }
        if let Ok(raw) = dotenvy::var("RETRIEVER_QUANTIZATION") {
            self.quantization = raw
                .parse()
                .map_err(|e: anyhow::Error| ConfigError::Validation(e.to_string()))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Validation("batch_size must be at least 1".into()));
        }
        if self.corpus_chunk_size == 0 {
            return Err(ConfigError::Validation(
                "corpus_chunk_size must be at least 1".into(),
            ));
        }
        if self.embedder_dimension == 0 {
            return Err(ConfigError::Validation(
                "embedder_dimension must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match dotenvy::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("{key}: expected an integer, got {raw:?}"))),
        Err(_) => Ok(None),
    }
}
