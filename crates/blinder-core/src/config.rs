use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_THRESHOLD: f32 = 0.75;
pub const DEFAULT_MIN_SIZE: u32 = 0;
pub const DEFAULT_EMBED_CONCURRENCY: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("threshold must be finite and non-negative, got {0}")]
    InvalidThreshold(f32),
    #[error("embed_concurrency must be at least 1")]
    InvalidConcurrency,
}

/// Engine configuration. Built once and handed to
/// [`FaceBlinder::open`](crate::FaceBlinder::open); the engine only reads it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding face images and all key-value stores.
    pub workdir: PathBuf,
    /// Maximum embedding distance at which two faces count as the same person.
    pub threshold: f32,
    /// Faces narrower than this (in pixels) are ignored.
    pub min_size: u32,
    /// Maximum embeddings computed concurrently for one photo.
    pub embed_concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            threshold: DEFAULT_THRESHOLD,
            min_size: DEFAULT_MIN_SIZE,
            embed_concurrency: DEFAULT_EMBED_CONCURRENCY,
        }
    }
}

impl Config {
    /// Defaults rooted at the given work directory.
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            ..Self::default()
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn with_embed_concurrency(mut self, n: usize) -> Self {
        self.embed_concurrency = n;
        self
    }

    /// Load configuration from `BLINDER_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let workdir = std::env::var("BLINDER_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_workdir());

        Self {
            workdir,
            threshold: env_parse("BLINDER_THRESHOLD", DEFAULT_THRESHOLD),
            min_size: env_parse("BLINDER_MIN_SIZE", DEFAULT_MIN_SIZE),
            embed_concurrency: env_parse("BLINDER_EMBED_CONCURRENCY", DEFAULT_EMBED_CONCURRENCY),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(src: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(src)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        if self.embed_concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency);
        }
        Ok(())
    }
}

fn default_workdir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("face-blinder")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
