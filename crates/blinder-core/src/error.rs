use crate::config::ConfigError;
use crate::detector::DetectorError;
use crate::embedder::EmbedderError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlinderError {
    #[error("detection failed: {0}")]
    DetectionFailed(#[from] DetectorError),
    #[error("embedding failed for face {id}: {source}")]
    EmbeddingFailed {
        id: String,
        source: EmbedderError,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
