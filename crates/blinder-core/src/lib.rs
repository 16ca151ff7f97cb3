//! blinder-core — Face memory and identity resolution.
//!
//! Stores detected faces by the hash of their pixels, caches detection and
//! embedding results, and resolves identities by voting among labeled
//! neighbors within a distance threshold.

pub mod alignment;
pub mod blinder;
pub mod config;
pub mod detector;
pub mod digest;
pub mod embedder;
pub mod embedding;
pub mod error;
pub mod face_store;
pub mod name_store;
pub mod neighbors;
pub mod recognizer;
pub mod store;
pub mod types;

pub use blinder::FaceBlinder;
pub use config::Config;
pub use detector::{DetectedFace, Detector, DetectorError, WholeImageDetector};
pub use embedder::{Embedder, EmbedderError, ThumbnailEmbedder};
pub use error::BlinderError;
pub use neighbors::{LinearScan, Neighbor, NeighborIndex};
pub use recognizer::{LogCountScorer, Scorer};
pub use types::{Embedding, FaceRecord, Rectangle};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
