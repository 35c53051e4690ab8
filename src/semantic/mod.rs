//! Multimodal similarity ranking.
//!
//! # Architecture
//!
//! - `vector`: Cosine similarity over plain `f32` slices
//! - `embeddings`: Encoder traits and the fastembed-backed implementations
//! - `registry`: Active encoder references, swapped on model activation
//! - `ranker`: Per-modality top-k ranking
//! - `hybrid`: Weighted fusion of text and image rankings
//! - `service`: The recommendation orchestrator

pub mod embeddings;
pub mod hybrid;
pub mod ranker;
pub mod registry;
mod service;
pub mod vector;

pub use embeddings::{EncodingError, ImageEncoder, TextEncoder};
pub use registry::{ActiveModels, EncoderLoader, EncoderRegistry, FastEmbedLoader};
pub use service::{Query, Recommender};
