//! Concrete embedding and summarization providers.
//!
//! [`HashEmbedder`] and [`ExtractiveSummarizer`] need no I/O and are the
//! defaults. The model-backed embedders sit behind cargo features.

mod extractive;
#[cfg(feature = "embeddings")]
mod local;
mod hashing;
#[cfg(feature = "http-embeddings")]
mod http;

pub use extractive::ExtractiveSummarizer;
#[cfg(feature = "embeddings")]
pub use local::{FASTEMBED_DIMENSION, FastEmbedder};
pub use hashing::HashEmbedder;
#[cfg(feature = "http-embeddings")]
pub use http::HttpEmbedder;

use std::sync::Arc;

use mnemo_core::EmbeddingProvider;

use crate::config::{EmbedderKind, MnemoConfig};
use crate::error::{SdkError, SdkResult};

/// Build the embedder selected in the configuration.
pub fn embedder_from_config(config: &MnemoConfig) -> SdkResult<Arc<dyn EmbeddingProvider>> {
    let dimension = config.store.embedding_dimension;
    match config.providers.embedder {
        EmbedderKind::Hash => Ok(Arc::new(HashEmbedder::new(dimension))),
        #[cfg(feature = "embeddings")]
        EmbedderKind::Fastembed => {
            if dimension != FASTEMBED_DIMENSION {
                return Err(SdkError::validation(format!(
                    "fastembed produces {} dimensions, store is configured for {}",
                    FASTEMBED_DIMENSION, dimension
                )));
            }
            Ok(Arc::new(FastEmbedder::new()))
        }
        #[cfg(not(feature = "embeddings"))]
        EmbedderKind::Fastembed => Err(SdkError::invalid_operation(
            "fastembed embedder requires the `embeddings` feature",
        )),
        #[cfg(feature = "http-embeddings")]
        EmbedderKind::Http => Ok(Arc::new(HttpEmbedder::from_config(
            &config.providers.http,
            dimension,
            config.providers.limits.call_timeout_ms,
        )?)),
        #[cfg(not(feature = "http-embeddings"))]
        EmbedderKind::Http => Err(SdkError::invalid_operation(
            "http embedder requires the `http-embeddings` feature",
        )),
    }
}
