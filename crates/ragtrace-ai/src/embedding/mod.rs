//! Text embedding providers

pub mod openai;
pub mod provider;

pub use openai::OpenAIEmbedding;
pub use provider::{EmbeddingConfig, EmbeddingProvider};
