//! Trait seams for the model provider. The pipeline depends on these, never
//! on a concrete client, so tests can script responses without HTTP.

use anyhow::Result;
use async_trait::async_trait;

/// Token counts reported by the provider for one call. Providers that omit
/// usage report zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A chat completion plus the usage it cost.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub text: String,
    pub usage: TokenUsage,
}

/// An embedding vector plus the usage it cost.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Model name, recorded on usage logs.
    fn model(&self) -> &str;

    async fn generate(&self, system: &str, user: &str) -> Result<GeneratedText>;
}

#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Model name, recorded on usage logs.
    fn model(&self) -> &str;

    async fn embed(&self, text: &str) -> Result<Embedded>;
}
