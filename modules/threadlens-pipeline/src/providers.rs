//! Concrete model providers: thin wrappers mapping the OpenAI-compatible
//! client onto the `TextGenerator` / `TextEmbedder` seams.

use ai_client::OpenAi;
use anyhow::Result;
use async_trait::async_trait;

use threadlens_common::model::{Embedded, GeneratedText, TextEmbedder, TextGenerator, TokenUsage};

fn map_usage(usage: ai_client::Usage) -> TokenUsage {
    TokenUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Chat-completion provider for the analysis worker.
pub struct ChatProvider {
    client: OpenAi,
}

impl ChatProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: OpenAi::new(api_key, model),
        }
    }
}

#[async_trait]
impl TextGenerator for ChatProvider {
    fn model(&self) -> &str {
        self.client.model()
    }

    async fn generate(&self, system: &str, user: &str) -> Result<GeneratedText> {
        let completion = self.client.chat_completion(system, user).await?;
        Ok(GeneratedText {
            text: completion.text,
            usage: map_usage(completion.usage),
        })
    }
}

/// Embedding provider for post vectors.
pub struct EmbeddingProvider {
    client: OpenAi,
}

impl EmbeddingProvider {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            client: OpenAi::new(api_key, model).with_embedding_model(model),
        }
    }
}

#[async_trait]
impl TextEmbedder for EmbeddingProvider {
    fn model(&self) -> &str {
        self.client.embedding_model()
    }

    async fn embed(&self, text: &str) -> Result<Embedded> {
        let embedding = self.client.embed(text).await?;
        Ok(Embedded {
            vector: embedding.vector,
            usage: map_usage(embedding.usage),
        })
    }
}
