mod client;
pub(crate) mod types;

pub use types::Usage;

use anyhow::{anyhow, Result};

use client::OpenAiClient;
use types::*;

/// A chat completion and the usage the provider billed for it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// An embedding vector and the usage the provider billed for it.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub usage: Usage,
}

/// OpenAI-compatible model handle. Also speaks to compatible gateways
/// (set a base URL pointing at them).
#[derive(Clone)]
pub struct OpenAi {
    api_key: String,
    model: String,
    embedding_model: String,
    base_url: Option<String>,
}

impl OpenAi {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        let model = model.into();
        Self {
            api_key: api_key.into(),
            embedding_model: model.clone(),
            model,
            base_url: None,
        }
    }

    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        Ok(Self::new(api_key, model))
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_embedding_model(mut self, model: impl Into<String>) -> Self {
        self.embedding_model = model.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    fn client(&self) -> OpenAiClient {
        let client = OpenAiClient::new(&self.api_key);
        if let Some(ref url) = self.base_url {
            client.with_base_url(url)
        } else {
            client
        }
    }

    /// One-shot chat completion with a system and a user message.
    pub async fn chat_completion(&self, system: &str, user: &str) -> Result<Completion> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            max_tokens: Some(1024),
            temperature: Some(0.0),
        };

        let response = self.client().chat(&request).await?;
        let usage = response.usage.unwrap_or_default();

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("no completion in response"))?;

        Ok(Completion { text, usage })
    }

    /// Embed a single text.
    pub async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: text.to_string(),
        };

        let response = self.client().embed(&request).await?;
        let usage = response.usage.unwrap_or_default();

        let data = response
            .data
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no embedding in response"))?;
        let vector = flatten_embedding(&data.embedding)?;

        Ok(Embedding { vector, usage })
    }
}
