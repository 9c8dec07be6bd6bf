//! Usage-logged wrapper around the embedding model. Every call writes one
//! usage row, success or failure, before the caller sees the result.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use uuid::Uuid;

use threadlens_common::model::TextEmbedder;

use crate::traits::ContentStore;
use crate::usage::UsageTracker;

pub struct EmbeddingClient {
    embedder: Arc<dyn TextEmbedder>,
    usage: UsageTracker,
}

impl EmbeddingClient {
    pub fn new(embedder: Arc<dyn TextEmbedder>, store: Arc<dyn ContentStore>) -> Self {
        Self {
            embedder,
            usage: UsageTracker::new(store),
        }
    }

    /// Embed one text, logging usage under the given business tag. The
    /// underlying error propagates after the failure row is written; callers
    /// decide whether one failed embedding sinks their batch.
    pub async fn embed(
        &self,
        business: &str,
        user_id: Option<Uuid>,
        text: &str,
    ) -> Result<Vec<f32>> {
        let model = self.embedder.model().to_string();
        let started = Instant::now();
        let result = self.embedder.embed(text).await;
        let duration_ms = started.elapsed().as_millis() as i64;

        match result {
            Ok(embedded) => {
                self.usage
                    .record_success(business, user_id, &model, embedded.usage, duration_ms)
                    .await;
                Ok(embedded.vector)
            }
            Err(e) => {
                self.usage
                    .record_failure(business, user_id, &model, &e.to_string(), duration_ms)
                    .await;
                Err(e)
            }
        }
    }
}
