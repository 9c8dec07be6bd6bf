//! Scheduler entrypoints. An external timer calls `run_ingestion` and
//! `run_analysis` with a deps bundle; everything they don't recover from
//! internally surfaces as a single error for the caller to log and drop.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use threadlens_common::model::{TextEmbedder, TextGenerator};

use crate::analysis::{AnalysisPipeline, AnalysisStats, ANALYSIS_BUSINESS};
use crate::credit::CreditAccountant;
use crate::embedding::EmbeddingClient;
use crate::fetcher::ChannelFetcher;
use crate::ingest::{IngestStats, IngestionPipeline};
use crate::token::TokenManager;
use crate::traits::{ContentStore, PlatformAuth, PlatformListing};

/// Everything the pipelines need, behind their trait seams.
pub struct PipelineDeps {
    pub store: Arc<dyn ContentStore>,
    pub auth: Arc<dyn PlatformAuth>,
    pub listing: Arc<dyn PlatformListing>,
    pub generator: Arc<dyn TextGenerator>,
    pub embedder: Arc<dyn TextEmbedder>,
    pub redirect_uri: String,
    pub per_channel_limit: u32,
    pub embed_on_ingest: bool,
}

impl PipelineDeps {
    pub fn token_manager(&self) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            self.store.clone(),
            self.auth.clone(),
            self.redirect_uri.clone(),
        ))
    }
}

/// One ingestion cycle: fetch, dedup and persist every configured channel.
pub async fn run_ingestion(deps: &PipelineDeps) -> Result<IngestStats> {
    let fetcher = ChannelFetcher::new(deps.listing.clone(), deps.token_manager());
    let embeddings = EmbeddingClient::new(deps.embedder.clone(), deps.store.clone());
    let pipeline = IngestionPipeline::new(
        deps.store.clone(),
        fetcher,
        embeddings,
        deps.per_channel_limit,
        deps.embed_on_ingest,
    );
    Ok(pipeline.run().await?)
}

/// One analysis cycle over all users, then a best-effort refresh of credit
/// balances from the usage rows the cycle appended.
pub async fn run_analysis(deps: &PipelineDeps) -> Result<AnalysisStats> {
    let pipeline = AnalysisPipeline::new(deps.store.clone(), deps.generator.clone());
    let stats = pipeline.run(None).await?;

    let accountant = CreditAccountant::new(deps.store.clone());
    if let Err(e) = accountant.recompute(ANALYSIS_BUSINESS).await {
        warn!(error = %e, "Credit recomputation failed; balances catch up next run");
    }

    Ok(stats)
}
