//! First-stage pipeline: fetch, deduplicate and persist posts for every
//! configured channel.
//!
//! Channels are processed sequentially to respect the platform's rate
//! limits. A channel's failure is contained to that channel; the run
//! carries on and reports aggregate counters.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Duration;
use reddit_client::SortMode;
use tracing::{error, info, warn};

use threadlens_common::types::{Channel, NewPost, PLATFORM_REDDIT};
use threadlens_common::ThreadlensError;

use crate::dedup;
use crate::embedding::EmbeddingClient;
use crate::fetcher::ChannelFetcher;
use crate::traits::ContentStore;

/// Business tag on usage rows written during ingestion embedding.
pub const INGEST_BUSINESS: &str = "post_ingest";

/// Advisory lock name for this pipeline.
pub const INGEST_LOCK: &str = "ingestion";

/// A lock left behind by a crashed run is taken over after this long.
const LOCK_STALE_MINUTES: i64 = 30;

#[derive(Debug, Default)]
pub struct IngestStats {
    pub channels: u32,
    pub channels_failed: u32,
    pub fetched: usize,
    pub duplicates: usize,
    pub inserted: u64,
    pub embed_skipped: usize,
}

impl std::fmt::Display for IngestStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Ingestion Run Complete ===")?;
        writeln!(f, "Channels:        {}", self.channels)?;
        writeln!(f, "Channels failed: {}", self.channels_failed)?;
        writeln!(f, "Posts fetched:   {}", self.fetched)?;
        writeln!(f, "Duplicates:      {}", self.duplicates)?;
        writeln!(f, "Rows inserted:   {}", self.inserted)?;
        if self.embed_skipped > 0 {
            writeln!(f, "Embed skipped:   {}", self.embed_skipped)?;
        }
        Ok(())
    }
}

pub struct IngestionPipeline {
    store: Arc<dyn ContentStore>,
    fetcher: ChannelFetcher,
    embeddings: EmbeddingClient,
    per_channel_limit: u32,
    embed_on_ingest: bool,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ContentStore>,
        fetcher: ChannelFetcher,
        embeddings: EmbeddingClient,
        per_channel_limit: u32,
        embed_on_ingest: bool,
    ) -> Self {
        Self {
            store,
            fetcher,
            embeddings,
            per_channel_limit,
            embed_on_ingest,
        }
    }

    /// Run one full ingestion cycle under the advisory lock. Safe to invoke
    /// repeatedly: conflict-ignore on `external_id` makes re-runs no-ops for
    /// already-stored posts.
    pub async fn run(&self) -> std::result::Result<IngestStats, ThreadlensError> {
        let acquired = self
            .store
            .try_acquire_run_lock(INGEST_LOCK, Duration::minutes(LOCK_STALE_MINUTES))
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;
        if !acquired {
            return Err(ThreadlensError::RunLockConflict(INGEST_LOCK.to_string()));
        }

        let result = self.run_inner().await;

        // Always release, even when the run failed.
        if let Err(e) = self.store.release_run_lock(INGEST_LOCK).await {
            error!(error = %e, "Failed to release ingestion lock");
        }

        result
    }

    async fn run_inner(&self) -> std::result::Result<IngestStats, ThreadlensError> {
        let mut stats = IngestStats::default();

        let mut channels = self
            .store
            .distinct_channels(PLATFORM_REDDIT)
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;

        // Paranoia against duplicate rows: one pass per distinct path.
        let mut seen = HashSet::new();
        channels.retain(|c| seen.insert(c.path.clone()));

        if channels.is_empty() {
            info!("No channels configured, nothing to ingest");
            return Ok(stats);
        }

        info!(channels = channels.len(), "Starting ingestion run");

        for channel in &channels {
            stats.channels += 1;
            match self.ingest_channel(channel, &mut stats).await {
                Ok(()) => {}
                Err(e) => {
                    warn!(channel = %channel.path, error = %e, "Channel ingest failed, continuing");
                    stats.channels_failed += 1;
                }
            }
        }

        info!("{stats}");
        Ok(stats)
    }

    async fn ingest_channel(
        &self,
        channel: &Channel,
        stats: &mut IngestStats,
    ) -> std::result::Result<(), ThreadlensError> {
        let fetched = self
            .fetcher
            .fetch_channel(channel, SortMode::New, self.per_channel_limit)
            .await?;
        let fetched_count = fetched.len();
        stats.fetched += fetched_count;

        let fresh = dedup::filter_new(self.store.as_ref(), fetched)
            .await
            .map_err(|e| ThreadlensError::Database(e.to_string()))?;
        stats.duplicates += fetched_count - fresh.len();

        let fresh = if self.embed_on_ingest {
            self.embed_posts(fresh, stats).await
        } else {
            fresh
        };

        let outcome = dedup::persist_posts(self.store.as_ref(), &fresh).await;
        stats.inserted += outcome.inserted;

        info!(
            channel = %channel.path,
            fetched = fetched_count,
            new = outcome.attempted,
            inserted = outcome.inserted,
            "Channel ingested"
        );
        Ok(())
    }

    /// Populate embeddings from title+body. A post whose embedding fails is
    /// dropped from the batch rather than inserted without its vector.
    async fn embed_posts(&self, posts: Vec<NewPost>, stats: &mut IngestStats) -> Vec<NewPost> {
        let mut embedded = Vec::with_capacity(posts.len());
        for mut post in posts {
            let text = match &post.body {
                Some(body) => format!("{}\n\n{}", post.title, body),
                None => post.title.clone(),
            };
            match self.embeddings.embed(INGEST_BUSINESS, None, &text).await {
                Ok(vector) => {
                    post.embedding = Some(vector);
                    embedded.push(post);
                }
                Err(e) => {
                    warn!(external_id = %post.external_id, error = %e, "Embedding failed, skipping post");
                    stats.embed_skipped += 1;
                }
            }
        }
        embedded
    }
}
