//! Set-based deduplication against the store, plus chunked best-effort
//! persistence with conflict-ignore semantics.

use anyhow::Result;
use tracing::{info, warn};

use threadlens_common::types::NewPost;

use crate::traits::ContentStore;

/// Rows per bulk insert.
pub const INSERT_CHUNK_SIZE: usize = 50;

/// Drop candidates whose `external_id` is already stored. One store round
/// trip; the order of the surviving items is preserved.
pub async fn filter_new(store: &dyn ContentStore, posts: Vec<NewPost>) -> Result<Vec<NewPost>> {
    if posts.is_empty() {
        return Ok(posts);
    }

    let ids: Vec<String> = posts.iter().map(|p| p.external_id.clone()).collect();
    let existing = store.existing_external_ids(&ids).await?;
    if existing.is_empty() {
        return Ok(posts);
    }

    let before = posts.len();
    let fresh: Vec<NewPost> = posts
        .into_iter()
        .filter(|p| !existing.contains(&p.external_id))
        .collect();
    info!(skipped = before - fresh.len(), kept = fresh.len(), "Deduplicated batch");
    Ok(fresh)
}

#[derive(Debug, Default)]
pub struct PersistOutcome {
    pub attempted: usize,
    pub inserted: u64,
}

/// Insert posts in chunks. Conflicts on `external_id` are no-ops, so a
/// duplicate slipping through a race is harmless. A failed bulk chunk is
/// retried row by row so one poison row cannot sink its chunk, and a failed
/// chunk never blocks the chunks after it. The returned count is what the
/// store actually accepted.
pub async fn persist_posts(store: &dyn ContentStore, posts: &[NewPost]) -> PersistOutcome {
    let mut outcome = PersistOutcome {
        attempted: posts.len(),
        inserted: 0,
    };

    for chunk in posts.chunks(INSERT_CHUNK_SIZE) {
        match store.insert_posts_ignore_conflicts(chunk).await {
            Ok(n) => outcome.inserted += n,
            Err(e) => {
                warn!(
                    chunk_len = chunk.len(),
                    error = %e,
                    "Bulk insert failed, retrying rows individually"
                );
                for post in chunk {
                    match store
                        .insert_posts_ignore_conflicts(std::slice::from_ref(post))
                        .await
                    {
                        Ok(n) => outcome.inserted += n,
                        Err(e) => {
                            warn!(external_id = %post.external_id, error = %e, "Row insert failed, skipping");
                        }
                    }
                }
            }
        }
    }

    outcome
}
