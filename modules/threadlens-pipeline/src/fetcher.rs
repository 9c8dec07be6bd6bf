//! Paginated channel fetcher.
//!
//! Walks a channel listing with the platform's `after` cursor, staying under
//! rate limits with a randomized pre-request jitter. Failure policy per page:
//! 401 refreshes the token and retries once; transport errors back off and
//! retry a bounded number of times; anything else abandons the channel,
//! keeping the items already accumulated.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rand::Rng;
use tracing::{debug, warn};

use reddit_client::{ListingPage, RedditError, SortMode, ThingData};
use threadlens_common::types::{Channel, NewPost, PostMetrics};
use threadlens_common::ThreadlensError;

use crate::token::TokenManager;
use crate::traits::PlatformListing;

const PAGE_SIZE: u32 = 100;
const NETWORK_BACKOFF: Duration = Duration::from_secs(5);
const MAX_NETWORK_RETRIES: u32 = 3;
const JITTER_MS: std::ops::RangeInclusive<u64> = 1000..=3000;

pub struct ChannelFetcher {
    listing: Arc<dyn PlatformListing>,
    tokens: Arc<TokenManager>,
}

impl ChannelFetcher {
    pub fn new(listing: Arc<dyn PlatformListing>, tokens: Arc<TokenManager>) -> Self {
        Self { listing, tokens }
    }

    /// Fetch up to `limit` posts from a channel. Page-level failures abandon
    /// the walk but keep what was already accumulated; only the inability to
    /// obtain any access token at all is an error.
    pub async fn fetch_channel(
        &self,
        channel: &Channel,
        sort: SortMode,
        limit: u32,
    ) -> std::result::Result<Vec<NewPost>, ThreadlensError> {
        let mut token = self.tokens.valid_access_token().await?;

        let mut collected: Vec<NewPost> = Vec::new();
        let mut after: Option<String> = None;

        while (collected.len() as u32) < limit {
            let wait_ms = rand::rng().random_range(JITTER_MS);
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;

            let page_limit = PAGE_SIZE.min(limit - collected.len() as u32);
            let page = match self
                .page_with_retry(&mut token, &channel.path, sort, after.as_deref(), page_limit)
                .await
            {
                Ok(p) => p,
                Err(e) => {
                    warn!(
                        channel = %channel.path,
                        collected = collected.len(),
                        error = %e,
                        "Abandoning channel fetch, keeping partial results"
                    );
                    break;
                }
            };

            if page.items.is_empty() {
                break;
            }

            debug!(channel = %channel.path, items = page.items.len(), "Fetched listing page");
            collected.extend(page.items.into_iter().map(|t| map_thing(channel, t)));

            match page.after {
                Some(cursor) => after = Some(cursor),
                None => break, // end of listing
            }
        }

        Ok(collected)
    }

    /// Fetch one page, absorbing the recoverable failure modes: one token
    /// refresh on 401, bounded fixed backoff on transport errors.
    async fn page_with_retry(
        &self,
        token: &mut String,
        path: &str,
        sort: SortMode,
        after: Option<&str>,
        limit: u32,
    ) -> std::result::Result<ListingPage, ThreadlensError> {
        let mut refreshed = false;
        let mut network_retries = 0u32;

        loop {
            match self.listing.page(token, path, sort, after, limit).await {
                Ok(page) => return Ok(page),
                Err(RedditError::Unauthorized) if !refreshed => {
                    warn!(channel = path, "Access token rejected, refreshing");
                    let fresh = self.tokens.refresh(token.as_str()).await?;
                    *token = fresh;
                    refreshed = true;
                }
                Err(RedditError::Unauthorized) => {
                    return Err(ThreadlensError::Api {
                        status: 401,
                        message: "access token rejected after refresh".to_string(),
                    });
                }
                Err(RedditError::Network(e)) if network_retries < MAX_NETWORK_RETRIES => {
                    network_retries += 1;
                    warn!(
                        channel = path,
                        attempt = network_retries,
                        error = %e,
                        "Network error, backing off"
                    );
                    tokio::time::sleep(NETWORK_BACKOFF).await;
                }
                Err(RedditError::Network(e)) => return Err(ThreadlensError::Network(e)),
                Err(RedditError::Api { status, message }) => {
                    return Err(ThreadlensError::Api { status, message });
                }
                Err(RedditError::Parse(e)) => return Err(ThreadlensError::MalformedResponse(e)),
            }
        }
    }
}

/// Map a wire thing into the insert shape.
fn map_thing(channel: &Channel, thing: ThingData) -> NewPost {
    let external_id = if thing.name.is_empty() {
        thing.id.clone()
    } else {
        thing.name.clone()
    };

    let permalink = if thing.permalink.starts_with('/') {
        format!("https://www.reddit.com{}", thing.permalink)
    } else {
        thing.permalink.clone()
    };

    let body = if thing.selftext.trim().is_empty() {
        None
    } else {
        Some(thing.selftext.clone())
    };

    NewPost {
        external_id,
        channel_id: Some(channel.id),
        title: thing.title,
        body,
        url: thing.url,
        permalink,
        author: thing.author,
        metrics: PostMetrics {
            upvotes: thing.ups,
            downvotes: thing.downs,
            score: thing.score,
            comment_count: thing.num_comments,
        },
        created_at_external: thing.created_utc.and_then(normalize_epoch),
        embedding: None,
    }
}

/// Normalize a source epoch that may be seconds or already milliseconds.
fn normalize_epoch(raw: f64) -> Option<DateTime<Utc>> {
    if !raw.is_finite() || raw <= 0.0 {
        return None;
    }
    // Anything past ~33658 AD as seconds is a millisecond timestamp.
    let millis = if raw >= 1e12 { raw } else { raw * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use uuid::Uuid;

    fn channel() -> Channel {
        Channel {
            id: Uuid::new_v4(),
            name: "rust".to_string(),
            path: "rust".to_string(),
            platform: "reddit".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn epoch_seconds_are_accepted() {
        let ts = normalize_epoch(1_700_000_000.0).unwrap();
        assert_eq!(ts.year(), 2023);
    }

    #[test]
    fn epoch_milliseconds_are_accepted() {
        let ts = normalize_epoch(1_700_000_000_000.0).unwrap();
        assert_eq!(ts.year(), 2023);
    }

    #[test]
    fn bogus_epochs_become_none() {
        assert!(normalize_epoch(0.0).is_none());
        assert!(normalize_epoch(-5.0).is_none());
        assert!(normalize_epoch(f64::NAN).is_none());
        assert!(normalize_epoch(f64::INFINITY).is_none());
    }

    #[test]
    fn mapping_prefers_fullname_and_drops_empty_body() {
        let thing = ThingData {
            id: "abc".to_string(),
            name: "t3_abc".to_string(),
            title: "A post".to_string(),
            selftext: "   ".to_string(),
            permalink: "/r/rust/comments/abc/".to_string(),
            author: "someone".to_string(),
            ups: 3,
            score: 3,
            ..Default::default()
        };

        let post = map_thing(&channel(), thing);
        assert_eq!(post.external_id, "t3_abc");
        assert!(post.body.is_none());
        assert_eq!(post.permalink, "https://www.reddit.com/r/rust/comments/abc/");
        assert_eq!(post.metrics.score, 3);
    }

    #[test]
    fn mapping_falls_back_to_id_without_fullname() {
        let thing = ThingData {
            id: "abc".to_string(),
            selftext: "has a body".to_string(),
            ..Default::default()
        };

        let post = map_thing(&channel(), thing);
        assert_eq!(post.external_id, "abc");
        assert_eq!(post.body.as_deref(), Some("has a body"));
    }
}
