// Trait abstractions for the pipeline's two external seams.
//
// ContentStore — everything the pipeline needs from the persistence layer.
//   The relational store itself lives behind this trait; the pipeline never
//   sees a connection pool.
// PlatformAuth / PlatformListing — the platform's OAuth endpoints and
//   listing API, implemented by RedditClient.
//
// These enable deterministic testing with MemoryStore, StaticAuth and
// ScriptedListing: no network, no database.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use uuid::Uuid;

use reddit_client::{ListingPage, RedditClient, SortMode, TokenResponse};
use threadlens_common::types::{
    AnalysisRecord, AuthState, Channel, Credential, NewPost, UnanalyzedPost, UsageLog,
};

// ---------------------------------------------------------------------------
// ContentStore — the persistence capability
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentStore: Send + Sync {
    // --- Credentials ---

    /// The active credential for an integration type, if any.
    async fn find_credential(&self, credential_type: &str) -> Result<Option<Credential>>;

    /// Replace the credential for its type: delete prior rows, insert this one.
    async fn replace_credential(&self, credential: &Credential) -> Result<()>;

    async fn delete_credential(&self, credential_type: &str) -> Result<()>;

    // --- OAuth CSRF state ---

    /// Persist a freshly generated authorization state.
    async fn put_auth_state(&self, state: &AuthState) -> Result<()>;

    /// Consume an authorization state: return it if present and unexpired,
    /// deleting it either way.
    async fn take_auth_state(&self, state: &str) -> Result<Option<AuthState>>;

    // --- Posts ---

    /// Which of these external ids are already stored. One round trip.
    async fn existing_external_ids(&self, ids: &[String]) -> Result<HashSet<String>>;

    /// Insert posts, ignoring conflicts on `external_id`. Returns the number
    /// of rows actually inserted.
    async fn insert_posts_ignore_conflicts(&self, posts: &[NewPost]) -> Result<u64>;

    // --- Channels ---

    /// All channels for a platform, one row per distinct path.
    async fn distinct_channels(&self, platform: &str) -> Result<Vec<Channel>>;

    // --- Analysis ---

    /// The unanalyzed join: settings × matching channels × posts, minus
    /// pairs with an existing analysis record, minus posts with no body.
    /// Computed store-side. `user_scope` narrows to one user's settings.
    async fn find_unanalyzed(&self, user_scope: Option<Uuid>) -> Result<Vec<UnanalyzedPost>>;

    /// Insert an analysis record. Returns false when the (user, post) pair
    /// was already analyzed (uniqueness conflict), true when newly inserted.
    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<bool>;

    // --- Usage and credits ---

    async fn insert_usage_log(&self, row: &UsageLog) -> Result<()>;

    /// The admin-configured tokens-per-credit divisor, if set.
    async fn credit_mapping(&self) -> Result<Option<i64>>;

    /// Summed credit per user for one business tag. `None` user ids denote
    /// system-attributed usage.
    async fn credit_totals(&self, business: &str) -> Result<Vec<(Option<Uuid>, i64)>>;

    /// Overwrite (or create) a user's running credit balance.
    async fn upsert_credit_balance(&self, user_id: Uuid, total: i64) -> Result<()>;

    // --- Run locks ---

    /// Acquire the named advisory lock. A lock older than `stale_after` is
    /// taken over. Returns false when someone else holds it.
    async fn try_acquire_run_lock(&self, name: &str, stale_after: Duration) -> Result<bool>;

    async fn release_run_lock(&self, name: &str) -> Result<()>;
}

// ---------------------------------------------------------------------------
// PlatformAuth — OAuth2 endpoints
// ---------------------------------------------------------------------------

/// Scopes the integration requests: identity for the connected account,
/// read for listings.
pub const OAUTH_SCOPES: &[&str] = &["identity", "read"];

#[async_trait]
pub trait PlatformAuth: Send + Sync {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String;

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> reddit_client::Result<TokenResponse>;

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> reddit_client::Result<TokenResponse>;
}

#[async_trait]
impl PlatformAuth for RedditClient {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        RedditClient::authorize_url(self, redirect_uri, state, OAUTH_SCOPES)
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> reddit_client::Result<TokenResponse> {
        RedditClient::exchange_code(self, code, redirect_uri).await
    }

    async fn refresh_access_token(
        &self,
        refresh_token: &str,
    ) -> reddit_client::Result<TokenResponse> {
        RedditClient::refresh_access_token(self, refresh_token).await
    }
}

// ---------------------------------------------------------------------------
// PlatformListing — paginated content listings
// ---------------------------------------------------------------------------

#[async_trait]
pub trait PlatformListing: Send + Sync {
    /// One page of a channel listing, `after` being the cursor returned by
    /// the previous page.
    async fn page(
        &self,
        access_token: &str,
        channel_path: &str,
        sort: SortMode,
        after: Option<&str>,
        limit: u32,
    ) -> reddit_client::Result<ListingPage>;
}

#[async_trait]
impl PlatformListing for RedditClient {
    async fn page(
        &self,
        access_token: &str,
        channel_path: &str,
        sort: SortMode,
        after: Option<&str>,
        limit: u32,
    ) -> reddit_client::Result<ListingPage> {
        self.listing_page(access_token, channel_path, sort, after, limit)
            .await
    }
}
