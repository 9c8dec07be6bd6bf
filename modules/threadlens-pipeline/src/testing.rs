// Test doubles for the pipeline's trait seams.
//
// Four mocks matching the four boundaries:
// - MemoryStore (ContentStore) — stateful in-memory store
// - StaticAuth (PlatformAuth) — canned token responses with call counters
// - ScriptedListing (PlatformListing) — queued pages/errors per channel path
// - FixedEmbedder (TextEmbedder) / ScriptedGenerator (TextGenerator)
//
// Plus helpers for constructing channels, settings and listing things.
// No network, no database; `cargo test` runs in seconds.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use reddit_client::{ListingPage, RedditError, SortMode, ThingData, TokenResponse};
use threadlens_common::model::{
    Embedded, GeneratedText, TextEmbedder, TextGenerator, TokenUsage,
};
use threadlens_common::types::{
    AnalysisRecord, AuthState, Channel, Credential, NewPost, SearchSetting, UnanalyzedPost,
    UsageLog, CREDENTIAL_TYPE_REDDIT, PLATFORM_REDDIT,
};

use crate::traits::{ContentStore, PlatformAuth, PlatformListing};

/// Embedding dimension used by FixedEmbedder.
pub const TEST_EMBEDDING_DIM: usize = 8;

// ---------------------------------------------------------------------------
// Construction helpers
// ---------------------------------------------------------------------------

pub fn channel(path: &str) -> Channel {
    Channel {
        id: Uuid::new_v4(),
        name: path.to_string(),
        path: path.to_string(),
        platform: PLATFORM_REDDIT.to_string(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn setting(user_id: Uuid, channels_query: &str, retrieval_query: &str) -> SearchSetting {
    SearchSetting {
        id: Uuid::new_v4(),
        user_id,
        description: format!("watching {channels_query}"),
        channels_query: channels_query.to_string(),
        retrieval_query: retrieval_query.to_string(),
        embedding: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// A listing thing with a body, fullname `t3_{id}`.
pub fn thing(id: &str, title: &str, body: &str) -> ThingData {
    ThingData {
        id: id.to_string(),
        name: format!("t3_{id}"),
        subreddit: "example".to_string(),
        title: title.to_string(),
        selftext: body.to_string(),
        url: format!("https://example.com/{id}"),
        permalink: format!("/r/example/comments/{id}/"),
        author: "author".to_string(),
        ups: 10,
        downs: 1,
        score: 9,
        num_comments: 2,
        created_utc: Some(1_700_000_000.0),
    }
}

pub fn listing_page(items: Vec<ThingData>, after: Option<&str>) -> ListingPage {
    ListingPage {
        after: after.map(|s| s.to_string()),
        items,
    }
}

/// A post row as the fetcher would have produced it for this channel.
pub fn post(channel: &Channel, external_id: &str, title: &str, body: Option<&str>) -> NewPost {
    NewPost {
        external_id: external_id.to_string(),
        channel_id: Some(channel.id),
        title: title.to_string(),
        body: body.map(|s| s.to_string()),
        url: format!("https://example.com/{external_id}"),
        permalink: format!("https://www.reddit.com/r/{}/comments/{external_id}/", channel.path),
        author: "author".to_string(),
        metrics: Default::default(),
        created_at_external: Some(Utc::now()),
        embedding: None,
    }
}

pub fn credential(expires_at: Option<DateTime<Utc>>, refresh_token: Option<&str>) -> Credential {
    let now = Utc::now();
    Credential {
        credential_type: CREDENTIAL_TYPE_REDDIT.to_string(),
        access_token: "stored-token".to_string(),
        refresh_token: refresh_token.map(|s| s.to_string()),
        token_type: "bearer".to_string(),
        expires_at,
        scope: "identity read".to_string(),
        created_at: now,
        updated_at: now,
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    credentials: HashMap<String, Credential>,
    auth_states: HashMap<String, AuthState>,
    posts: Vec<NewPost>,
    channels: Vec<Channel>,
    settings: Vec<SearchSetting>,
    analyses: Vec<AnalysisRecord>,
    usage_logs: Vec<UsageLog>,
    balances: HashMap<Uuid, i64>,
    locks: HashMap<String, DateTime<Utc>>,
    credit_ratio: Option<i64>,
    fail_bulk_inserts: bool,
    poison_external_ids: HashSet<String>,
}

/// Stateful in-memory store. Builder methods seed fixtures; accessor methods
/// let tests inspect what the pipeline wrote.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(self, channel: Channel) -> Self {
        self.inner.lock().unwrap().channels.push(channel);
        self
    }

    pub fn with_setting(self, setting: SearchSetting) -> Self {
        self.inner.lock().unwrap().settings.push(setting);
        self
    }

    pub fn with_posts(self, posts: Vec<NewPost>) -> Self {
        self.inner.lock().unwrap().posts.extend(posts);
        self
    }

    pub fn with_credential(self, credential: Credential) -> Self {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .insert(credential.credential_type.clone(), credential);
        self
    }

    pub fn with_credit_ratio(self, ratio: i64) -> Self {
        self.inner.lock().unwrap().credit_ratio = Some(ratio);
        self
    }

    /// Make every multi-row insert fail, forcing the per-row fallback.
    pub fn with_bulk_insert_failure(self) -> Self {
        self.inner.lock().unwrap().fail_bulk_inserts = true;
        self
    }

    /// Make any insert containing this external id fail.
    pub fn with_poison_post(self, external_id: &str) -> Self {
        self.inner
            .lock()
            .unwrap()
            .poison_external_ids
            .insert(external_id.to_string());
        self
    }

    pub fn posts(&self) -> Vec<NewPost> {
        self.inner.lock().unwrap().posts.clone()
    }

    pub fn analyses(&self) -> Vec<AnalysisRecord> {
        self.inner.lock().unwrap().analyses.clone()
    }

    pub fn usage_logs(&self) -> Vec<UsageLog> {
        self.inner.lock().unwrap().usage_logs.clone()
    }

    pub fn balance(&self, user_id: Uuid) -> Option<i64> {
        self.inner.lock().unwrap().balances.get(&user_id).copied()
    }

    pub fn stored_credential(&self) -> Option<Credential> {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .get(CREDENTIAL_TYPE_REDDIT)
            .cloned()
    }

    pub fn has_auth_state(&self, state: &str) -> bool {
        self.inner.lock().unwrap().auth_states.contains_key(state)
    }

    pub fn lock_held(&self, name: &str) -> bool {
        self.inner.lock().unwrap().locks.contains_key(name)
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn find_credential(&self, credential_type: &str) -> Result<Option<Credential>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .credentials
            .get(credential_type)
            .cloned())
    }

    async fn replace_credential(&self, credential: &Credential) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .insert(credential.credential_type.clone(), credential.clone());
        Ok(())
    }

    async fn delete_credential(&self, credential_type: &str) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .credentials
            .remove(credential_type);
        Ok(())
    }

    async fn put_auth_state(&self, state: &AuthState) -> Result<()> {
        self.inner
            .lock()
            .unwrap()
            .auth_states
            .insert(state.state.clone(), state.clone());
        Ok(())
    }

    async fn take_auth_state(&self, state: &str) -> Result<Option<AuthState>> {
        Ok(self.inner.lock().unwrap().auth_states.remove(state))
    }

    async fn existing_external_ids(&self, ids: &[String]) -> Result<HashSet<String>> {
        let inner = self.inner.lock().unwrap();
        let wanted: HashSet<&String> = ids.iter().collect();
        Ok(inner
            .posts
            .iter()
            .filter(|p| wanted.contains(&p.external_id))
            .map(|p| p.external_id.clone())
            .collect())
    }

    async fn insert_posts_ignore_conflicts(&self, posts: &[NewPost]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();

        let has_poison = posts
            .iter()
            .any(|p| inner.poison_external_ids.contains(&p.external_id));
        if posts.len() > 1 && (inner.fail_bulk_inserts || has_poison) {
            bail!("bulk insert failed");
        }
        if posts.len() == 1 && has_poison {
            bail!("row insert failed");
        }

        let mut inserted = 0u64;
        for post in posts {
            let exists = inner.posts.iter().any(|p| p.external_id == post.external_id);
            if !exists {
                inner.posts.push(post.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn distinct_channels(&self, platform: &str) -> Result<Vec<Channel>> {
        let inner = self.inner.lock().unwrap();
        let mut seen = HashSet::new();
        Ok(inner
            .channels
            .iter()
            .filter(|c| c.platform == platform && seen.insert(c.path.clone()))
            .cloned()
            .collect())
    }

    async fn find_unanalyzed(&self, user_scope: Option<Uuid>) -> Result<Vec<UnanalyzedPost>> {
        let inner = self.inner.lock().unwrap();
        let mut rows = Vec::new();

        for setting in &inner.settings {
            if let Some(scope) = user_scope {
                if setting.user_id != scope {
                    continue;
                }
            }
            for channel in &inner.channels {
                if channel.platform != PLATFORM_REDDIT
                    || !setting.channels_query.contains(&channel.path)
                {
                    continue;
                }
                for post in &inner.posts {
                    if post.channel_id != Some(channel.id) {
                        continue;
                    }
                    let body = match &post.body {
                        Some(b) if !b.trim().is_empty() => b.clone(),
                        _ => continue,
                    };
                    let analyzed = inner.analyses.iter().any(|a| {
                        a.user_id == setting.user_id && a.post_external_id == post.external_id
                    });
                    if analyzed {
                        continue;
                    }
                    rows.push(UnanalyzedPost {
                        post_external_id: post.external_id.clone(),
                        title: post.title.clone(),
                        body,
                        channel_id: post.channel_id,
                        channel_path: channel.path.clone(),
                        user_id: setting.user_id,
                        retrieval_query: setting.retrieval_query.clone(),
                    });
                }
            }
        }
        Ok(rows)
    }

    async fn insert_analysis(&self, record: &AnalysisRecord) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let exists = inner.analyses.iter().any(|a| {
            a.user_id == record.user_id && a.post_external_id == record.post_external_id
        });
        if exists {
            return Ok(false);
        }
        inner.analyses.push(record.clone());
        Ok(true)
    }

    async fn insert_usage_log(&self, row: &UsageLog) -> Result<()> {
        self.inner.lock().unwrap().usage_logs.push(row.clone());
        Ok(())
    }

    async fn credit_mapping(&self) -> Result<Option<i64>> {
        Ok(self.inner.lock().unwrap().credit_ratio)
    }

    async fn credit_totals(&self, business: &str) -> Result<Vec<(Option<Uuid>, i64)>> {
        let inner = self.inner.lock().unwrap();
        let mut totals: HashMap<Option<Uuid>, i64> = HashMap::new();
        for row in inner.usage_logs.iter().filter(|r| r.business == business) {
            *totals.entry(row.user_id).or_insert(0) += row.credit;
        }
        Ok(totals.into_iter().collect())
    }

    async fn upsert_credit_balance(&self, user_id: Uuid, total: i64) -> Result<()> {
        self.inner.lock().unwrap().balances.insert(user_id, total);
        Ok(())
    }

    async fn try_acquire_run_lock(&self, name: &str, stale_after: Duration) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(locked_at) = inner.locks.get(name) {
            if *locked_at > Utc::now() - stale_after {
                return Ok(false);
            }
        }
        inner.locks.insert(name.to_string(), Utc::now());
        Ok(true)
    }

    async fn release_run_lock(&self, name: &str) -> Result<()> {
        self.inner.lock().unwrap().locks.remove(name);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticAuth
// ---------------------------------------------------------------------------

/// Canned OAuth endpoints. Counts refresh and exchange calls.
pub struct StaticAuth {
    pub refreshed_token: String,
    pub fail_refresh: bool,
    refresh_calls: AtomicU32,
    exchange_calls: AtomicU32,
}

impl Default for StaticAuth {
    fn default() -> Self {
        Self {
            refreshed_token: "refreshed-token".to_string(),
            fail_refresh: false,
            refresh_calls: AtomicU32::new(0),
            exchange_calls: AtomicU32::new(0),
        }
    }
}

impl StaticAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_refresh() -> Self {
        Self {
            fail_refresh: true,
            ..Self::default()
        }
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn exchange_calls(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAuth for StaticAuth {
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> String {
        format!("https://auth.example/authorize?redirect_uri={redirect_uri}&state={state}")
    }

    async fn exchange_code(
        &self,
        _code: &str,
        _redirect_uri: &str,
    ) -> reddit_client::Result<TokenResponse> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        Ok(TokenResponse {
            access_token: "exchanged-token".to_string(),
            token_type: "bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: Some("exchanged-refresh".to_string()),
            scope: "identity read".to_string(),
        })
    }

    async fn refresh_access_token(
        &self,
        _refresh_token: &str,
    ) -> reddit_client::Result<TokenResponse> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh {
            return Err(RedditError::Api {
                status: 400,
                message: "invalid_grant".to_string(),
            });
        }
        Ok(TokenResponse {
            access_token: self.refreshed_token.clone(),
            token_type: "bearer".to_string(),
            expires_in: Some(3600),
            refresh_token: None,
            scope: "identity read".to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// ScriptedListing
// ---------------------------------------------------------------------------

enum ScriptedPage {
    Page(ListingPage),
    Error(RedditError),
}

/// Queued listing responses per channel path, consumed in order. An empty
/// queue yields an end-of-listing page.
#[derive(Default)]
pub struct ScriptedListing {
    queues: Mutex<HashMap<String, VecDeque<ScriptedPage>>>,
    calls: AtomicU32,
    tokens_seen: Mutex<Vec<String>>,
}

impl ScriptedListing {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_page(self, path: &str, page: ListingPage) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(ScriptedPage::Page(page));
        self
    }

    pub fn on_error(self, path: &str, error: RedditError) -> Self {
        self.queues
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(ScriptedPage::Error(error));
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Access tokens presented, in call order.
    pub fn tokens_seen(&self) -> Vec<String> {
        self.tokens_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlatformListing for ScriptedListing {
    async fn page(
        &self,
        access_token: &str,
        channel_path: &str,
        _sort: SortMode,
        _after: Option<&str>,
        _limit: u32,
    ) -> reddit_client::Result<ListingPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.tokens_seen
            .lock()
            .unwrap()
            .push(access_token.to_string());

        let next = self
            .queues
            .lock()
            .unwrap()
            .get_mut(channel_path)
            .and_then(|q| q.pop_front());

        match next {
            Some(ScriptedPage::Page(page)) => Ok(page),
            Some(ScriptedPage::Error(error)) => Err(error),
            None => Ok(ListingPage {
                after: None,
                items: vec![],
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// FixedEmbedder / ScriptedGenerator
// ---------------------------------------------------------------------------

/// Deterministic embedder; optionally fails every call.
pub struct FixedEmbedder {
    pub fail: bool,
}

impl FixedEmbedder {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for FixedEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextEmbedder for FixedEmbedder {
    fn model(&self) -> &str {
        "text-embedding-3-small"
    }

    async fn embed(&self, _text: &str) -> Result<Embedded> {
        if self.fail {
            bail!("embedding provider unavailable");
        }
        Ok(Embedded {
            vector: vec![0.1; TEST_EMBEDDING_DIM],
            usage: TokenUsage {
                prompt_tokens: 7,
                completion_tokens: 0,
                total_tokens: 7,
            },
        })
    }
}

/// Queued completions, consumed per call in arrival order. An empty queue is
/// a test bug and errors loudly.
#[derive(Default)]
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<Result<GeneratedText>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, text: &str) -> Self {
        self.respond_with_usage(text, 100, 20)
    }

    pub fn respond_with_usage(self, text: &str, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Ok(GeneratedText {
                text: text.to_string(),
                usage: TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                },
            }));
        self
    }

    pub fn fail(self, message: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!("{message}")));
        self
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model(&self) -> &str {
        "gpt-4o-mini"
    }

    async fn generate(&self, _system: &str, _user: &str) -> Result<GeneratedText> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("ScriptedGenerator: no scripted response left")))
    }
}
