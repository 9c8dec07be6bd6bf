use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Platform identifier stored on channels and credentials.
pub const PLATFORM_REDDIT: &str = "reddit";

/// Credential type for the Reddit integration. One active credential per type.
pub const CREDENTIAL_TYPE_REDDIT: &str = "reddit";

/// Admin setting key: tokens-per-credit divisor for usage billing.
pub const TOKEN_CREDIT_MAPPING_KEY: &str = "token_credit_mapping";

/// OAuth2 credential for an external platform. Replaced wholesale on every
/// refresh or reauthorization, never merged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub credential_type: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    /// None means the token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Short-lived CSRF state for the OAuth authorization flow, persisted in the
/// store so horizontally scaled deployments can validate callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthState {
    pub state: String,
    pub created_at: DateTime<Utc>,
}

/// A content channel (a subreddit, for the Reddit platform). Created
/// implicitly when a search setting references a path not yet present;
/// the path is immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub name: String,
    pub path: String,
    pub platform: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Engagement counters captured at fetch time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMetrics {
    pub upvotes: i64,
    pub downvotes: i64,
    pub score: i64,
    pub comment_count: i64,
}

/// A post ready for insertion. `external_id` is globally unique; insertion is
/// conflict-ignore on it, which is the idempotence guarantee of ingestion.
/// Rows are never updated by this pipeline after insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPost {
    pub external_id: String,
    pub channel_id: Option<Uuid>,
    pub title: String,
    pub body: Option<String>,
    pub url: String,
    pub permalink: String,
    pub author: String,
    pub metrics: PostMetrics,
    /// Source-side creation time; None when the platform omitted it or sent
    /// something unparseable.
    pub created_at_external: Option<DateTime<Utc>>,
    /// Populated at write time only when embed-on-ingest is enabled.
    pub embedding: Option<Vec<f32>>,
}

/// A user's search configuration. Written by the user-facing settings flow
/// (out of scope here), read by the analysis selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSetting {
    pub id: Uuid,
    pub user_id: Uuid,
    pub description: String,
    /// Comma-separated channel paths the setting watches.
    pub channels_query: String,
    /// Derived key phrase handed to the analysis model.
    pub retrieval_query: String,
    pub embedding: Option<Vec<f32>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the unanalyzed join: a (post, setting, channel) combination
/// with no analysis record yet. Exactly the fields the analysis worker needs.
#[derive(Debug, Clone)]
pub struct UnanalyzedPost {
    pub post_external_id: String,
    pub title: String,
    pub body: String,
    pub channel_id: Option<Uuid>,
    pub channel_path: String,
    pub user_id: Uuid,
    pub retrieval_query: String,
}

/// A persisted model verdict for one (user, post) pair. Its existence marks
/// the pair as analyzed and guards against duplicate model spend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub post_external_id: String,
    pub channel_id: Option<Uuid>,
    /// Confidence as a decimal string ("0.8"); validated to be a finite
    /// number in [0,1] before it gets here.
    pub confidence: String,
    pub relation: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one model invocation, success or failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageLog {
    pub id: Uuid,
    /// None attributes the usage to the system rather than a user.
    pub user_id: Option<Uuid>,
    /// Tag identifying the calling workflow ("post_ingest", "post_analysis").
    pub business: String,
    pub model: String,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub cost_usd: Option<f64>,
    pub duration_ms: i64,
    pub success: bool,
    pub error_message: Option<String>,
    /// Billing credits derived from token usage.
    pub credit: i64,
    pub created_at: DateTime<Utc>,
}
