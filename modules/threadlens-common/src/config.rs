use std::env;

use tracing::info;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    // Reddit OAuth2 app
    pub reddit_client_id: String,
    pub reddit_client_secret: String,
    pub reddit_redirect_uri: String,
    pub reddit_user_agent: String,

    // Model provider
    pub openai_api_key: String,
    pub chat_model: String,
    pub embedding_model: String,

    // Ingestion
    pub per_channel_limit: u32,
    pub embed_on_ingest: bool,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            reddit_client_id: required_env("REDDIT_CLIENT_ID"),
            reddit_client_secret: required_env("REDDIT_CLIENT_SECRET"),
            reddit_redirect_uri: required_env("REDDIT_REDIRECT_URI"),
            reddit_user_agent: env::var("REDDIT_USER_AGENT")
                .unwrap_or_else(|_| "threadlens/0.1 (content monitor)".to_string()),
            openai_api_key: required_env("OPENAI_API_KEY"),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            per_channel_limit: env::var("PER_CHANNEL_LIMIT")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .expect("PER_CHANNEL_LIMIT must be a number"),
            embed_on_ingest: env::var("EMBED_ON_INGEST")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Log which credentials are present without leaking their values.
    pub fn log_redacted(&self) {
        info!(
            reddit_app = !self.reddit_client_id.is_empty(),
            openai = !self.openai_api_key.is_empty(),
            chat_model = %self.chat_model,
            embedding_model = %self.embedding_model,
            per_channel_limit = self.per_channel_limit,
            embed_on_ingest = self.embed_on_ingest,
            "Config loaded"
        );
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}
