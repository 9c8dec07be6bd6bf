use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedditError>;

#[derive(Debug, Error)]
pub enum RedditError {
    /// Transport-level failure (connect, reset, timeout). Retryable.
    #[error("Network error: {0}")]
    Network(String),

    /// The access token was rejected. Refresh and retry once.
    #[error("Unauthorized: access token rejected")]
    Unauthorized,

    /// Any other non-2xx response.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Empty or malformed response body.
    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RedditError {
    fn from(err: reqwest::Error) -> Self {
        RedditError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for RedditError {
    fn from(err: serde_json::Error) -> Self {
        RedditError::Parse(err.to_string())
    }
}
