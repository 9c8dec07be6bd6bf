use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThreadlensError {
    /// No usable credential and no way to refresh one. The caller must
    /// complete the OAuth flow at the carried URL before retrying.
    #[error("authorization required, complete the OAuth flow at {authorize_url}")]
    AuthRequired { authorize_url: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("platform API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("model output invalid: {0}")]
    ModelOutputInvalid(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("run lock conflict: another '{0}' run is in progress")]
    RunLockConflict(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
