pub mod config;
pub mod error;
pub mod model;
pub mod types;

pub use config::Config;
pub use error::ThreadlensError;
pub use model::{Embedded, GeneratedText, TextEmbedder, TextGenerator, TokenUsage};
pub use types::{
    AnalysisRecord, AuthState, Channel, Credential, NewPost, PostMetrics, SearchSetting,
    UnanalyzedPost, UsageLog, CREDENTIAL_TYPE_REDDIT, PLATFORM_REDDIT, TOKEN_CREDIT_MAPPING_KEY,
};
