use thiserror::Error;

#[derive(Error, Debug)]
pub enum SmsGraphError {
    #[error("no credential on file; complete the authorize flow first")]
    Unauthenticated,

    #[error("refresh rejected by identity provider: {0}")]
    ReauthenticationRequired(String),

    #[error("transient upstream failure: {0}")]
    Transient(String),

    #[error("upstream rejected request: HTTP {status}: {body}")]
    UpstreamRejected { status: u16, body: String },

    #[error("malformed tool arguments: {0}")]
    MalformedToolArguments(String),

    #[error("webhook signature validation failed")]
    SignatureInvalid,

    #[error("LLM API error: {0}")]
    LlmApi(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

/// Network-layer failures (connect, timeout, TLS) are retryable by contract.
impl From<reqwest::Error> for SmsGraphError {
    fn from(err: reqwest::Error) -> Self {
        SmsGraphError::Transient(err.to_string())
    }
}

impl SmsGraphError {
    /// True when the caller may retry the same call without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, SmsGraphError::Transient(_))
    }
}
