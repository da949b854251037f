use reqwest::StatusCode;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum SyncError {
    /// Bad caller input, rejected before any I/O.
    #[error("validation error: {0}")]
    Validation(String),

    /// Malformed pagination header or unexpected payload shape.
    #[error("format error: {0}")]
    Format(String),

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error with status {status}: {body}")]
    Api { status: StatusCode, body: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("database error: {0}")]
    Database(#[from] tiberius::error::Error),

    #[error("database connect timed out after {0}s")]
    ConnectTimeout(u64),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("log file setup failed: {0}")]
    LogInit(#[from] tracing_appender::rolling::InitError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl SyncError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    /// True for errors raised before any request or query was issued.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("missing or invalid `{prefix}*` settings: {source}")]
    Section {
        prefix: &'static str,
        #[source]
        source: Box<figment::Error>,
    },

    #[error("`{prefix}*` settings are required for this job but none were provided")]
    MissingSection { prefix: &'static str },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
