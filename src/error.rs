use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrendError {
    #[error("Source unavailable ({source_name}): {message}")]
    SourceUnavailable {
        source_name: &'static str,
        message: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Sink error: {0}")]
    Sink(String),

    // Missing columns, malformed rows, anything that must not reach the sink
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid repository name: {0}")]
    InvalidRepo(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("Run aborted: {0}")]
    Aborted(String),
}

impl TrendError {
    pub fn unavailable(source_name: &'static str, message: impl Into<String>) -> Self {
        TrendError::SourceUnavailable {
            source_name,
            message: message.into(),
        }
    }

    /// Errors that must stop the current run instead of being defaulted away.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            TrendError::Schema(_) | TrendError::Sink(_) | TrendError::Csv(_) | TrendError::Aborted(_)
        )
    }
}

impl From<rusqlite::Error> for TrendError {
    fn from(err: rusqlite::Error) -> Self {
        TrendError::Sink(err.to_string())
    }
}

impl From<chrono::ParseError> for TrendError {
    fn from(err: chrono::ParseError) -> Self {
        TrendError::InvalidDate(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrendError>;
