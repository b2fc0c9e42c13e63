use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Exchange API error: {0}")]
    Exchange(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid interval '{0}': expected <positive integer><s|m|h|d>")]
    InvalidInterval(String),

    #[error("Unknown strategy type '{0}'")]
    UnknownStrategy(String),

    #[error("Invalid parameter for strategy '{strategy}': {reason}")]
    InvalidParameter { strategy: String, reason: String },

    #[error("Chart error: {0}")]
    Chart(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
