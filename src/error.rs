use thiserror::Error;

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Search API error ({status}): {message}")]
    Search { status: u16, message: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No valid entries found in the uploaded file")]
    EmptyImport,

    #[error("Unsupported import source: {0}")]
    UnsupportedSource(String),

    #[error("Import cancelled: client disconnected")]
    Cancelled,

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for ImportError {
    fn from(err: tokio::task::JoinError) -> Self {
        ImportError::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ImportError>;
