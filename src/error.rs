use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("no persisted history for key {0}")]
    NotFound(String),

    #[error("feed {0} has no loaded history")]
    UnknownFeed(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange error (HTTP {status}, code {code}): {msg}")]
    Exchange { status: u16, code: i64, msg: String },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
