use thiserror::Error;

use threadline_core::error::kind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("spawn failed: {0}")]
    SpawnFailed(String),

    #[error("command record not found: {0}")]
    NotFound(i64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::SpawnFailed(_) | Error::Io(_) => kind::TOOL,
            Error::NotFound(_) => kind::NOT_FOUND,
            Error::Database(_) => kind::STORAGE,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
