use thiserror::Error;

use threadline_core::error::kind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {what} {id}")]
    NotFound { what: &'static str, id: String },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => kind::NOT_FOUND,
            Error::Database(_) => kind::STORAGE,
            Error::Serialization(_) => kind::VALIDATION,
            Error::InvalidState(_) => kind::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
