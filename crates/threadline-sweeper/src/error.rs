use thiserror::Error;

use threadline_core::error::kind;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] threadline_store::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Store(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_code_passes_through() {
        let err = Error::Store(threadline_store::Error::NotFound {
            what: "session",
            id: "x".to_string(),
        });
        assert_eq!(err.code(), kind::NOT_FOUND);
    }
}
