use thiserror::Error;

/// The closed set of error kinds from spec §7. Every crate-local `Error` type
/// exposes a `code()` method returning one of these strings; the gateway is
/// the single place that turns a code into an HTTP status.
pub mod kind {
    pub const VALIDATION: &str = "VALIDATION";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const AUTH: &str = "AUTH";
    pub const PROVIDER: &str = "PROVIDER";
    pub const TOOL: &str = "TOOL";
    pub const CANCELLED: &str = "CANCELLED";
    pub const STORAGE: &str = "STORAGE";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("credential error: {0}")]
    Credential(String),

    #[error("prompt template error: {0}")]
    PromptTemplate(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => kind::INTERNAL,
            Error::Credential(_) => kind::AUTH,
            Error::PromptTemplate(_) => kind::VALIDATION,
            Error::Serialization(_) => kind::VALIDATION,
            Error::Io(_) => kind::STORAGE,
            Error::Internal(_) => kind::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_error_maps_to_auth() {
        assert_eq!(Error::Credential("no token".into()).code(), kind::AUTH);
    }

    #[test]
    fn prompt_template_error_maps_to_validation() {
        assert_eq!(
            Error::PromptTemplate("unknown token".into()).code(),
            kind::VALIDATION
        );
    }
}
