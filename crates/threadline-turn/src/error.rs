use thiserror::Error;

use threadline_core::error::kind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArgs { tool: String, message: String },

    #[error("a turn is already active on this session")]
    AlreadyActive,

    #[error("turn cancelled")]
    Cancelled,

    #[error("subagents may not spawn subagents")]
    NestedSubagent,

    #[error("no pending confirmation on this branch")]
    NoPendingConfirmation,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("provider error: {0}")]
    Provider(#[from] crate::provider::ProviderError),

    #[error(transparent)]
    Store(#[from] threadline_store::Error),

    #[error(transparent)]
    Shell(#[from] threadline_shell::Error),

    #[error(transparent)]
    Mcp(#[from] threadline_mcp::Error),

    #[error(transparent)]
    Core(#[from] threadline_core::error::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnknownTool(_) | Error::InvalidArgs { .. } => kind::VALIDATION,
            Error::AlreadyActive => kind::VALIDATION,
            Error::Cancelled => kind::CANCELLED,
            Error::NestedSubagent => kind::VALIDATION,
            Error::NoPendingConfirmation => kind::VALIDATION,
            Error::Serialization(_) => kind::VALIDATION,
            Error::Provider(_) => kind::PROVIDER,
            Error::Store(e) => e.code(),
            Error::Shell(e) => e.code(),
            Error::Mcp(e) => e.code(),
            Error::Core(e) => e.code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
