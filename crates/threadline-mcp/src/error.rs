use thiserror::Error;

use threadline_core::error::kind;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to spawn MCP server {server}: {source}")]
    Spawn {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error talking to MCP server {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },

    #[error("MCP server {server} closed its stdout before responding")]
    Closed { server: String },

    #[error("malformed JSON-RPC message from {server}: {source}")]
    Protocol {
        server: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("MCP server {server} returned an error for {method}: {message}")]
    Remote {
        server: String,
        method: String,
        message: String,
    },
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Spawn { .. } | Error::Io { .. } | Error::Closed { .. } => kind::TOOL,
            Error::Protocol { .. } => kind::VALIDATION,
            Error::Remote { .. } => kind::TOOL,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
