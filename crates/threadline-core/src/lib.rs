pub mod config;
pub mod credential;
pub mod error;
pub mod ids;
pub mod prompt;

pub use config::ThreadlineConfig;
pub use error::{Error, Result};
pub use ids::{SessionId, WorkspaceId};
