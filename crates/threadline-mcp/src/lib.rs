pub mod client;
pub mod error;

pub use client::McpClient;
pub use error::{Error, Result};
