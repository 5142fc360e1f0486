pub mod blob;
pub mod branch;
pub mod chat;
pub mod command;
pub mod health;
pub mod search;
pub mod sse;
pub mod tokens;
pub mod workspace;
