//! Turn engine, tool dispatch, subagent manager, and compression for a
//! single conversational agent session (spec §4.1, §4.4, §4.6, §4.7, §4.9).

pub mod call_manager;
pub mod compression;
pub mod engine;
pub mod error;
pub mod provider;
pub mod registry;
pub mod subagent;
pub mod tools;

pub use call_manager::CallManager;
pub use compression::{compress_branch, estimate_tokens};
pub use engine::{EventSink, TurnEngine, TurnRequest};
pub use error::{Error, Result};
pub use provider::{ChatRequest, GenerationParams, MockProvider, Provider, ProviderError, Role, StreamEvent, Turn};
pub use registry::ToolRegistry;
pub use subagent::{SubagentManager, SubagentOutput, SubagentProfile};
