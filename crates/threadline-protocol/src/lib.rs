pub mod event;
pub mod message;
pub mod tool;

pub use event::{Event, EventKind};
pub use message::{Attachment, Message, MessageType, Part, Role};
pub use tool::{FunctionCall, FunctionResponse, ToolDescriptor};
