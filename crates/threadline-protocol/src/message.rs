use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of message types (spec §3). `Role` is derived from `MessageType`,
/// never stored independently — see [`MessageType::role`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    UserText,
    ModelText,
    FunctionCall,
    FunctionResponse,
    Thought,
    Compression,
    EnvChanged,
    Command,
    Error,
    ModelError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Model,
    Thought,
    System,
}

impl MessageType {
    pub fn role(self) -> Role {
        match self {
            MessageType::UserText | MessageType::Command => Role::User,
            MessageType::ModelText
            | MessageType::FunctionCall
            | MessageType::FunctionResponse
            | MessageType::Error
            | MessageType::ModelError => Role::Model,
            MessageType::Thought => Role::Thought,
            MessageType::Compression | MessageType::EnvChanged => Role::System,
        }
    }

    /// Thought messages are never re-fed to the model (spec §3 invariant).
    pub fn is_model_visible(self) -> bool {
        !matches!(self, MessageType::Thought)
    }
}

/// A tag-unioned payload fragment (spec §9: "Tag-unioned `Part`"). Stored as a
/// serde-tagged enum rather than expressed through trait-object polymorphism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    InlineData { mime_type: String, blob_hash: String },
    FunctionCall { name: String, args: Value },
    FunctionResponse { name: String, response: Value },
    ThoughtSignature { signature: String },
}

/// An attachment riding along with a `function_response` or `model_text`
/// message (spec §3); references a blob by its content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub blob_hash: String,
    pub mime_type: String,
}

/// A persisted message in the branched DAG (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub branch_id: i64,
    pub parent_message_id: Option<i64>,
    pub chosen_next_id: Option<i64>,
    pub message_type: MessageType,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    pub cumul_token_count: i64,
    pub created_at: DateTime<Utc>,
    pub model: Option<String>,
    pub generation: i64,
    /// Opaque provider state (e.g. a thought signature) carried back into
    /// later turns (spec §9 "Thought signatures").
    pub aux: Option<Value>,
}

impl Message {
    pub fn role(&self) -> Role {
        self.message_type.role()
    }
}
