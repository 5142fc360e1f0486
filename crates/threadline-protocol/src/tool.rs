use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool descriptor assembled for the provider (spec §4.4 `for_llm()` view).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
}

/// The JSON shape persisted as a `function_call` message's text (spec §3/§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub args: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought_signature: Option<String>,
}

/// The JSON shape persisted as a `function_response` message's text. An error
/// result is `{"error": "..."}`; a rejection is `{"rejected": true}`
/// (spec §7/§4.1 resume-from-confirmation).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FunctionResponse {
    Ok(Value),
    Error { error: String },
    Rejected { rejected: bool },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_call_round_trips() {
        let call = FunctionCall {
            name: "run_shell_command".into(),
            args: serde_json::json!({"command": "ls"}),
            thought_signature: Some("sig".into()),
        };
        let json = serde_json::to_string(&call).unwrap();
        let back: FunctionCall = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, call.name);
        assert_eq!(back.args, call.args);
        assert_eq!(back.thought_signature, call.thought_signature);
    }

    #[test]
    fn error_response_serializes_with_error_key() {
        let resp = FunctionResponse::Error {
            error: "boom".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"error": "boom"}));
    }

    #[test]
    fn rejected_response_serializes_with_rejected_key() {
        let resp = FunctionResponse::Rejected { rejected: true };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, serde_json::json!({"rejected": true}));
    }
}
