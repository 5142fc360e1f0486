use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// Deterministic, sandboxed context available to a system-prompt template
/// (spec §4.11). Each entry is a dotted path (`Workspace.Name`) resolved by
/// plain string lookup — there is no arbitrary code execution.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    values: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the standard context: `Today`, `Platform`, and whatever
    /// `Workspace.*`/`Builtin.*` entries the caller supplies.
    pub fn with_standard_fields(workspace_name: &str, now: DateTime<Utc>) -> Self {
        let mut ctx = Self::new();
        ctx.set("Today", format_today(now));
        ctx.set("Platform", current_platform());
        ctx.set("Workspace.Name", workspace_name);
        ctx.set("Builtin.SystemPrompt", builtin_system_prompt());
        ctx.set(
            "Builtin.SystemPromptForCoding",
            builtin_system_prompt_for_coding(),
        );
        ctx.set("Builtin.DynamicPromptTool", builtin_dynamic_prompt_tool());
        ctx
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }
}

fn format_today(now: DateTime<Utc>) -> String {
    // "Month D, YYYY" per spec §4.11.
    now.format("%B %-d, %Y").to_string()
}

fn current_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "windows"
    } else if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "linux") {
        "linux"
    } else {
        "unknown"
    }
}

fn builtin_system_prompt() -> &'static str {
    "You are a helpful, direct conversational agent."
}

fn builtin_system_prompt_for_coding() -> &'static str {
    "You are a careful coding agent. Prefer small, verifiable changes."
}

fn builtin_dynamic_prompt_tool() -> &'static str {
    "A tool is available to fetch additional context on demand; call it before guessing."
}

/// Expand `{{Token.Path}}` placeholders against `ctx`. Unknown tokens are a
/// hard error (surfaced as a 400-class response per spec §4.11), not a
/// silent blank — a template referencing a typo'd field should fail loudly.
pub fn evaluate(template: &str, ctx: &PromptContext) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let bytes = template.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'{' && bytes.get(i + 1) == Some(&b'{') {
            let close = template[i..]
                .find("}}")
                .map(|rel| i + rel)
                .ok_or_else(|| Error::PromptTemplate("unterminated {{ placeholder".to_string()))?;
            let token = template[i + 2..close].trim();
            let value = ctx
                .get(token)
                .ok_or_else(|| Error::PromptTemplate(format!("unknown token: {token}")))?;
            out.push_str(value);
            i = close + 2;
        } else {
            let ch = template[i..].chars().next().unwrap();
            out.push(ch);
            i += ch.len_utf8();
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_tokens() {
        let mut ctx = PromptContext::new();
        ctx.set("Workspace.Name", "crate-exercise");
        let out = evaluate("Working in {{Workspace.Name}}.", &ctx).unwrap();
        assert_eq!(out, "Working in crate-exercise.");
    }

    #[test]
    fn unknown_token_is_an_error() {
        let ctx = PromptContext::new();
        let err = evaluate("{{Nonexistent.Field}}", &ctx).unwrap_err();
        assert_eq!(err.code(), crate::error::kind::VALIDATION);
    }

    #[test]
    fn unterminated_placeholder_is_an_error() {
        let ctx = PromptContext::new();
        assert!(evaluate("hello {{Today", &ctx).is_err());
    }

    #[test]
    fn template_with_no_placeholders_passes_through() {
        let ctx = PromptContext::new();
        assert_eq!(evaluate("plain text", &ctx).unwrap(), "plain text");
    }

    #[test]
    fn standard_fields_include_today_and_platform() {
        let ctx = PromptContext::with_standard_fields("ws", Utc::now());
        assert!(ctx.get("Today").is_some());
        assert!(ctx.get("Platform").is_some());
    }
}
