use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque workspace identifier (UUIDv7 — time-sortable for log correlation).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkspaceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Session identifier. Top-level sessions are a bare UUIDv7; subagent sessions
/// append a dot-separated suffix to their parent's id (`main.sub1.sub2`, §3/§6).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive a fresh child id `<self>.<fresh-suffix>` for a subagent (§4.6).
    pub fn child(&self) -> Self {
        Self(format!("{}.{}", self.0, Uuid::now_v7()))
    }

    /// True if this id was derived via `child()` from some ancestor, i.e. it
    /// contains a dot. Subagents may not spawn further subagents (§4.6).
    pub fn is_subagent(&self) -> bool {
        self.0.contains('.')
    }

    /// True if `other` is this session or a subagent nested under it
    /// (`other == self` or `other` starts with `"<self>."`).
    pub fn is_ancestor_of_or_self(&self, other: &SessionId) -> bool {
        other.0 == self.0 || other.0.starts_with(&format!("{}.", self.0))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_id_is_dot_suffixed() {
        let parent = SessionId::from("main");
        let child = parent.child();
        assert!(child.as_str().starts_with("main."));
        assert!(child.is_subagent());
        assert!(!parent.is_subagent());
    }

    #[test]
    fn ancestor_check_covers_self_and_descendants() {
        let parent = SessionId::from("main");
        let child = SessionId::from("main.sub1");
        let grandchild = SessionId::from("main.sub1.sub2");
        let other = SessionId::from("other");
        assert!(parent.is_ancestor_of_or_self(&parent));
        assert!(parent.is_ancestor_of_or_self(&child));
        assert!(parent.is_ancestor_of_or_self(&grandchild));
        assert!(!parent.is_ancestor_of_or_self(&other));
    }

    #[test]
    fn ancestor_check_does_not_match_prefix_collision() {
        let parent = SessionId::from("main");
        let lookalike = SessionId::from("maintenance");
        assert!(!parent.is_ancestor_of_or_self(&lookalike));
    }
}
