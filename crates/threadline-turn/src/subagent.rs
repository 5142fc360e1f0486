//! Subagent manager (spec §4.6): spawns a nested, dotted-id session and drives
//! it through the same [`crate::engine::TurnEngine`] used for top-level turns,
//! then folds the nested session's final model text (and any attachments)
//! back into the parent turn as a `function_response`.
//!
//! Grounded on the recursion guard already carried by `SessionId` — a
//! subagent session id always contains a dot, and `SessionId::is_subagent`
//! is how `run` below refuses to let a subagent spawn one of its own
//! (spec §4.6: "subagents may not nest").

use std::collections::HashMap;
use std::sync::Arc;

use threadline_core::ids::{SessionId, WorkspaceId};
use threadline_protocol::{Attachment, Message, MessageType};
use threadline_store::{BranchManager, Db, HistoryOptions, MessageStore, SessionStore};

use crate::engine::{EventSink, TurnEngine, TurnRequest};
use crate::error::{Error, Result};
use crate::provider::{GenerationParams, Provider};
use crate::registry::ToolRegistry;
use crate::call_manager::CallManager;

/// A model/capability entry a subagent may be dispatched to (spec §4.6: no
/// concrete provider catalog is mandated; deployments register whatever
/// models they have providers for).
#[derive(Debug, Clone)]
pub struct SubagentProfile {
    pub model: String,
    pub system_prompt: String,
    pub generation: GenerationParams,
}

/// Runs nested turns for the `subagent` and `generate_image` tools.
pub struct SubagentManager {
    db: Db,
    workspace_id: WorkspaceId,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    call_manager: Arc<CallManager>,
    events: Arc<dyn EventSink>,
    profiles: HashMap<String, SubagentProfile>,
}

impl SubagentManager {
    pub fn new(
        db: Db,
        workspace_id: WorkspaceId,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        call_manager: Arc<CallManager>,
        events: Arc<dyn EventSink>,
        profiles: HashMap<String, SubagentProfile>,
    ) -> Self {
        Self { db, workspace_id, registry, provider, call_manager, events, profiles }
    }

    /// Run one subagent turn to completion under `parent`, returning the
    /// nested session's final model text and attachments for use as the
    /// parent's `function_response` (spec §4.6 steps 1-4).
    pub async fn run(&self, parent: &SessionId, profile_name: &str, prompt: String) -> Result<SubagentOutput> {
        if parent.is_subagent() {
            return Err(Error::NestedSubagent);
        }
        let profile = self
            .profiles
            .get(profile_name)
            .ok_or_else(|| Error::UnknownTool(format!("no subagent profile named {profile_name}")))?
            .clone();

        let child_id = parent.child();
        let sessions = SessionStore::new(self.db.clone());
        sessions.create(child_id.clone(), &self.workspace_id, &profile.system_prompt, true)?;
        let branches = BranchManager::new(self.db.clone());
        let branch_id = branches.create_root(child_id.as_str())?;

        let engine = Arc::new(TurnEngine::new(
            self.db.clone(),
            self.registry.clone(),
            self.provider.clone(),
            self.call_manager.clone(),
            self.events.clone(),
            Vec::new(),
        ));

        let req = TurnRequest {
            model: profile.model.clone(),
            system_prompt: profile.system_prompt.clone(),
            tools: self.registry.for_llm(),
            generation: profile.generation.clone(),
        };
        engine.start_turn(child_id.clone(), branch_id, prompt, req).await?;

        let messages = MessageStore::new(self.db.clone());
        let history = messages.get_active_history(
            branch_id,
            HistoryOptions { include_thoughts: false, respect_compression: true },
        )?;
        Ok(collect_output(&history))
    }
}

#[derive(Debug)]
pub struct SubagentOutput {
    pub text: String,
    pub attachments: Vec<Attachment>,
}

fn collect_output(history: &[Message]) -> SubagentOutput {
    let mut text = String::new();
    let mut attachments = Vec::new();
    for message in history.iter().rev() {
        if message.message_type == MessageType::ModelText {
            text = message.text.clone();
            attachments = message.attachments.clone();
            break;
        }
    }
    SubagentOutput { text, attachments }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::registry::ToolRegistry;
    use threadline_core::ids::WorkspaceId;

    struct NullSink;
    impl EventSink for NullSink {
        fn emit(&self, _session_id: &str, _event: threadline_protocol::Event) {}
    }

    fn setup() -> (SubagentManager, SessionId) {
        let db = threadline_store::db::open_in_memory().unwrap();
        threadline_store::db::init_db(&db.lock().unwrap()).unwrap();
        let ws = WorkspaceId::from("ws".to_string());
        {
            let conn = db.lock().unwrap();
            conn.execute(
                "INSERT INTO workspaces (id, name, system_prompt, created_at) VALUES (?1,'w','','')",
                [ws.as_str()],
            )
            .unwrap();
        }
        let sessions = SessionStore::new(db.clone());
        let parent = SessionId::from("main".to_string());
        sessions.create(parent.clone(), &ws, "", false).unwrap();

        let mut profiles = HashMap::new();
        profiles.insert(
            "default".to_string(),
            SubagentProfile {
                model: "mock".to_string(),
                system_prompt: String::new(),
                generation: GenerationParams::default(),
            },
        );
        let manager = SubagentManager::new(
            db,
            ws,
            Arc::new(ToolRegistry::new()),
            Arc::new(MockProvider { reply: "subagent done".to_string() }),
            Arc::new(CallManager::new()),
            Arc::new(NullSink),
            profiles,
        );
        (manager, parent)
    }

    #[tokio::test]
    async fn a_subagent_session_id_is_a_dotted_child_of_the_parent() {
        let (manager, parent) = setup();
        let output = manager.run(&parent, "default", "do the thing".to_string()).await.unwrap();
        assert_eq!(output.text, "subagent done");
    }

    #[tokio::test]
    async fn a_subagent_session_may_not_spawn_its_own_subagent() {
        let (manager, _parent) = setup();
        let nested = SessionId::from("main.sub1".to_string());
        let err = manager.run(&nested, "default", "nope".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::NestedSubagent));
    }

    #[tokio::test]
    async fn unknown_profile_is_rejected() {
        let (manager, parent) = setup();
        let err = manager.run(&parent, "missing", "x".to_string()).await.unwrap_err();
        assert!(matches!(err, Error::UnknownTool(_)));
    }
}
