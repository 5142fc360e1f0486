//! Turn engine (spec §4.1): drives one LLM turn to completion, looping over
//! tool calls, persisting every observable fragment to the message store in
//! production order and broadcasting it before the next fragment is produced.
//!
//! Grounded on `pipeline::process::process_message_non_streaming`'s shape
//! (load history → build request → drive the model → tool loop → persist →
//! notify), generalized from that crate's flat conversation log onto the
//! branched message store and from a one-shot response onto a streamed,
//! resumable one.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use threadline_core::ids::SessionId;
use threadline_protocol::{Event, EventKind, FunctionCall, FunctionResponse, Message, MessageType, ToolDescriptor};
use threadline_store::{BlobStore, BranchManager, Db, Draft, HistoryOptions, MessageStore, SessionStore};

use crate::call_manager::CallManager;
use crate::error::{Error, Result};
use crate::provider::{ChatRequest, GenerationParams, Provider, Role as ProviderRole, StreamEvent, Turn};
use crate::registry::ToolRegistry;
use crate::tools::{ToolEnv, ToolOutcome};

/// Broadcast seam for turn events (spec §4.8). Defined here so the turn
/// engine stays ignorant of how subscribers are held; implemented by the
/// gateway's connection fan-out.
pub trait EventSink: Send + Sync {
    fn emit(&self, session_id: &str, event: Event);
}

/// Parameters resolved by the caller (system-prompt evaluation, model
/// selection) and handed to the engine for one turn (spec §4.1 "Inputs").
pub struct TurnRequest {
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDescriptor>,
    pub generation: GenerationParams,
}

pub struct TurnEngine {
    messages: MessageStore,
    branches: BranchManager,
    sessions: SessionStore,
    db: Db,
    registry: Arc<ToolRegistry>,
    provider: Arc<dyn Provider>,
    call_manager: Arc<CallManager>,
    events: Arc<dyn EventSink>,
    roots: Vec<PathBuf>,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Db,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        call_manager: Arc<CallManager>,
        events: Arc<dyn EventSink>,
        roots: Vec<PathBuf>,
    ) -> Self {
        Self {
            messages: MessageStore::new(db.clone()),
            branches: BranchManager::new(db.clone()),
            sessions: SessionStore::new(db.clone()),
            db,
            registry,
            provider,
            call_manager,
            events,
            roots,
        }
    }

    /// Post `user_text` on `branch_id` and drive the turn to completion,
    /// cancellation, or a confirmation request (spec §4.1 top-level entry).
    #[instrument(skip(self, user_text, req))]
    pub async fn start_turn(
        self: Arc<Self>,
        session_id: SessionId,
        branch_id: i64,
        user_text: String,
        req: TurnRequest,
    ) -> Result<()> {
        let token = self.call_manager.register(session_id.as_str())?;

        let session = self.sessions.get(&session_id)?;
        let last_id = self.interleave_environment_change(&session_id, branch_id)?;

        let user_id = self.messages.add_message(
            &session_id,
            branch_id,
            Draft::new(MessageType::UserText, user_text)
                .generation(session.environment_generation)
                .maybe_parent(last_id),
        )?;
        self.events.emit(session_id.as_str(), Event::new(EventKind::Acknowledge, user_id));

        let contents = self.load_contents(branch_id)?;

        let outcome = self
            .run_loop(&session_id, branch_id, &req, contents, Some(user_id), token)
            .await;

        self.call_manager.deregister(session_id.as_str());
        if outcome.is_ok() {
            self.infer_session_name(&session_id, branch_id, &req.model).await;
        }
        self.events.emit(session_id.as_str(), Event::new(EventKind::Finish, serde_json::Value::Null));
        outcome
    }

    /// Approve or reject the branch's pending tool call and resume the turn
    /// (spec §4.1 "Resume-from-confirmation").
    #[instrument(skip(self, req))]
    pub async fn resume_confirmation(
        self: Arc<Self>,
        session_id: SessionId,
        branch_id: i64,
        approved: bool,
        req: TurnRequest,
    ) -> Result<()> {
        let branch = self.branches.get(branch_id)?;
        let Some(pending_json) = branch.pending_confirmation.clone() else {
            return Err(Error::NoPendingConfirmation);
        };
        self.branches.clear_pending(branch_id)?;
        let call: FunctionCall = serde_json::from_str(&pending_json)?;

        let token = self.call_manager.register(session_id.as_str())?;

        let history = self.messages.get_active_history(
            branch_id,
            HistoryOptions { include_thoughts: false, respect_compression: true },
        )?;
        let mut last_id = history
            .iter()
            .rev()
            .find(|m| m.message_type == MessageType::FunctionCall)
            .map(|m| m.id);

        let keep_going = if approved {
            self.dispatch_and_continue(&session_id, branch_id, &call, true, &req.model, &mut last_id)
                .await
        } else {
            let response_json = serde_json::to_string(&FunctionResponse::Rejected { rejected: true })?;
            let response_id = self.messages.add_message(
                &session_id,
                branch_id,
                Draft::new(MessageType::FunctionResponse, response_json.clone()).maybe_parent(last_id),
            )?;
            last_id = Some(response_id);
            self.events.emit(session_id.as_str(), Event::new(EventKind::FunctionResponse, response_json));
            Ok(true)
        };

        let result = match keep_going {
            Ok(true) => {
                let contents = self.load_contents(branch_id)?;
                self.run_loop(&session_id, branch_id, &req, contents, last_id, token).await
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        self.call_manager.deregister(session_id.as_str());
        self.events.emit(session_id.as_str(), Event::new(EventKind::Finish, serde_json::Value::Null));
        result
    }

    /// Drive a branch's existing head to completion without inserting a new
    /// user message first — used when the caller already appended one (spec
    /// §4.3's branch-creation endpoint inserts the edited user text itself).
    #[instrument(skip(self, req))]
    pub async fn continue_turn(self: Arc<Self>, session_id: SessionId, branch_id: i64, req: TurnRequest) -> Result<()> {
        let token = self.call_manager.register(session_id.as_str())?;
        let branch = self.branches.get(branch_id)?;
        let last_id = branch.head_message_id;
        let contents = self.load_contents(branch_id)?;

        let outcome = self.run_loop(&session_id, branch_id, &req, contents, last_id, token).await;

        self.call_manager.deregister(session_id.as_str());
        if outcome.is_ok() {
            self.infer_session_name(&session_id, branch_id, &req.model).await;
        }
        self.events.emit(session_id.as_str(), Event::new(EventKind::Finish, serde_json::Value::Null));
        outcome
    }

    fn load_contents(&self, branch_id: i64) -> Result<Vec<Turn>> {
        let history = self.messages.get_active_history(
            branch_id,
            HistoryOptions { include_thoughts: false, respect_compression: true },
        )?;
        Ok(history.iter().map(message_to_turn).collect())
    }

    /// Compare the session's current environment generation against the
    /// branch tail's and, on mismatch, insert an `env_changed` message
    /// (spec §4.1 "Environment-change interleaving"). Returns the id of the
    /// branch's current tail message, if any.
    fn interleave_environment_change(&self, session_id: &SessionId, branch_id: i64) -> Result<Option<i64>> {
        let session = self.sessions.get(session_id)?;
        let branch = self.branches.get(branch_id)?;
        let Some(head_id) = branch.head_message_id else {
            return Ok(None);
        };
        let tail = self.messages.get(head_id)?;
        if tail.generation == session.environment_generation {
            return Ok(Some(head_id));
        }
        let new_id = self.messages.add_message(
            session_id,
            branch_id,
            Draft::new(MessageType::EnvChanged, "workspace roots changed")
                .parent(head_id)
                .generation(session.environment_generation),
        )?;
        self.events.emit(
            session_id.as_str(),
            Event::new(EventKind::GenerationChanged, session.environment_generation),
        );
        Ok(Some(new_id))
    }

    /// The core loop (spec §4.1 steps 1-5). `last_id` tracks the most
    /// recently persisted message so the next one can set its parent.
    async fn run_loop(
        &self,
        session_id: &SessionId,
        branch_id: i64,
        req: &TurnRequest,
        mut contents: Vec<Turn>,
        mut last_id: Option<i64>,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            if token.is_cancelled() {
                self.handle_cancellation(session_id, branch_id, None, &mut last_id)?;
                return Err(Error::Cancelled);
            }

            let request = ChatRequest {
                model: req.model.clone(),
                system_prompt: req.system_prompt.clone(),
                contents: contents.clone(),
                tools: req.tools.clone(),
                generation: req.generation.clone(),
            };

            let (tx, mut rx) = mpsc::channel(64);
            let provider = self.provider.clone();
            let stream_task = tokio::spawn(async move { provider.send_stream(&request, tx).await });

            let mut buffer = String::new();
            let mut function_call: Option<(String, serde_json::Value, Option<String>)> = None;
            let mut cancelled = false;

            loop {
                let next = tokio::select! {
                    _ = token.cancelled() => { cancelled = true; None }
                    event = rx.recv() => event,
                };
                let Some(event) = next else { break };
                match event {
                    StreamEvent::TextDelta { text } => {
                        buffer.push_str(&text);
                        self.events.emit(session_id.as_str(), Event::new(EventKind::ModelMessage, text));
                    }
                    StreamEvent::Thought { text } => {
                        let id = self.messages.add_message(
                            session_id,
                            branch_id,
                            Draft::new(MessageType::Thought, text.clone()).maybe_parent(last_id),
                        )?;
                        last_id = Some(id);
                        self.events.emit(session_id.as_str(), Event::new(EventKind::Thought, text));
                    }
                    StreamEvent::CumulTokenCount { n } => {
                        if let Some(id) = last_id {
                            self.messages.update_cumul_tokens(id, n)?;
                        }
                        self.events.emit(session_id.as_str(), Event::new(EventKind::CumulTokenCount, n));
                    }
                    StreamEvent::FunctionCall { name, args, thought_signature } => {
                        function_call = Some((name, args, thought_signature));
                        break;
                    }
                    StreamEvent::Done { stop_reason } => {
                        if !buffer.is_empty() {
                            let id = self.messages.add_message(
                                session_id,
                                branch_id,
                                Draft::new(MessageType::ModelText, buffer.clone())
                                    .model(req.model.clone())
                                    .maybe_parent(last_id),
                            )?;
                            last_id = Some(id);
                        }
                        self.events.emit(session_id.as_str(), Event::new(EventKind::Complete, stop_reason));
                        let _ = stream_task.await;
                        return Ok(());
                    }
                }
            }

            if cancelled {
                self.handle_cancellation(session_id, branch_id, Some(&buffer), &mut last_id)?;
                stream_task.abort();
                return Err(Error::Cancelled);
            }

            let Some((name, args, thought_signature)) = function_call else {
                let _ = stream_task.await;
                return Ok(());
            };

            if !buffer.is_empty() {
                let id = self.messages.add_message(
                    session_id,
                    branch_id,
                    Draft::new(MessageType::ModelText, buffer.clone())
                        .model(req.model.clone())
                        .maybe_parent(last_id),
                )?;
                last_id = Some(id);
            }

            let call = FunctionCall { name, args, thought_signature };
            let call_json = serde_json::to_string(&call)?;
            let call_id = self.messages.add_message(
                session_id,
                branch_id,
                Draft::new(MessageType::FunctionCall, call_json).model(req.model.clone()).maybe_parent(last_id),
            )?;
            last_id = Some(call_id);
            self.events.emit(session_id.as_str(), Event::new(EventKind::FunctionCall, &call));
            let _ = stream_task.await;

            if self
                .dispatch_and_continue(session_id, branch_id, &call, false, &req.model, &mut last_id)
                .await?
            {
                contents = self.load_contents(branch_id)?;
                continue;
            }
            return Ok(());
        }
    }

    /// Dispatch one function call through the registry and persist its
    /// outcome. Returns `Ok(true)` to keep looping, `Ok(false)` when a
    /// confirmation request suspended the turn (spec §4.4 steps 3-5).
    async fn dispatch_and_continue(
        &self,
        session_id: &SessionId,
        branch_id: i64,
        call: &FunctionCall,
        confirmation_received: bool,
        model: &str,
        last_id: &mut Option<i64>,
    ) -> Result<bool> {
        let env = ToolEnv {
            session_id: session_id.as_str().to_string(),
            branch_id,
            model: model.to_string(),
            confirmation_received,
            db: self.db.clone(),
            blobs: BlobStore::new(self.db.clone()),
            roots: self.roots.clone(),
        };

        match self.registry.dispatch(&env, &call.name, call.args.clone()).await {
            ToolOutcome::NeedsConfirmation => {
                self.branches.set_pending(branch_id, &serde_json::to_string(call)?)?;
                self.events.emit(session_id.as_str(), Event::new(EventKind::PendingConfirmation, call));
                Ok(false)
            }
            ToolOutcome::Result { json, attachments } => {
                self.persist_function_response(session_id, branch_id, FunctionResponse::Ok(json), attachments, last_id)?;
                Ok(true)
            }
            ToolOutcome::Error(message) => {
                warn!(tool = %call.name, %message, "tool returned an error");
                self.persist_function_response(
                    session_id,
                    branch_id,
                    FunctionResponse::Error { error: message },
                    Vec::new(),
                    last_id,
                )?;
                Ok(true)
            }
        }
    }

    fn persist_function_response(
        &self,
        session_id: &SessionId,
        branch_id: i64,
        response: FunctionResponse,
        attachments: Vec<threadline_protocol::Attachment>,
        last_id: &mut Option<i64>,
    ) -> Result<()> {
        let response_json = serde_json::to_string(&response)?;
        let id = self.messages.add_message(
            session_id,
            branch_id,
            Draft::new(MessageType::FunctionResponse, response_json.clone())
                .attachments(attachments)
                .maybe_parent(*last_id),
        )?;
        *last_id = Some(id);
        self.events.emit(session_id.as_str(), Event::new(EventKind::FunctionResponse, response_json));
        Ok(())
    }

    fn handle_cancellation(
        &self,
        session_id: &SessionId,
        branch_id: i64,
        buffered_text: Option<&str>,
        last_id: &mut Option<i64>,
    ) -> Result<()> {
        if let Some(text) = buffered_text.filter(|t| !t.is_empty()) {
            let id = self.messages.add_message(
                session_id,
                branch_id,
                Draft::new(MessageType::ModelText, text)
                    .maybe_parent(*last_id)
                    .aux(serde_json::json!({"cancelled": true})),
            )?;
            *last_id = Some(id);
        }
        self.events.emit(session_id.as_str(), Event::new(EventKind::Error, "cancelled"));
        Ok(())
    }

    async fn infer_session_name(&self, session_id: &SessionId, branch_id: i64, model: &str) {
        let Ok(session) = self.sessions.get(session_id) else { return };
        if !session.name.is_empty() {
            return;
        }
        let Ok(history) = self.messages.get_active_history(branch_id, HistoryOptions::default()) else {
            return;
        };
        let exchange: String = history
            .iter()
            .filter(|m| matches!(m.message_type, MessageType::UserText | MessageType::ModelText))
            .take(4)
            .map(|m| format!("{:?}: {}\n", m.role(), m.text))
            .collect();
        if exchange.trim().is_empty() {
            return;
        }
        let request = ChatRequest {
            model: model.to_string(),
            system_prompt: "Infer a short (3-6 word) title for this conversation. Respond with the title only.".to_string(),
            contents: vec![Turn { role: ProviderRole::User, content: exchange }],
            tools: Vec::new(),
            generation: GenerationParams::default(),
        };
        match self.provider.send(&request).await {
            Ok(title) => {
                let title = title.trim().to_string();
                if !title.is_empty() && self.sessions.set_name(session_id, &title).is_ok() {
                    self.events.emit(session_id.as_str(), Event::new(EventKind::SessionName, title));
                }
            }
            Err(e) => info!(error = %e, "session-name inference failed, leaving name empty"),
        }
    }
}

/// Flatten a persisted message onto the provider's two-role `Turn` (spec
/// §1/§9: concrete wire formats, and therefore a richer role set, are out of
/// scope for `Provider`). Function calls and responses are carried as
/// inline-tagged text rather than a structured part, since the provider
/// trait has no function-call turn variant to put them in.
pub(crate) fn message_to_turn(m: &Message) -> Turn {
    let role = match m.message_type {
        MessageType::UserText
        | MessageType::Command
        | MessageType::EnvChanged
        | MessageType::Compression
        | MessageType::FunctionResponse => ProviderRole::User,
        MessageType::ModelText
        | MessageType::FunctionCall
        | MessageType::Error
        | MessageType::ModelError
        | MessageType::Thought => ProviderRole::Model,
    };
    let content = match m.message_type {
        MessageType::FunctionCall => format!("[function_call] {}", m.text),
        MessageType::FunctionResponse => format!("[function_response] {}", m.text),
        _ => m.text.clone(),
    };
    Turn { role, content }
}

trait DraftExt {
    fn maybe_parent(self, id: Option<i64>) -> Self;
}

impl DraftExt for Draft {
    fn maybe_parent(self, id: Option<i64>) -> Self {
        match id {
            Some(id) => self.parent(id),
            None => self,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockProvider;
    use crate::tools::read_file::ReadFileTool;
    use std::sync::Mutex;
    use threadline_core::ids::WorkspaceId;

    struct RecordingSink {
        events: Mutex<Vec<(String, char)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    impl EventSink for RecordingSink {
        fn emit(&self, session_id: &str, event: Event) {
            self.events.lock().unwrap().push((session_id.to_string(), event.kind.wire_char()));
        }
    }

    fn setup() -> (Arc<TurnEngine>, Arc<RecordingSink>, SessionId, i64) {
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
        let session_id = SessionId::from("s1".to_string());
        sessions.create(session_id.clone(), &ws, "", false).unwrap();
        let branches = BranchManager::new(db.clone());
        let branch_id = branches.create_root(session_id.as_str()).unwrap();

        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(ReadFileTool));
        let provider = Arc::new(MockProvider { reply: "hi there".to_string() });
        let call_manager = Arc::new(CallManager::new());
        let sink = Arc::new(RecordingSink::new());
        let engine = Arc::new(TurnEngine::new(db, registry, provider, call_manager, sink.clone(), Vec::new()));
        (engine, sink, session_id, branch_id)
    }

    fn blank_request() -> TurnRequest {
        TurnRequest {
            model: "mock".to_string(),
            system_prompt: String::new(),
            tools: Vec::new(),
            generation: GenerationParams::default(),
        }
    }

    #[tokio::test]
    async fn a_turn_with_no_tool_call_persists_user_and_model_text() {
        let (engine, sink, session_id, branch_id) = setup();
        engine
            .clone()
            .start_turn(session_id.clone(), branch_id, "hello".to_string(), blank_request())
            .await
            .unwrap();

        let history = engine
            .messages
            .get_active_history(branch_id, HistoryOptions::default())
            .unwrap();
        let texts: Vec<_> = history.iter().map(|m| (m.message_type, m.text.clone())).collect();
        assert!(texts.iter().any(|(t, text)| *t == MessageType::UserText && text == "hello"));
        assert!(texts.iter().any(|(t, text)| *t == MessageType::ModelText && text == "hi there"));

        let kinds: Vec<char> = sink.events.lock().unwrap().iter().map(|(_, k)| *k).collect();
        assert!(kinds.contains(&EventKind::Finish.wire_char()));
        assert!(kinds.contains(&EventKind::Complete.wire_char()));
    }

    #[tokio::test]
    async fn a_second_turn_while_one_is_active_is_rejected() {
        let (engine, _sink, session_id, _branch_id) = setup();
        let token = engine.call_manager.register(session_id.as_str()).unwrap();
        let err = engine
            .clone()
            .start_turn(session_id.clone(), 1, "hello".to_string(), blank_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyActive));
        engine.call_manager.deregister(session_id.as_str());
        drop(token);
    }

    #[tokio::test]
    async fn resume_without_a_pending_confirmation_is_rejected() {
        let (engine, _sink, session_id, branch_id) = setup();
        let err = engine
            .resume_confirmation(session_id, branch_id, true, blank_request())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoPendingConfirmation));
    }
}
