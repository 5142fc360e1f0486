//! Shared server state and router assembly (spec §6).
//!
//! Heavyweight components (provider, tool registry, turn engine) are built
//! once by `main.rs` and handed in fully formed; `AppState` just aggregates
//! handles the HTTP layer needs and wires the router.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post, put};
use axum::Router;
use threadline_core::ids::WorkspaceId;
use threadline_core::ThreadlineConfig;
use threadline_store::{BlobStore, BranchManager, Db, MessageStore, SearchIndex, SessionStore, WorkspaceStore};
use threadline_turn::{CallManager, Provider, SubagentManager, ToolRegistry, TurnEngine};

use crate::broadcast::SessionBroadcaster;

pub struct AppState {
    pub config: ThreadlineConfig,
    pub db: Db,
    pub default_workspace: WorkspaceId,
    pub workspaces: WorkspaceStore,
    pub sessions: SessionStore,
    pub branches: BranchManager,
    pub messages: MessageStore,
    pub blobs: BlobStore,
    pub search: SearchIndex,
    pub registry: Arc<ToolRegistry>,
    pub provider: Arc<dyn Provider>,
    pub call_manager: Arc<CallManager>,
    pub broadcaster: Arc<SessionBroadcaster>,
    pub engine: Arc<TurnEngine>,
    pub subagents: Arc<SubagentManager>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ThreadlineConfig,
        db: Db,
        default_workspace: WorkspaceId,
        registry: Arc<ToolRegistry>,
        provider: Arc<dyn Provider>,
        call_manager: Arc<CallManager>,
        broadcaster: Arc<SessionBroadcaster>,
        engine: Arc<TurnEngine>,
        subagents: Arc<SubagentManager>,
    ) -> Self {
        Self {
            workspaces: WorkspaceStore::new(db.clone()),
            sessions: SessionStore::new(db.clone()),
            branches: BranchManager::new(db.clone()),
            messages: MessageStore::new(db.clone()),
            blobs: BlobStore::new(db.clone()),
            search: SearchIndex::new(db.clone()),
            config,
            db,
            default_workspace,
            registry,
            provider,
            call_manager,
            broadcaster,
            engine,
            subagents,
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let gated = Router::new()
        .route("/chat", post(crate::http::chat::create_chat))
        .route("/chat/{session}", post(crate::http::chat::post_chat).get(crate::http::chat::stream_chat))
        .route("/call/{session}", delete(crate::http::chat::cancel_call))
        .route(
            "/chat/{session}/branch",
            post(crate::http::branch::create_branch).put(crate::http::branch::switch_branch),
        )
        .route(
            "/chat/{session}/branch/{branch}/confirm",
            post(crate::http::branch::confirm_branch),
        )
        .route("/countTokens", post(crate::http::tokens::count_tokens))
        .route("/evaluatePrompt", post(crate::http::tokens::evaluate_prompt))
        .route("/search", post(crate::http::search::search_messages))
        .route(
            "/workspaces",
            post(crate::http::workspace::create_workspace).get(crate::http::workspace::list_workspaces),
        )
        .route("/workspaces/{id}", get(crate::http::workspace::get_workspace))
        .route(
            "/workspaces/{id}/system-prompt",
            put(crate::http::workspace::update_system_prompt),
        )
        .route("/blob/{hash}", get(crate::http::blob::get_blob))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_bearer_token));

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .merge(gated)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
