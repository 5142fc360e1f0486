use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{error, info, warn};

mod app;
mod auth;
mod broadcast;
mod error;
mod http;
mod provider_select;

use threadline_core::ids::WorkspaceId;
use threadline_core::ThreadlineConfig;
use threadline_shell::ShellSupervisor;
use threadline_store::{db, WorkspaceStore};
use threadline_turn::tools::list_files::ListFilesTool;
use threadline_turn::tools::patch_file::PatchFileTool;
use threadline_turn::tools::read_file::ReadFileTool;
use threadline_turn::tools::search_files::SearchFilesTool;
use threadline_turn::tools::shell::{KillShellCommandTool, PollShellCommandTool, RunShellCommandTool};
use threadline_turn::tools::subagent::{GenerateImageTool, SubagentTool};
use threadline_turn::tools::write_file::WriteFileTool;
use threadline_turn::{CallManager, GenerationParams, SubagentManager, SubagentProfile, ToolRegistry, TurnEngine};

use crate::broadcast::SessionBroadcaster;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "threadline_gateway=info,tower_http=debug".into()),
        )
        .init();

    let config_path = std::env::var("THREADLINE_CONFIG").ok();
    let config = ThreadlineConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        ThreadlineConfig::default()
    });

    let db = db::open(&config.database.path)?;
    db::init_db(&db.lock().unwrap())?;

    let default_workspace = ensure_default_workspace(&config, db.clone())?;

    let registry = Arc::new(ToolRegistry::new());
    let supervisor = Arc::new(ShellSupervisor::new(db.clone()));
    registry.register(Arc::new(ReadFileTool));
    registry.register(Arc::new(WriteFileTool));
    registry.register(Arc::new(PatchFileTool));
    registry.register(Arc::new(ListFilesTool));
    registry.register(Arc::new(SearchFilesTool));
    registry.register(Arc::new(RunShellCommandTool::new(supervisor.clone())));
    registry.register(Arc::new(PollShellCommandTool::new(supervisor.clone())));
    registry.register(Arc::new(KillShellCommandTool::new(supervisor.clone())));

    for server in &config.mcp.servers {
        match threadline_mcp::McpClient::spawn(&server.name, &server.command, &server.args).await {
            Ok(client) => {
                if let Err(e) = registry.register_mcp_server(Arc::new(client)).await {
                    error!(server = %server.name, error = %e, "failed to register mcp server");
                }
            }
            Err(e) => error!(server = %server.name, error = %e, "failed to spawn mcp server"),
        }
    }

    let provider = provider_select::build_provider(config.provider.kind);
    let call_manager = Arc::new(CallManager::new());
    let broadcaster: Arc<SessionBroadcaster> = Arc::new(SessionBroadcaster::new());

    let engine = Arc::new(TurnEngine::new(
        db.clone(),
        registry.clone(),
        provider.clone(),
        call_manager.clone(),
        broadcaster.clone(),
        Vec::new(),
    ));

    let mut profiles = HashMap::new();
    profiles.insert(
        "default".to_string(),
        SubagentProfile {
            model: config.agent.default_model.clone(),
            system_prompt: "You are a focused subagent completing one delegated task.".to_string(),
            generation: GenerationParams::default(),
        },
    );
    profiles.insert(
        "image".to_string(),
        SubagentProfile {
            model: config.agent.default_model.clone(),
            system_prompt: "You generate a single image matching the given description.".to_string(),
            generation: GenerationParams::default(),
        },
    );

    let subagents = Arc::new(SubagentManager::new(
        db.clone(),
        default_workspace.clone(),
        registry.clone(),
        provider.clone(),
        call_manager.clone(),
        broadcaster.clone(),
        profiles,
    ));
    registry.register(Arc::new(SubagentTool::new(subagents.clone())));
    registry.register(Arc::new(GenerateImageTool::new(subagents.clone())));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper = threadline_sweeper::SweeperEngine::new(
        db.clone(),
        config.sweeper.interval_secs,
        config.sweeper.temp_session_ttl_hours,
    );
    tokio::spawn(sweeper.run(shutdown_rx));

    let state = Arc::new(app::AppState::new(
        config.clone(),
        db,
        default_workspace,
        registry,
        provider,
        call_manager,
        broadcaster,
        engine,
        subagents,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    info!("threadline gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// The single-user deployment always has exactly one workspace named
/// "default"; create it on first boot and reuse it on every later start.
fn ensure_default_workspace(config: &ThreadlineConfig, db: threadline_store::Db) -> anyhow::Result<WorkspaceId> {
    let workspaces = WorkspaceStore::new(db);
    if let Some(existing) = workspaces.list()?.into_iter().find(|w| w.name == "default") {
        return Ok(existing.id);
    }
    let soul = config
        .agent
        .soul_path
        .as_ref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_default();
    let workspace = workspaces.create("default", &soul)?;
    Ok(workspace.id)
}
