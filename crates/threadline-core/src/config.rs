use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Shell supervisor constants (§4.5). First poll wait before returning `running`.
pub const INITIAL_POLL_DELAY_SECS: u64 = 4;
/// Upper bound on the exponential poll backoff.
pub const MAX_POLL_DELAY_SECS: u64 = 60;
/// Compression preserve fraction (§4.7): keep the most recent 30% of history verbatim.
pub const PRESERVE_FRACTION: f64 = 0.3;
/// Broadcaster ping cadence when a session stream is otherwise idle (§4.8).
pub const PING_INTERVAL_SECS: u64 = 15;
/// Per-session broadcast channel capacity before a slow subscriber is dropped.
pub const BROADCAST_CAPACITY: usize = 256;
/// Default bind address for the HTTP/SSE surface.
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default listen port.
pub const DEFAULT_PORT: u16 = 8765;
/// Hard cap on shell stdout/stderr bytes retained in memory per command.
pub const MAX_SHELL_OUTPUT_BYTES: usize = 256 * 1024;
/// Default temporary-session time-to-live, in hours.
pub const DEFAULT_TEMP_SESSION_TTL_HOURS: i64 = 48;
/// Upper bound on a single LLM call, including subagent turns.
pub const PROVIDER_CALL_TIMEOUT_SECS: u64 = 300;

/// Top-level config (threadline.toml + THREADLINE_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadlineConfig {
    pub gateway: GatewayConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Default for ThreadlineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            gateway: GatewayConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                auth: AuthConfig {
                    token: Some("change-me".to_string()),
                },
            },
            agent: AgentConfig {
                default_model: default_model(),
                soul_path: None,
            },
            provider: ProviderConfig::default(),
            sweeper: SweeperConfig::default(),
            mcp: McpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    pub auth: AuthConfig,
}

/// Bearer-token auth in front of the HTTP surface. The concrete `Credential`
/// source used to talk to the LLM provider is a separate concern (`credential.rs`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Optional path to a file whose contents are appended to every evaluated
    /// system prompt (the "soul" of the agent), evaluated by the prompt
    /// evaluator the same as the workspace's own template.
    pub soul_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Which provider backend the turn engine resolves against, per spec §6's
/// environment-variable selection policy. The wire format for each kind is
/// out of scope for this core; `ProviderKind` only drives construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    #[default]
    GeminiDirect,
    VertexAi,
    CloudShell,
    UserOAuth,
    Mock,
}

impl ProviderKind {
    /// Resolve from the environment, following spec §6 exactly.
    pub fn from_env() -> Self {
        if std::env::var("GEMINI_API_KEY").is_ok() {
            return ProviderKind::GeminiDirect;
        }
        let has_google_api_key = std::env::var("GOOGLE_API_KEY").is_ok();
        let has_vertex_project = std::env::var("GOOGLE_CLOUD_PROJECT").is_ok()
            && std::env::var("GOOGLE_CLOUD_LOCATION").is_ok();
        if has_google_api_key || has_vertex_project {
            return ProviderKind::VertexAi;
        }
        if std::env::var("CLOUD_SHELL").map(|v| v == "true").unwrap_or(false) {
            return ProviderKind::CloudShell;
        }
        ProviderKind::UserOAuth
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_ttl_hours")]
    pub temp_session_ttl_hours: i64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval_secs(),
            temp_session_ttl_hours: default_ttl_hours(),
        }
    }
}

/// External MCP servers this process connects to as a client (§4.4/§4.6).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    /// Identifier used as the `<server>` prefix on name-collision renaming.
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_sweep_interval_secs() -> u64 {
    3600
}
fn default_ttl_hours() -> i64 {
    DEFAULT_TEMP_SESSION_TTL_HOURS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.threadline/threadline.db", home)
}

impl ThreadlineConfig {
    /// Load config from a TOML file with THREADLINE_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.threadline/threadline.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ThreadlineConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("THREADLINE_").split("__"))
            .extract()
            .map_err(|e| crate::error::Error::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.threadline/threadline.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_gateway() {
        let cfg = ThreadlineConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.gateway.bind, DEFAULT_BIND);
    }

    #[test]
    fn provider_kind_defaults_to_user_oauth_with_no_env() {
        for var in [
            "GEMINI_API_KEY",
            "GOOGLE_API_KEY",
            "GOOGLE_CLOUD_PROJECT",
            "GOOGLE_CLOUD_LOCATION",
            "CLOUD_SHELL",
        ] {
            std::env::remove_var(var);
        }
        assert_eq!(ProviderKind::from_env(), ProviderKind::UserOAuth);
    }

    #[test]
    fn provider_kind_prefers_gemini_api_key() {
        std::env::set_var("GEMINI_API_KEY", "x");
        assert_eq!(ProviderKind::from_env(), ProviderKind::GeminiDirect);
        std::env::remove_var("GEMINI_API_KEY");
    }
}
