//! MCP client: spawns an external MCP server as a child process and speaks
//! JSON-RPC 2.0 over its stdin/stdout, one object per line (spec §4.4
//! "MCP proxying").

use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::{json, Value};
use threadline_protocol::ToolDescriptor;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{instrument, warn};

use crate::error::{Error, Result};

struct Io {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
}

/// A live connection to one external MCP server.
pub struct McpClient {
    pub server_name: String,
    child: Mutex<Child>,
    io: Mutex<Io>,
    next_id: AtomicI64,
}

impl McpClient {
    /// Spawn `command args...` and complete the MCP `initialize` handshake.
    #[instrument(skip(args))]
    pub async fn spawn(server_name: &str, command: &str, args: &[String]) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        let mut child = cmd.spawn().map_err(|e| Error::Spawn {
            server: server_name.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let reader = BufReader::new(stdout);

        let client = Self {
            server_name: server_name.to_string(),
            child: Mutex::new(child),
            io: Mutex::new(Io { stdin, reader }),
            next_id: AtomicI64::new(1),
        };

        client
            .request(
                "initialize",
                json!({
                    "protocolVersion": "2025-06-18",
                    "capabilities": {},
                    "clientInfo": { "name": "threadline", "version": env!("CARGO_PKG_VERSION") }
                }),
            )
            .await?;
        client.notify("notifications/initialized", json!({})).await?;

        Ok(client)
    }

    /// `tools/list` — merged into the registry with the `<server>__<tool>`
    /// rename applied by the caller on collision (spec §4.4).
    #[instrument(skip(self))]
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.request("tools/list", json!({})).await?;
        let tools = result.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(tools
            .into_iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                let description = t
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let parameters = t.get("inputSchema").cloned().unwrap_or(json!({"type": "object"}));
                Some(ToolDescriptor {
                    name,
                    description,
                    parameters,
                })
            })
            .collect())
    }

    /// `tools/call` — returns the tool's text content, or `Err` if the server
    /// flagged `isError`.
    #[instrument(skip(self, arguments))]
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        let is_error = result.get("isError").and_then(Value::as_bool).unwrap_or(false);
        let text = result
            .get("content")
            .and_then(Value::as_array)
            .and_then(|items| items.first())
            .and_then(|item| item.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if is_error {
            return Err(Error::Remote {
                server: self.server_name.clone(),
                method: "tools/call".to_string(),
                message: text,
            });
        }
        Ok(text)
    }

    pub async fn shutdown(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let response = self.send_and_read(&envelope).await?;

        if let Some(error) = response.get("error") {
            return Err(Error::Remote {
                server: self.server_name.clone(),
                method: method.to_string(),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        Ok(response.get("result").cloned().unwrap_or(json!(null)))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let envelope = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.write_line(&envelope).await
    }

    async fn send_and_read(&self, envelope: &Value) -> Result<Value> {
        self.write_line(envelope).await?;
        let target_id = envelope.get("id").cloned();

        let mut io = self.io.lock().await;
        loop {
            let mut line = String::new();
            let bytes = io
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Io {
                    server: self.server_name.clone(),
                    source: e,
                })?;
            if bytes == 0 {
                return Err(Error::Closed {
                    server: self.server_name.clone(),
                });
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: Value = serde_json::from_str(trimmed).map_err(|e| Error::Protocol {
                server: self.server_name.clone(),
                source: e,
            })?;
            if parsed.get("id").cloned() == target_id {
                return Ok(parsed);
            }
            warn!(server = %self.server_name, "ignoring out-of-turn MCP message");
        }
    }

    async fn write_line(&self, envelope: &Value) -> Result<()> {
        let mut io = self.io.lock().await;
        let mut bytes = serde_json::to_vec(envelope).map_err(|e| Error::Protocol {
            server: self.server_name.clone(),
            source: e,
        })?;
        bytes.push(b'\n');
        io.stdin.write_all(&bytes).await.map_err(|e| Error::Io {
            server: self.server_name.clone(),
            source: e,
        })?;
        io.stdin.flush().await.map_err(|e| Error::Io {
            server: self.server_name.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Drives a tiny Python stdio MCP stub to exercise the real framing.
    /// Skipped if `python3` is unavailable in the build environment.
    #[tokio::test]
    async fn initialize_then_list_tools_against_a_stub_server() {
        if Command::new("python3").arg("--version").output().await.is_err() {
            return;
        }
        let script = r#"
import sys, json

def write(msg):
    sys.stdout.write(json.dumps(msg) + "\n")
    sys.stdout.flush()

for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    method = req.get("method")
    if method == "initialize":
        write({"jsonrpc": "2.0", "id": req["id"], "result": {"protocolVersion": "2025-06-18"}})
    elif method == "notifications/initialized":
        continue
    elif method == "tools/list":
        write({"jsonrpc": "2.0", "id": req["id"], "result": {"tools": [
            {"name": "echo", "description": "echoes input", "inputSchema": {"type": "object"}}
        ]}})
"#;
        let client = McpClient::spawn("stub", "python3", &["-c".to_string(), script.to_string()])
            .await
            .unwrap();
        let tools = client.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
        client.shutdown().await;
    }
}
