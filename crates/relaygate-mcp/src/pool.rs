// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Top-level external tool-server pool (§3, §4.2.1): unions the built-in
//! tool set with whatever `Process`/`Http` servers are configured, and
//! dispatches calls to whichever server owns the name.
use std::collections::HashMap;

use anyhow::anyhow;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use relaygate_model::ToolDeclaration;
use relaygate_tools::BuiltinTools;

use crate::coerce::coerce_arguments;
use crate::config::ToolServerConfig;
use crate::http_client;
use crate::process::ProcessPool;
use crate::registry::{ToolRegistry, BUILTIN_SERVER_ID};

pub struct ToolServerPool {
    http: Client,
    processes: ProcessPool,
    servers: RwLock<HashMap<String, ToolServerConfig>>,
    registry: RwLock<ToolRegistry>,
}

impl ToolServerPool {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            processes: ProcessPool::new(),
            servers: RwLock::new(HashMap::new()),
            registry: RwLock::new(ToolRegistry::new()),
        }
    }

    /// Rebuilds the registry: union built-ins with a `tools/list` probe of
    /// every enabled external server, highest `priority` first. A server
    /// that fails to probe is skipped with a warning rather than failing
    /// the whole reload; disabled servers and their stale entries are
    /// simply absent from the new registry.
    pub async fn reload(&self, servers: HashMap<String, ToolServerConfig>, builtin: &BuiltinTools) {
        let mut registry = ToolRegistry::from_builtins(builtin);

        let mut ordered: Vec<(&String, &ToolServerConfig)> =
            servers.iter().filter(|(_, cfg)| cfg.enabled()).collect();
        ordered.sort_by_key(|(_, cfg)| std::cmp::Reverse(cfg.priority()));

        for (server_id, cfg) in ordered {
            match self.list_tools(server_id, cfg).await {
                Ok(decls) => {
                    for decl in decls {
                        registry.insert_external(server_id, decl);
                    }
                }
                Err(e) => warn!(server = %server_id, error = %e, "failed to probe tool server, skipping"),
            }
        }

        *self.servers.write().await = servers;
        *self.registry.write().await = registry;
    }

    async fn list_tools(
        &self,
        server_id: &str,
        cfg: &ToolServerConfig,
    ) -> anyhow::Result<Vec<ToolDeclaration>> {
        let result = match cfg {
            ToolServerConfig::Process(p) => {
                self.processes.call(server_id, p, "tools/list", serde_json::json!({})).await?
            }
            ToolServerConfig::Http(h) => {
                http_client::call(&self.http, h, "tools/list", serde_json::json!({}), 1).await?
            }
        };
        let tools = result.get("tools").and_then(Value::as_array).cloned().unwrap_or_default();
        Ok(tools
            .into_iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                let description =
                    t.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
                let parameter_schema =
                    t.get("inputSchema").cloned().unwrap_or_else(|| serde_json::json!({"type":"object"}));
                Some(ToolDeclaration { name, description, parameter_schema })
            })
            .collect())
    }

    pub async fn declarations(&self) -> Vec<ToolDeclaration> {
        self.registry.read().await.declarations()
    }

    pub async fn is_known(&self, name: &str) -> bool {
        self.registry.read().await.get(name).is_some()
    }

    /// Dispatches `name(args)` to the external server that owns it.
    /// Built-in names are never routed here — the tool dispatcher checks
    /// `BuiltinTools::get` first and only falls through to this call for
    /// names the built-in set doesn't own.
    pub async fn call(&self, name: &str, args: Value) -> anyhow::Result<Value> {
        let (server_id, input_schema) = {
            let registry = self.registry.read().await;
            let entry = registry.get(name).ok_or_else(|| anyhow!("unknown tool: {name}"))?;
            (entry.server_id.clone(), entry.declaration.parameter_schema.clone())
        };
        if server_id == BUILTIN_SERVER_ID {
            return Err(anyhow!("tool `{name}` is a built-in, not an external server call"));
        }

        let coerced = coerce_arguments(&args, &input_schema);
        let cfg = {
            let servers = self.servers.read().await;
            servers
                .get(&server_id)
                .cloned()
                .ok_or_else(|| anyhow!("server `{server_id}` not configured"))?
        };

        let params = serde_json::json!({ "name": name, "arguments": coerced });
        debug!(tool = %name, server = %server_id, "dispatching external tool call");
        match &cfg {
            ToolServerConfig::Process(p) => self.processes.call(&server_id, p, "tools/call", params).await,
            ToolServerConfig::Http(h) => http_client::call(&self.http, h, "tools/call", params, 1).await,
        }
    }
}

impl Default for ToolServerPool {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpServerConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn fake_http_server(list_body: &'static str, call_body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let mut buf = vec![0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    return;
                }
                let req = String::from_utf8_lossy(&buf[..n]);
                let body = if req.contains("tools/list") { list_body } else { call_body };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}/rpc")
    }

    #[tokio::test]
    async fn reload_unions_builtins_and_external_server() {
        let url = fake_http_server(
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"web_search","description":"searches the web","inputSchema":{"type":"object"}}]}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{"hits":[]}}"#,
        )
        .await;

        let pool = ToolServerPool::new();
        let mut servers = HashMap::new();
        servers.insert(
            "search".to_string(),
            ToolServerConfig::Http(HttpServerConfig { url, headers: HashMap::new(), enabled: true }),
        );
        pool.reload(servers, &BuiltinTools::standard()).await;

        assert!(pool.is_known("read_file").await);
        assert!(pool.is_known("web_search").await);
        assert!(!pool.is_known("nonexistent").await);
    }

    #[tokio::test]
    async fn call_routes_to_external_server() {
        let url = fake_http_server(
            r#"{"jsonrpc":"2.0","id":1,"result":{"tools":[{"name":"web_search","description":"d","inputSchema":{"type":"object"}}]}}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":{"hits":["a"]}}"#,
        )
        .await;

        let pool = ToolServerPool::new();
        let mut servers = HashMap::new();
        servers.insert(
            "search".to_string(),
            ToolServerConfig::Http(HttpServerConfig { url, headers: HashMap::new(), enabled: true }),
        );
        pool.reload(servers, &BuiltinTools::standard()).await;

        let result = pool.call("web_search", serde_json::json!({"query": "rust"})).await.unwrap();
        assert_eq!(result["hits"], serde_json::json!(["a"]));
    }

    #[tokio::test]
    async fn call_on_builtin_name_errors() {
        let pool = ToolServerPool::new();
        pool.reload(HashMap::new(), &BuiltinTools::standard()).await;
        let err = pool.call("read_file", serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("built-in"));
    }

    #[tokio::test]
    async fn call_on_unknown_name_errors() {
        let pool = ToolServerPool::new();
        pool.reload(HashMap::new(), &BuiltinTools::standard()).await;
        let err = pool.call("nonexistent", serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("unknown tool"));
    }

    #[tokio::test]
    async fn disabled_server_is_excluded_from_registry() {
        let pool = ToolServerPool::new();
        let mut servers = HashMap::new();
        servers.insert(
            "search".to_string(),
            ToolServerConfig::Http(HttpServerConfig {
                url: "http://127.0.0.1:1".into(),
                headers: HashMap::new(),
                enabled: false,
            }),
        );
        pool.reload(servers, &BuiltinTools::standard()).await;
        assert!(!pool.is_known("web_search").await);
    }
}
