// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! External tool-server configuration (§3): each entry names a `Process`
//! server (a subprocess speaking JSON-RPC over stdio) or an `Http` server
//! (single-shot JSON-RPC POST). Loaded from the file at
//! `relaygate_config::ToolsConfig::mcp_config_path`.
use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context as _};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_priority() -> i32 {
    0
}

/// One configured external tool server. The invariant that each server
/// owns a disjoint set of tool names is enforced by the registry at
/// probe time, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolServerConfig {
    Process(ProcessServerConfig),
    Http(HttpServerConfig),
}

impl ToolServerConfig {
    pub fn enabled(&self) -> bool {
        match self {
            ToolServerConfig::Process(p) => p.enabled,
            ToolServerConfig::Http(h) => h.enabled,
        }
    }

    /// Higher priority servers are probed (and therefore win name
    /// collisions) first. `Http` servers have no ordering knob of their
    /// own and sort after every `Process` server with priority >= 0.
    pub fn priority(&self) -> i32 {
        match self {
            ToolServerConfig::Process(p) => p.priority,
            ToolServerConfig::Http(_) => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessServerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// On-disk shape of the tool server registry file: server id -> config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolServersFile {
    #[serde(default)]
    pub servers: HashMap<String, ToolServerConfig>,
}

pub fn load(path: &Path) -> anyhow::Result<ToolServersFile> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading tool server config {}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| anyhow!("parsing tool server config {}: {e}", path.display()))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_process_and_http_servers() {
        let json = r#"{
            "servers": {
                "fs": { "type": "process", "command": "fs-tool-server", "args": ["--stdio"] },
                "search": { "type": "http", "url": "https://example.com/rpc" }
            }
        }"#;
        let file: ToolServersFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.servers.len(), 2);
        assert!(file.servers["fs"].enabled());
        assert!(matches!(file.servers["fs"], ToolServerConfig::Process(_)));
        assert!(matches!(file.servers["search"], ToolServerConfig::Http(_)));
    }

    #[test]
    fn disabled_flag_round_trips() {
        let json = r#"{"servers":{"x":{"type":"process","command":"c","enabled":false}}}"#;
        let file: ToolServersFile = serde_json::from_str(json).unwrap();
        assert!(!file.servers["x"].enabled());
    }

    #[test]
    fn process_priority_defaults_to_zero() {
        let json = r#"{"servers":{"x":{"type":"process","command":"c"}}}"#;
        let file: ToolServersFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.servers["x"].priority(), 0);
    }

    #[test]
    fn load_missing_file_errors() {
        let err = load(Path::new("/nonexistent/mcp.json")).unwrap_err();
        assert!(err.to_string().contains("reading"));
    }

    #[test]
    fn load_parses_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mcp.json");
        std::fs::write(&path, r#"{"servers":{"x":{"type":"http","url":"https://x"}}}"#).unwrap();
        let file = load(&path).unwrap();
        assert_eq!(file.servers.len(), 1);
    }
}
