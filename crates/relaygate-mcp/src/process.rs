// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! External Process tool-server pool (§4.2.1): exactly one live subprocess
//! per configured server, guarded by a per-server lock. Spawned on first
//! use or after the previous instance is found dead; torn down whenever
//! the caller drops the pool (config reload builds a fresh one).
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context as _};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ProcessServerConfig;

const CALL_TIMEOUT: Duration = Duration::from_secs(120);

struct ServerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    handshake_complete: bool,
    last_used: Instant,
    next_id: u64,
}

impl ServerProcess {
    async fn spawn(cfg: &ProcessServerConfig) -> anyhow::Result<Self> {
        let mut cmd = tokio::process::Command::new(&cfg.command);
        cmd.args(&cfg.args);
        cmd.envs(&cfg.env);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning tool server `{}`", cfg.command))?;

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("child has no stdin"))?;
        let stdout = BufReader::new(child.stdout.take().ok_or_else(|| anyhow!("child has no stdout"))?);
        let stderr = child.stderr.take().ok_or_else(|| anyhow!("child has no stderr"))?;

        // Stderr is drained on its own task for the process lifetime,
        // independent of the call cycle — a chatty server filling its
        // stderr pipe must never block a stdout read.
        let label = cfg.command.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(server = %label, "tool server stderr: {line}");
            }
        });

        Ok(Self {
            child,
            stdin,
            stdout,
            handshake_complete: false,
            last_used: Instant::now(),
            next_id: 0,
        })
    }

    fn alloc_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    async fn write_message(&mut self, msg: &Value) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(msg)?;
        line.push('\n');
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    /// Reads stdout lines until one decodes as a JSON object carrying the
    /// given `id`. Lines that aren't valid JSON, or are JSON but addressed
    /// to a stale call, are logged and skipped.
    async fn read_response(&mut self, id: u64) -> anyhow::Result<Value> {
        loop {
            let mut line = String::new();
            let n = self.stdout.read_line(&mut line).await?;
            if n == 0 {
                anyhow::bail!("tool server closed stdout");
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                debug!("tool server stdout (non-JSON): {trimmed}");
                continue;
            };
            if value.get("id").and_then(Value::as_u64) == Some(id) {
                return Ok(value);
            }
        }
    }

    async fn ensure_handshake(&mut self) -> anyhow::Result<()> {
        if self.handshake_complete {
            return Ok(());
        }
        let id = self.alloc_id();
        self.write_message(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "relaygate", "version": env!("CARGO_PKG_VERSION") }
            }
        }))
        .await?;
        let resp = self.read_response(id).await?;
        crate::rpc::extract_result(&resp)?;
        self.write_message(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
            .await?;
        self.handshake_complete = true;
        Ok(())
    }

    async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        self.ensure_handshake().await?;
        let id = self.alloc_id();
        self.write_message(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))
            .await?;
        let resp = self.read_response(id).await?;
        self.last_used = Instant::now();
        crate::rpc::extract_result(&resp)
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Pool of at most one live subprocess per configured `Process` server.
pub struct ProcessPool {
    servers: Mutex<HashMap<String, Arc<Mutex<Option<ServerProcess>>>>>,
}

impl ProcessPool {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, server_id: &str) -> Arc<Mutex<Option<ServerProcess>>> {
        let mut servers = self.servers.lock().await;
        servers
            .entry(server_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Runs `method`/`params` against `server_id`, spawning or relaunching
    /// the subprocess as needed. The slot's lock is held for the whole
    /// call, so at most one call is ever in flight per process.
    pub async fn call(
        &self,
        server_id: &str,
        cfg: &ProcessServerConfig,
        method: &str,
        params: Value,
    ) -> anyhow::Result<Value> {
        let slot = self.slot(server_id).await;
        let mut guard = slot.lock().await;

        if let Some(proc) = guard.as_mut() {
            if !proc.is_alive() {
                warn!(server = %server_id, "tool server process died, respawning");
                *guard = None;
            }
        }
        if guard.is_none() {
            *guard = Some(ServerProcess::spawn(cfg).await?);
        }

        let proc = guard.as_mut().expect("just populated above");
        match tokio::time::timeout(CALL_TIMEOUT, proc.request(method, params)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                // A protocol-level failure likely means a corrupt stream —
                // drop the process so the next call starts clean.
                *guard = None;
                Err(e)
            }
            Err(_) => {
                *guard = None;
                Err(anyhow!("tool server `{server_id}` timed out after {CALL_TIMEOUT:?}"))
            }
        }
    }
}

impl Default for ProcessPool {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
//
// Exercises the pool against a tiny line-oriented JSON-RPC echo server
// implemented as a `python3` script, since the process-pool logic is
// agnostic to what's on the other end of the pipe.

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_server_script() -> &'static str {
        r#"
import json, sys
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    method = req.get("method")
    if method == "notifications/initialized":
        continue
    resp = {"jsonrpc": "2.0", "id": req.get("id")}
    if method == "initialize":
        resp["result"] = {"protocolVersion": "2024-11-05"}
    elif method == "tools/list":
        resp["result"] = {"tools": [{"name": "echo", "description": "echoes", "inputSchema": {"type": "object"}}]}
    elif method == "tools/call":
        resp["result"] = {"echoed": req.get("params", {}).get("arguments")}
    else:
        resp["error"] = {"code": -1, "message": f"unknown method {method}"}
    sys.stdout.write(json.dumps(resp) + "\n")
    sys.stdout.flush()
"#
    }

    fn cfg() -> ProcessServerConfig {
        ProcessServerConfig {
            command: "python3".into(),
            args: vec!["-c".into(), echo_server_script().into()],
            env: HashMap::new(),
            priority: 0,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn handshake_then_tools_list_succeeds() {
        let pool = ProcessPool::new();
        let result = pool.call("echo", &cfg(), "tools/list", json!({})).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
    }

    #[tokio::test]
    async fn tools_call_round_trips_arguments() {
        let pool = ProcessPool::new();
        let result = pool
            .call("echo", &cfg(), "tools/call", json!({"name": "echo", "arguments": {"x": 1}}))
            .await
            .unwrap();
        assert_eq!(result["echoed"], json!({"x": 1}));
    }

    #[tokio::test]
    async fn reuses_process_across_calls() {
        let pool = ProcessPool::new();
        pool.call("echo", &cfg(), "tools/list", json!({})).await.unwrap();
        let slot = pool.slot("echo").await;
        let pid_before = slot.lock().await.as_ref().unwrap().child.id();
        pool.call("echo", &cfg(), "tools/list", json!({})).await.unwrap();
        let pid_after = slot.lock().await.as_ref().unwrap().child.id();
        assert_eq!(pid_before, pid_after);
    }

    #[tokio::test]
    async fn respawns_after_process_is_killed() {
        let pool = ProcessPool::new();
        pool.call("echo", &cfg(), "tools/list", json!({})).await.unwrap();
        let slot = pool.slot("echo").await;
        {
            let mut guard = slot.lock().await;
            guard.as_mut().unwrap().child.kill().await.unwrap();
            guard.as_mut().unwrap().child.wait().await.unwrap();
        }
        let result = pool.call("echo", &cfg(), "tools/list", json!({})).await.unwrap();
        assert_eq!(result["tools"][0]["name"], "echo");
    }
}
