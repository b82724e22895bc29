// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Search group (§4.3): invokes the system's line-based grep tool, ripgrep
//! preferred, falling back to `grep`, capped at 100 results.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

const MAX_MATCHES: usize = 100;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Searches file contents for a regular expression pattern, capped at 100 results. \
         Uses ripgrep if available, falling back to grep."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "File or directory to search, relative to the project root (default '.')" },
                "case_sensitive": { "type": "boolean", "description": "Case-sensitive search (default true)" }
            },
            "required": ["pattern"]
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::MatchList
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'pattern'"),
        };
        let rel_path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let case_sensitive = call.args.get("case_sensitive").and_then(|v| v.as_bool()).unwrap_or(true);

        let resolved = match ctx.resolve_existing(rel_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        debug!(pattern = %pattern, path = %rel_path, "grep tool");

        match run_search(&pattern, &resolved, case_sensitive).await {
            Ok(output) if output.trim().is_empty() => ToolOutput::ok(&call.id, "(no matches)"),
            Ok(output) => ToolOutput::ok(&call.id, output),
            Err(e) => ToolOutput::err(&call.id, format!("grep error: {e}")),
        }
    }
}

async fn run_search(pattern: &str, path: &std::path::Path, case_sensitive: bool) -> anyhow::Result<String> {
    let has_rg = tokio::process::Command::new("which")
        .arg("rg")
        .stdin(std::process::Stdio::null())
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false);

    let output = if has_rg {
        let mut args = vec!["--color".into(), "never".into(), "--no-heading".into(), "--with-filename".into(), "--line-number".into()];
        if !case_sensitive {
            args.push("--ignore-case".into());
        }
        args.push(pattern.to_string());
        args.push(path.to_string_lossy().to_string());
        tokio::process::Command::new("rg").args(&args).stdin(std::process::Stdio::null()).output().await?
    } else {
        let mut args = vec!["-rn".to_string()];
        if !case_sensitive {
            args.push("-i".into());
        }
        args.push(pattern.to_string());
        args.push(path.to_string_lossy().to_string());
        tokio::process::Command::new("grep").args(&args).stdin(std::process::Stdio::null()).output().await?
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let total = stdout.lines().count();
    let mut result = stdout.lines().take(MAX_MATCHES).collect::<Vec<_>>().join("\n");
    if total > MAX_MATCHES {
        result.push_str(&format!("\n...[{} more matches not shown]", total - MAX_MATCHES));
    }
    Ok(result)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(dir: &std::path::Path) -> RequestContext {
        RequestContext::new(dir)
    }

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "g1".into(), name: "grep".into(), args }
    }

    #[tokio::test]
    async fn finds_pattern_in_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world\n").unwrap();
        let out = GrepTool.execute(&call(json!({"pattern":"world"})), &ctx(dir.path())).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("world"));
    }

    #[tokio::test]
    async fn no_match_returns_no_matches() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello\n").unwrap();
        let out = GrepTool.execute(&call(json!({"pattern":"xyzzy_nonexistent"})), &ctx(dir.path())).await;
        assert!(!out.is_error);
        assert!(out.content.contains("no matches"));
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = GrepTool.execute(&call(json!({})), &ctx(dir.path())).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn case_insensitive_search() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "Hello World\n").unwrap();
        let out = GrepTool
            .execute(&call(json!({"pattern":"hello","case_sensitive":false})), &ctx(dir.path()))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("Hello"));
    }

    #[tokio::test]
    async fn rejects_path_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let out = GrepTool.execute(&call(json!({"pattern":"x","path":"/etc"})), &ctx(dir.path())).await;
        assert!(out.is_error);
    }
}
