// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! VCS read group (§4.3): status/log/diff/show/blame/list-recent, shelled
//! out to `git` with sanitized arguments from the project root — the same
//! no-shell-interpolation subprocess pattern the shell tool uses, but with
//! a fixed argv per sub-command instead of a user-supplied command line.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

pub struct VcsTool;

#[async_trait]
impl Tool for VcsTool {
    fn name(&self) -> &str {
        "vcs"
    }

    fn description(&self) -> &str {
        "Reads version-control state: status, log, diff, show, blame, or list-recent. \
         Never mutates the repository."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["status", "log", "diff", "show", "blame", "list_recent"],
                    "description": "Which read-only VCS operation to run"
                },
                "path": { "type": "string", "description": "File path argument, for diff/show/blame" },
                "revision": { "type": "string", "description": "Revision/commit for show/diff" },
                "limit": { "type": "integer", "description": "Max entries for log/list_recent (default 20)" }
            },
            "required": ["action"]
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::HeadTail
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let action = match call.args.get("action").and_then(|v| v.as_str()) {
            Some(a) => a.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'action'"),
        };
        let path = call.args.get("path").and_then(|v| v.as_str()).map(str::to_string);
        let revision = call.args.get("revision").and_then(|v| v.as_str()).map(str::to_string);
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).unwrap_or(20).to_string();

        let resolved_path = match &path {
            Some(p) => match ctx.resolve_existing(p) {
                Ok(resolved) => Some(resolved),
                Err(e) => return ToolOutput::err(&call.id, e.to_string()),
            },
            None => None,
        };

        let args: Vec<String> = match action.as_str() {
            "status" => vec!["status".into(), "--short".into()],
            "log" => vec!["log".into(), format!("-{limit}"), "--oneline".into()],
            "list_recent" => vec![
                "log".into(),
                format!("-{limit}"),
                "--name-only".into(),
                "--pretty=format:%h %ad %s".into(),
                "--date=short".into(),
            ],
            "diff" => {
                let mut a = vec!["diff".into()];
                if let Some(rev) = &revision {
                    a.push(rev.clone());
                }
                if let Some(p) = &resolved_path {
                    a.push("--".into());
                    a.push(p.to_string_lossy().into_owned());
                }
                a
            }
            "show" => {
                let rev = revision.clone().unwrap_or_else(|| "HEAD".to_string());
                let mut a = vec!["show".into()];
                match &resolved_path {
                    Some(p) => a.push(format!("{rev}:{}", p.to_string_lossy())),
                    None => a.push(rev),
                }
                a
            }
            "blame" => {
                let Some(p) = &resolved_path else {
                    return ToolOutput::err(&call.id, "blame requires 'path'");
                };
                vec!["blame".into(), "--".into(), p.to_string_lossy().into_owned()]
            }
            other => return ToolOutput::err(&call.id, format!("unknown action: {other}")),
        };

        debug!(action = %action, "vcs tool");

        match run_git(&ctx.project_root, &args).await {
            Ok(output) if output.trim().is_empty() => ToolOutput::ok(&call.id, "(no output)"),
            Ok(output) => ToolOutput::ok(&call.id, output),
            Err(e) => ToolOutput::err(&call.id, format!("vcs error: {e}")),
        }
    }
}

async fn run_git(project_root: &std::path::Path, args: &[String]) -> anyhow::Result<String> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(project_root)
        .stdin(std::process::Stdio::null())
        .output()
        .await?;
    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        anyhow::bail!(String::from_utf8_lossy(&output.stderr).into_owned())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
