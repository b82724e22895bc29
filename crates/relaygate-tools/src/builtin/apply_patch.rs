// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mutation group, patch half (§4.3): strips markdown fences from a
//! standard unified diff, writes it to a temp file, invokes the system
//! `patch -p1` from the project root, and scrubs any leftover `.orig`
//! files it leaves behind.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{Mutating, Tool, ToolCall, ToolOutput};

pub struct ApplyPatchTool;

#[async_trait]
impl Tool for ApplyPatchTool {
    fn name(&self) -> &str {
        "apply_patch"
    }

    fn description(&self) -> &str {
        "Applies a standard unified diff (as produced by `diff -u` or `git diff`) to the \
         project. Markdown code fences around the diff are stripped automatically."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "diff": {
                    "type": "string",
                    "description": "Unified diff text, optionally wrapped in a markdown code fence"
                }
            },
            "required": ["diff"]
        })
    }

    fn mutating(&self) -> Mutating {
        Mutating::Yes
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let diff = match call.args.get("diff").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'diff'"),
        };

        debug!("apply_patch tool");

        match apply_patch(&strip_markdown_fence(&diff), &ctx.project_root).await {
            Ok(summary) => ToolOutput::ok(&call.id, summary),
            Err(e) => ToolOutput::err(&call.id, format!("patch error: {e}")),
        }
    }
}

fn strip_markdown_fence(s: &str) -> String {
    let trimmed = s.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop an optional language tag on the opening fence line (```diff, ```patch, ...).
    let after_open = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    after_open
        .strip_suffix("```")
        .unwrap_or(after_open)
        .trim()
        .to_string()
}

async fn apply_patch(diff: &str, project_root: &std::path::Path) -> anyhow::Result<String> {
    if diff.trim().is_empty() {
        anyhow::bail!("diff is empty");
    }

    let mut patch_file = tempfile::NamedTempFile::new()?;
    use std::io::Write as _;
    patch_file.write_all(diff.as_bytes())?;
    patch_file.flush()?;

    let output = tokio::process::Command::new("patch")
        .arg("-p1")
        .arg("--no-backup-if-mismatch")
        .arg("-i")
        .arg(patch_file.path())
        .current_dir(project_root)
        .stdin(std::process::Stdio::null())
        .output()
        .await?;

    scrub_orig_files(project_root, diff);

    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let touched = touched_files(diff);
        if touched.is_empty() {
            Ok(stdout.trim().to_string())
        } else {
            Ok(touched.into_iter().map(|p| format!("M {p}")).collect::<Vec<_>>().join("\n"))
        }
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        anyhow::bail!("patch failed: {stderr}{stdout}")
    }
}

/// File paths named in `--- a/...` / `+++ b/...` headers, used only to build
/// the human-readable summary — `patch` itself determines what actually changes.
fn touched_files(diff: &str) -> Vec<String> {
    let mut files = Vec::new();
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix("+++ ") {
            let path = rest.trim().trim_start_matches("b/");
            if path != "/dev/null" && !files.contains(&path.to_string()) {
                files.push(path.to_string());
            }
        }
    }
    files
}

/// `patch` leaves a `.orig` backup next to any file it could only fuzzily
/// match; none are expected to survive a well-formed diff.
fn scrub_orig_files(project_root: &std::path::Path, diff: &str) {
    for path in touched_files(diff) {
        let orig = project_root.join(format!("{path}.orig"));
        let _ = std::fs::remove_file(orig);
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
