// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Mutation group, create/write half (§4.3): two distinct operations —
//! create a file that must not already exist, and overwrite a file that
//! must already exist — rather than a single overwrite-or-create tool with
//! an `append` flag.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{Mutating, Tool, ToolCall, ToolOutput};

fn path_arg(call: &ToolCall) -> Result<String, ToolOutput> {
    call.args
        .get("path")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ToolOutput::err(&call.id, "missing required parameter 'path'"))
}

fn content_arg(call: &ToolCall) -> Result<String, ToolOutput> {
    call.args
        .get("content")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| ToolOutput::err(&call.id, "missing required parameter 'content'"))
}

pub struct CreateFileTool;

#[async_trait]
impl Tool for CreateFileTool {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Creates a new file with the given content. Fails if the path already exists."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root" },
                "content": { "type": "string", "description": "Content to write to the new file" }
            },
            "required": ["path", "content"]
        })
    }

    fn mutating(&self) -> Mutating {
        Mutating::Yes
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let path = match path_arg(call) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match content_arg(call) {
            Ok(c) => c,
            Err(e) => return e,
        };
        let resolved = match ctx.resolve(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        if resolved.exists() {
            return ToolOutput::err(&call.id, format!("{path} already exists"));
        }
        debug!(path = %path, "create_file tool");
        if let Some(parent) = resolved.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err(&call.id, format!("create error: {e}"));
            }
        }
        match tokio::fs::write(&resolved, &content).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("created {path} ({} bytes)", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("create error: {e}")),
        }
    }
}

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Overwrites an existing file's content. Fails if the path does not already exist — use \
         create_file for new files."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root" },
                "content": { "type": "string", "description": "New content for the file" }
            },
            "required": ["path", "content"]
        })
    }

    fn mutating(&self) -> Mutating {
        Mutating::Yes
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let path = match path_arg(call) {
            Ok(p) => p,
            Err(e) => return e,
        };
        let content = match content_arg(call) {
            Ok(c) => c,
            Err(e) => return e,
        };
        let resolved = match ctx.resolve_existing(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        debug!(path = %path, "write_file tool");
        match tokio::fs::write(&resolved, &content).await {
            Ok(_) => ToolOutput::ok(&call.id, format!("wrote {path} ({} bytes)", content.len())),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
