// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Read group (§4.3): read a file (capped, with binary detection), read a
//! line range, and compare two files as a unified diff.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

/// Hard byte ceiling per §4.3's Read group.
const MAX_BYTES: usize = 256 * 1024;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a file, capped at 256 KiB. Binary files (detected by a null-byte heuristic) are \
         rejected rather than rendered. Optionally restrict to a 1-indexed line range with \
         offset/limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the project root" },
                "offset": { "type": "integer", "description": "1-indexed line number to start reading from" },
                "limit": { "type": "integer", "description": "Maximum number of lines to return" }
            },
            "required": ["path"]
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1).max(1) as usize;
        let limit = call.args.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        debug!(path = %path, offset, "read_file tool");

        let resolved = match ctx.resolve_existing(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let bytes = match tokio::fs::read(&resolved).await {
            Ok(b) => b,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        if has_binary_content(&bytes) {
            return ToolOutput::err(&call.id, format!("{path} looks like a binary file"));
        }
        let truncated_bytes = bytes.len() > MAX_BYTES;
        let bytes = if truncated_bytes { &bytes[..MAX_BYTES] } else { &bytes[..] };
        let text = String::from_utf8_lossy(bytes);

        let lines: Vec<&str> = text.lines().collect();
        let start = offset.saturating_sub(1).min(lines.len());
        let end = match limit {
            Some(n) => (start + n).min(lines.len()),
            None => lines.len(),
        };
        let mut out = lines[start..end]
            .iter()
            .enumerate()
            .map(|(i, l)| format!("L{}:{l}", start + i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        if end < lines.len() {
            out.push_str(&format!("\n...[{} more lines, next offset {}]", lines.len() - end, end + 1));
        }
        if truncated_bytes {
            out.push_str(&format!("\n...[file truncated at {MAX_BYTES} bytes]"));
        }
        ToolOutput::ok(&call.id, out)
    }
}

/// Heuristic shared with the Navigation group: a null byte in the first 8 KiB
/// is treated as a reliable binary signal.
pub(crate) fn has_binary_content(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

pub struct DiffFilesTool;

#[async_trait]
impl Tool for DiffFilesTool {
    fn name(&self) -> &str {
        "diff_files"
    }

    fn description(&self) -> &str {
        "Compares two files and returns a unified diff."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path_a": { "type": "string", "description": "First file, relative to the project root" },
                "path_b": { "type": "string", "description": "Second file, relative to the project root" }
            },
            "required": ["path_a", "path_b"]
        })
    }

    fn output_category(&self) -> OutputCategory {
        OutputCategory::FileContent
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let path_a = match call.args.get("path_a").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path_a'"),
        };
        let path_b = match call.args.get("path_b").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'path_b'"),
        };

        let resolved_a = match ctx.resolve_existing(&path_a) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        let resolved_b = match ctx.resolve_existing(&path_b) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let text_a = match tokio::fs::read_to_string(&resolved_a).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };
        let text_b = match tokio::fs::read_to_string(&resolved_b).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let diff = similar::TextDiff::from_lines(&text_a, &text_b)
            .unified_diff()
            .header(&path_a, &path_b)
            .to_string();

        if diff.trim().is_empty() {
            ToolOutput::ok(&call.id, "(no differences)")
        } else {
            ToolOutput::ok(&call.id, diff)
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(dir: &std::path::Path) -> RequestContext {
        RequestContext::new(dir)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall { id: "r1".into(), name: name.into(), args }
    }

    #[tokio::test]
    async fn reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\n").unwrap();
        let out = ReadFileTool.execute(&call("read_file", json!({"path":"a.txt"})), &ctx(dir.path())).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("L1:one"));
        assert!(out.content.contains("L3:three"));
    }

    #[tokio::test]
    async fn reads_line_range() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let out = ReadFileTool
            .execute(&call("read_file", json!({"path":"a.txt","offset":2,"limit":1})), &ctx(dir.path()))
            .await;
        assert!(out.content.contains("L2:two"));
        assert!(!out.content.contains("L1:one"));
        assert!(out.content.contains("next offset"));
    }

    #[tokio::test]
    async fn rejects_binary_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), [0u8, 1, 2, 0, 3]).unwrap();
        let out = ReadFileTool.execute(&call("read_file", json!({"path":"bin.dat"})), &ctx(dir.path())).await;
        assert!(out.is_error);
        assert!(out.content.contains("binary"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ReadFileTool.execute(&call("read_file", json!({"path":"nope.txt"})), &ctx(dir.path())).await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn rejects_path_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let out = ReadFileTool
            .execute(&call("read_file", json!({"path":"../../etc/passwd"})), &ctx(dir.path()))
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn diff_files_reports_no_differences() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "same\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "same\n").unwrap();
        let out = DiffFilesTool
            .execute(&call("diff_files", json!({"path_a":"a.txt","path_b":"b.txt"})), &ctx(dir.path()))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("no differences"));
    }

    #[tokio::test]
    async fn diff_files_produces_unified_diff() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "one\nTWO\n").unwrap();
        let out = DiffFilesTool
            .execute(&call("diff_files", json!({"path_a":"a.txt","path_b":"b.txt"})), &ctx(dir.path()))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("-two"));
        assert!(out.content.contains("+TWO"));
    }
}
