// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use crate::sandbox::RequestContext;

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// A single content item in a rich tool output.
#[derive(Debug, Clone)]
pub enum ToolOutputPart {
    Text(String),
    /// Base64 data URL: `data:<mime>;base64,<b64>`.
    Image(String),
}

/// The result of executing a tool. `content` is always the plain-text
/// representation (the concatenation of all `Text` parts) so callers that
/// don't care about images can ignore `parts` entirely.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    pub parts: Vec<ToolOutputPart>,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let text = content.into();
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: false,
        }
    }

    /// Error result. Per §4.3 every built-in operation returns an error
    /// string rather than unwinding — this only wraps that string, it never
    /// panics or propagates.
    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        let text = msg.into();
        let text = if text.starts_with("Error:") {
            text
        } else {
            format!("Error: {text}")
        };
        Self {
            call_id: call_id.into(),
            content: text.clone(),
            parts: vec![ToolOutputPart::Text(text)],
            is_error: true,
        }
    }

    pub fn with_parts(call_id: impl Into<String>, parts: Vec<ToolOutputPart>) -> Self {
        let text = parts
            .iter()
            .filter_map(|p| match p {
                ToolOutputPart::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n");
        Self {
            call_id: call_id.into(),
            content: text,
            parts,
            is_error: false,
        }
    }

    pub fn has_images(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, ToolOutputPart::Image(_)))
    }
}

/// Describes the shape of a tool's text output for context-aware truncation
/// in the output optimizer (§4.6). Each tool declares its own category;
/// `relaygate-core` never hard-codes tool names to pick a strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputCategory {
    /// Terminal/process output: keep head + tail lines (shell, VCS log).
    HeadTail,
    /// Ordered match list: keep the leading matches (grep, search).
    MatchList,
    /// File content: keep a head/tail window around a separator (read_file).
    FileContent,
    /// Hard-truncate at a character boundary.
    #[default]
    Generic,
}

/// Whether a tool's effects are observable beyond its own return value.
/// Mutating tools are excluded from the tool-output cache (§3) and force
/// sequential dispatch within their batch (§4.2 parallelism rule).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutating {
    Yes,
    No,
}

/// Trait every built-in tool implements. External tool-server results are
/// never routed through this trait — they're plain JSON-RPC responses
/// (`relaygate-mcp`); this is for the fixed built-in set of §4.3.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> Value;
    fn mutating(&self) -> Mutating {
        Mutating::No
    }
    fn output_category(&self) -> OutputCategory {
        OutputCategory::Generic
    }
    /// Execute the tool against `ctx`'s sandboxed project root. Errors are
    /// always wrapped in [`ToolOutput::err`], never propagated.
    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;

    struct MinimalTool;

    #[async_trait]
    impl Tool for MinimalTool {
        fn name(&self) -> &str {
            "minimal"
        }
        fn description(&self) -> &str {
            "a minimal tool"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &RequestContext) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    #[test]
    fn default_output_category_is_generic() {
        assert_eq!(MinimalTool.output_category(), OutputCategory::Generic);
    }

    #[test]
    fn default_mutating_is_no() {
        assert_eq!(MinimalTool.mutating(), Mutating::No);
    }

    #[test]
    fn err_prefixes_error_marker_once() {
        let out = ToolOutput::err("c1", "boom");
        assert_eq!(out.content, "Error: boom");
        let out2 = ToolOutput::err("c1", "Error: already prefixed");
        assert_eq!(out2.content, "Error: already prefixed");
    }

    #[tokio::test]
    async fn minimal_tool_executes() {
        let ctx = RequestContext::new(std::env::temp_dir());
        let call = ToolCall {
            id: "1".into(),
            name: "minimal".into(),
            args: json!({}),
        };
        let out = MinimalTool.execute(&call, &ctx).await;
        assert_eq!(out.content, "ok");
        assert!(!out.is_error);
    }
}
