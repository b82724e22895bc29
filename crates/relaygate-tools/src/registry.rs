// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The built-in tool server: a fixed set of handlers (§4.3) exposed under
//! one name -> implementation map. `relaygate-mcp` unions this with whatever
//! external `Process`/`Http` servers are configured to build the full
//! `ToolRegistry` the data model describes.
use std::collections::HashMap;
use std::sync::Arc;

use crate::sandbox::RequestContext;
use crate::tool::{Mutating, Tool, ToolCall, ToolOutput};

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub struct BuiltinTools {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl BuiltinTools {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// The fixed built-in set of §4.3, registered in one place.
    pub fn standard() -> Self {
        let mut reg = Self::new();
        reg.register(crate::builtin::list_dir::ListDirTool);
        reg.register(crate::builtin::read_file::ReadFileTool);
        reg.register(crate::builtin::read_file::DiffFilesTool);
        reg.register(crate::builtin::code_structure::CodeStructureTool);
        reg.register(crate::builtin::grep::GrepTool);
        reg.register(crate::builtin::vcs::VcsTool);
        reg.register(crate::builtin::write::CreateFileTool);
        reg.register(crate::builtin::write::WriteFileTool);
        reg.register(crate::builtin::apply_patch::ApplyPatchTool);
        reg.register(crate::builtin::shell::ShellTool::default());
        reg
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn is_mutating(&self, name: &str) -> bool {
        self.tools
            .get(name)
            .map(|t| t.mutating() == Mutating::Yes)
            .unwrap_or(false)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .values()
            .map(|t| ToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call, ctx).await,
            None => ToolOutput::err(&call.id, format!("unknown tool: {}", call.name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }
}

impl Default for BuiltinTools {
    fn default() -> Self {
        Self::standard()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::tool::{Tool, ToolCall, ToolOutput};

    struct EchoTool {
        name: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &RequestContext) -> ToolOutput {
            ToolOutput::ok(&call.id, format!("echo:{}", call.args))
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::new(std::env::temp_dir())
    }

    #[test]
    fn register_and_get() {
        let mut reg = BuiltinTools::new();
        reg.register(EchoTool { name: "echo" });
        assert!(reg.get("echo").is_some());
    }

    #[test]
    fn get_unknown_returns_none() {
        let reg = BuiltinTools::new();
        assert!(reg.get("nope").is_none());
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = BuiltinTools::new();
        reg.register(EchoTool { name: "echo" });
        let call = ToolCall {
            id: "1".into(),
            name: "echo".into(),
            args: json!({"x":1}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_returns_error() {
        let reg = BuiltinTools::new();
        let call = ToolCall {
            id: "x".into(),
            name: "missing".into(),
            args: json!({}),
        };
        let out = reg.execute(&call, &ctx()).await;
        assert!(out.is_error);
        assert!(out.content.contains("unknown tool"));
    }

    #[test]
    fn standard_registers_fixed_builtin_set() {
        let reg = BuiltinTools::standard();
        for expected in [
            "list_dir",
            "read_file",
            "diff_files",
            "code_structure",
            "grep",
            "vcs",
            "create_file",
            "write_file",
            "apply_patch",
            "shell",
        ] {
            assert!(reg.get(expected).is_some(), "missing builtin: {expected}");
        }
    }

    #[test]
    fn mutating_tools_are_flagged() {
        let reg = BuiltinTools::standard();
        assert!(reg.is_mutating("write_file"));
        assert!(reg.is_mutating("create_file"));
        assert!(reg.is_mutating("apply_patch"));
        assert!(reg.is_mutating("shell"));
        assert!(!reg.is_mutating("read_file"));
        assert!(!reg.is_mutating("grep"));
    }
}
