// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool registry (§3): `tool_name -> (server_id, declaration)`, rebuilt
//! whenever the tool-server config reloads. The built-in server's fixed
//! set always wins a name collision — an external server can never shadow
//! a built-in tool.
use std::collections::HashMap;

use relaygate_model::ToolDeclaration;
use relaygate_tools::BuiltinTools;
use tracing::warn;

pub const BUILTIN_SERVER_ID: &str = "builtin";

#[derive(Debug, Clone)]
pub struct RegistryEntry {
    pub server_id: String,
    pub declaration: ToolDeclaration,
}

#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_builtins(builtin: &BuiltinTools) -> Self {
        let mut reg = Self::new();
        for schema in builtin.schemas() {
            reg.insert(
                BUILTIN_SERVER_ID,
                ToolDeclaration {
                    name: schema.name,
                    description: schema.description,
                    parameter_schema: schema.parameters,
                },
            );
        }
        reg
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        let mut decls: Vec<_> = self.entries.values().map(|e| e.declaration.clone()).collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registers a tool owned by an external server. A name already owned
    /// by another server (built-in or external) wins; the challenger is
    /// logged and dropped, never silently overwritten.
    pub fn insert_external(&mut self, server_id: &str, declaration: ToolDeclaration) {
        self.insert(server_id, declaration);
    }

    fn insert(&mut self, server_id: &str, declaration: ToolDeclaration) {
        if let Some(existing) = self.entries.get(&declaration.name) {
            warn!(
                tool = %declaration.name,
                owner = %existing.server_id,
                challenger = %server_id,
                "duplicate tool name from external server, keeping first registration"
            );
            return;
        }
        self.entries.insert(
            declaration.name.clone(),
            RegistryEntry {
                server_id: server_id.to_string(),
                declaration,
            },
        );
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str) -> ToolDeclaration {
        ToolDeclaration {
            name: name.to_string(),
            description: "d".into(),
            parameter_schema: serde_json::json!({"type":"object"}),
        }
    }

    #[test]
    fn from_builtins_registers_fixed_builtin_set() {
        let reg = ToolRegistry::from_builtins(&BuiltinTools::standard());
        assert!(reg.get("read_file").is_some());
        assert_eq!(reg.get("read_file").unwrap().server_id, BUILTIN_SERVER_ID);
    }

    #[test]
    fn external_tool_is_registered() {
        let mut reg = ToolRegistry::new();
        reg.insert_external("fs-server", decl("list_files"));
        let entry = reg.get("list_files").unwrap();
        assert_eq!(entry.server_id, "fs-server");
    }

    #[test]
    fn external_server_cannot_shadow_builtin() {
        let mut reg = ToolRegistry::from_builtins(&BuiltinTools::standard());
        reg.insert_external("rogue-server", decl("read_file"));
        assert_eq!(reg.get("read_file").unwrap().server_id, BUILTIN_SERVER_ID);
    }

    #[test]
    fn first_external_server_wins_a_collision() {
        let mut reg = ToolRegistry::new();
        reg.insert_external("server-a", decl("shared_tool"));
        reg.insert_external("server-b", decl("shared_tool"));
        assert_eq!(reg.get("shared_tool").unwrap().server_id, "server-a");
    }

    #[test]
    fn declarations_are_sorted_by_name() {
        let mut reg = ToolRegistry::new();
        reg.insert_external("s", decl("zeta"));
        reg.insert_external("s", decl("alpha"));
        let names: Vec<_> = reg.declarations().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
