// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Code structure group (§4.3): for parseable source files, extract
//! top-level symbols (functions, classes) and their textual source
//! segments. No full per-language parser — a regex scan for common
//! declaration forms plus brace/indent matching to find each symbol's
//! extent, in the spirit of the Search group's line-based approach rather
//! than a dependency on a tree-sitter grammar set.
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{OutputCategory, Tool, ToolCall, ToolOutput};

pub struct CodeStructureTool;

#[async_trait]
impl Tool for CodeStructureTool {
    fn name(&self) -> &str {
        "code_structure"
    }

    fn description(&self) -> &str {
        "Extracts top-level functions and classes/structs from a source file, along with their \
         line ranges and source text. Supports Rust, Python, JavaScript/TypeScript, and Go."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Source file, relative to the project root" }
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
        let resolved = match ctx.resolve_existing(&path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };

        let ext = resolved.extension().and_then(|e| e.to_str()).unwrap_or("");
        let Some(lang) = Lang::from_extension(ext) else {
            return ToolOutput::err(&call.id, format!("unsupported file type: .{ext}"));
        };

        debug!(path = %path, "code_structure tool");

        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let symbols = extract_symbols(&text, lang);
        if symbols.is_empty() {
            return ToolOutput::ok(&call.id, "(no top-level symbols found)");
        }

        let rendered = symbols
            .iter()
            .map(|s| format!("=== {} `{}` (L{}-L{}) ===\n{}", s.kind, s.name, s.start_line, s.end_line, s.text))
            .collect::<Vec<_>>()
            .join("\n\n");
        ToolOutput::ok(&call.id, rendered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lang {
    Brace,
    Indent,
}

impl Lang {
    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" | "js" | "jsx" | "ts" | "tsx" | "go" | "java" | "c" | "h" | "cpp" | "hpp" | "cc" => {
                Some(Lang::Brace)
            }
            "py" => Some(Lang::Indent),
            _ => None,
        }
    }
}

struct Symbol {
    kind: &'static str,
    name: String,
    start_line: usize,
    end_line: usize,
    text: String,
}

fn declaration_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?x)
            ^\s*
            (?:pub(?:\([^)]*\))?\s+)?                    # Rust visibility
            (?:export\s+(?:default\s+)?)?                # JS/TS export
            (?:async\s+)?
            (?P<kind>fn|function|def|func|class|struct|enum|trait|interface)
            \s+
            (?P<name>[A-Za-z_][A-Za-z0-9_]*)
            ",
        )
        .unwrap()
    })
}

fn extract_symbols(text: &str, lang: Lang) -> Vec<Symbol> {
    let lines: Vec<&str> = text.lines().collect();
    let re = declaration_regex();
    let mut symbols = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        // Only top-level declarations: no leading whitespace for brace langs,
        // column 0 for indent langs too (nested defs are part of their parent's text).
        if line.starts_with(char::is_whitespace) {
            i += 1;
            continue;
        }
        if let Some(caps) = re.captures(line) {
            let kind = match &caps["kind"] {
                "fn" | "function" | "def" | "func" => "function",
                other => other,
            };
            let kind: &'static str = match kind {
                "function" => "function",
                "class" => "class",
                "struct" => "struct",
                "enum" => "enum",
                "trait" => "trait",
                "interface" => "interface",
                _ => "symbol",
            };
            let name = caps["name"].to_string();
            let end = match lang {
                Lang::Brace => find_brace_end(&lines, i),
                Lang::Indent => find_indent_end(&lines, i),
            };
            let text = lines[i..=end].join("\n");
            symbols.push(Symbol { kind, name, start_line: i + 1, end_line: end + 1, text });
            i = end + 1;
        } else {
            i += 1;
        }
    }
    symbols
}

fn find_brace_end(lines: &[&str], start: usize) -> usize {
    let mut depth = 0i32;
    let mut seen_open = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        for ch in line.chars() {
            match ch {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if seen_open && depth <= 0 {
            return start + offset;
        }
    }
    lines.len() - 1
}

fn find_indent_end(lines: &[&str], start: usize) -> usize {
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if !line.starts_with(char::is_whitespace) {
            return start + offset;
        }
    }
    lines.len() - 1
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
