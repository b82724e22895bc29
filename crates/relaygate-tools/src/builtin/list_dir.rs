// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Navigation group (§4.3): an ASCII directory tree capped at 500 files,
//! skipping VCS directories, vendored dependencies, build artifacts, and
//! binary file extensions by default, augmented by a project-local ignore
//! file.
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::sandbox::RequestContext;
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_FILES: usize = 500;
const IGNORE_FILE_NAME: &str = ".relaygateignore";

static DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "target",
    "node_modules",
    "vendor",
    "dist",
    "build",
    "__pycache__",
    ".mypy_cache",
    ".venv",
];

static DEFAULT_IGNORED_EXTENSIONS: &[&str] = &[
    "so", "dylib", "dll", "a", "o", "obj", "exe", "bin", "png", "jpg", "jpeg", "gif", "ico",
    "pdf", "zip", "tar", "gz", "class", "pyc",
];

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "Renders an ASCII directory tree rooted at the given path (default the project root), \
         capped at 500 files. Skips VCS directories, vendored dependencies, build artifacts, \
         and binary file extensions."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the project root (default '.')"
                }
            }
        })
    }

    async fn execute(&self, call: &ToolCall, ctx: &RequestContext) -> ToolOutput {
        let rel_path = call.args.get("path").and_then(|v| v.as_str()).unwrap_or(".");
        let root = match ctx.resolve_existing(rel_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e.to_string()),
        };
        if !root.is_dir() {
            return ToolOutput::err(&call.id, format!("not a directory: {rel_path}"));
        }

        debug!(path = %rel_path, "list_dir tool");

        let extra_ignores = load_ignore_file(&ctx.project_root);
        let mut count = 0usize;
        let mut truncated = false;
        let mut lines = vec![root_label(&root)];
        walk(&root, "", &extra_ignores, &mut count, &mut truncated, &mut lines);

        if truncated {
            lines.push(format!("... [truncated at {MAX_FILES} files]"));
        }
        ToolOutput::ok(&call.id, lines.join("\n"))
    }
}

fn root_label(root: &std::path::Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| ".".to_string())
}

fn load_ignore_file(project_root: &std::path::Path) -> Vec<String> {
    std::fs::read_to_string(project_root.join(IGNORE_FILE_NAME))
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn is_ignored_dir(name: &str, extra: &[String]) -> bool {
    DEFAULT_IGNORED_DIRS.contains(&name) || extra.iter().any(|p| p == name)
}

fn is_ignored_file(name: &str, extra: &[String]) -> bool {
    if extra.iter().any(|p| p == name) {
        return true;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => DEFAULT_IGNORED_EXTENSIONS.contains(&ext),
        None => false,
    }
}

fn walk(
    dir: &std::path::Path,
    prefix: &str,
    extra_ignores: &[String],
    count: &mut usize,
    truncated: &mut bool,
    lines: &mut Vec<String>,
) {
    if *truncated {
        return;
    }
    let mut children: Vec<(String, bool)> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok())
            .map(|e| {
                let is_dir = e.file_type().map(|t| t.is_dir()).unwrap_or(false);
                (e.file_name().to_string_lossy().to_string(), is_dir)
            })
            .collect(),
        Err(_) => return,
    };
    children.retain(|(name, is_dir)| {
        if *is_dir {
            !is_ignored_dir(name, extra_ignores)
        } else {
            !is_ignored_file(name, extra_ignores)
        }
    });
    children.sort_by(|(a, a_dir), (b, b_dir)| b_dir.cmp(a_dir).then(a.cmp(b)));

    let n = children.len();
    for (i, (name, is_dir)) in children.into_iter().enumerate() {
        if *count >= MAX_FILES {
            *truncated = true;
            return;
        }
        *count += 1;
        let connector = if i + 1 == n { "└── " } else { "├── " };
        let label = if is_dir { format!("{name}/") } else { name.clone() };
        lines.push(format!("{prefix}{connector}{label}"));
        if is_dir {
            let child_prefix = format!("{prefix}{}", if i + 1 == n { "    " } else { "│   " });
            walk(&dir.join(&name), &child_prefix, extra_ignores, count, truncated, lines);
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn call(args: Value) -> ToolCall {
        ToolCall { id: "l1".into(), name: "list_dir".into(), args }
    }

    #[tokio::test]
    async fn lists_project_root_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "x").unwrap();
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("a.txt"));
    }

    #[tokio::test]
    async fn skips_default_ignored_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("keep.rs"), "x").unwrap();
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.content.contains(".git"));
        assert!(out.content.contains("keep.rs"));
    }

    #[tokio::test]
    async fn skips_binary_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.so"), "x").unwrap();
        std::fs::write(dir.path().join("main.rs"), "x").unwrap();
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.content.contains("lib.so"));
        assert!(out.content.contains("main.rs"));
    }

    #[tokio::test]
    async fn honors_project_local_ignore_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".relaygateignore"), "secret.txt\n").unwrap();
        std::fs::write(dir.path().join("secret.txt"), "x").unwrap();
        std::fs::write(dir.path().join("public.txt"), "x").unwrap();
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({})), &ctx).await;
        assert!(!out.content.contains("secret.txt"));
        assert!(out.content.contains("public.txt"));
    }

    #[tokio::test]
    async fn truncates_at_500_files() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..520 {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({})), &ctx).await;
        assert!(out.content.contains("truncated"));
    }

    #[tokio::test]
    async fn rejects_path_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = RequestContext::new(dir.path());
        let out = ListDirTool.execute(&call(json!({"path": "/etc"})), &ctx).await;
        assert!(out.is_error);
    }
}
