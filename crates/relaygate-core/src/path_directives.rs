// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Path-directive expansion (§4.4.2): `<kind>_path=<value>` tokens embedded
//! in a user message, expanded into inline blobs, concatenated source, or a
//! synthesized system instruction before the request is shaped further.
//!
//! Mirrors the ignore-set approach `relaygate-tools`'s `list_dir`/`grep`
//! tools use for walking a project tree, kept as an independent constant
//! here rather than imported so this module has no dependency on any one
//! built-in tool's internals.
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use relaygate_model::Part;

const KINDS: &[&str] = &["image", "pdf", "audio", "code", "project", "system_prompt"];
const PARAM_KEYS: &[&str] = &["ignore_type", "ignore_file", "ignore_dir", "project_mode", "project_feature"];
const MAX_BLOB_BYTES: usize = 12 * 1024 * 1024;

static DEFAULT_IGNORED_DIRS: &[&str] =
    &[".git", ".hg", ".svn", "target", "node_modules", "vendor", "dist", "build", "__pycache__", ".mypy_cache", ".venv"];

#[derive(Debug, Default)]
pub struct DirectiveExpansion {
    pub parts: Vec<Part>,
    pub project_root: Option<PathBuf>,
    pub synthesized_system: Option<String>,
}

/// Expands every `<kind>_path=` directive found in `text` against
/// `base_dir`. Directives whose resolved realpath has already been seen in
/// this request are skipped (dedup by realpath).
pub fn expand_directives(text: &str, base_dir: &Path, max_code_injection_bytes: usize) -> DirectiveExpansion {
    let tokens = tokenize(text);
    let mut seen_paths: HashSet<PathBuf> = HashSet::new();
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut outcome = DirectiveExpansion::default();
    let mut i = 0;

    while i < tokens.len() {
        let tok = &tokens[i];
        let Some((kind, rest)) = split_kind(tok) else {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(tok);
            i += 1;
            continue;
        };

        let value = unquote(rest);
        let mut params = HashMap::new();
        let mut j = i + 1;
        while j < tokens.len() {
            match tokens[j].split_once('=') {
                Some((k, v)) if PARAM_KEYS.contains(&k) => {
                    params.insert(k.to_string(), unquote(v));
                    j += 1;
                }
                _ => break,
            }
        }
        i = j;

        let resolved = base_dir.join(&value);
        let canon = resolved.canonicalize().unwrap_or(resolved);
        if !seen_paths.insert(canon.clone()) {
            continue;
        }

        if !buf.is_empty() {
            parts.push(Part::Text(std::mem::take(&mut buf)));
        }

        match kind {
            "image" | "pdf" | "audio" => {
                if let Ok(bytes) = std::fs::read(&canon) {
                    let capped = if bytes.len() > MAX_BLOB_BYTES { bytes[..MAX_BLOB_BYTES].to_vec() } else { bytes };
                    parts.push(Part::InlineBlob { mime: detect_mime(kind, &canon), bytes: capped });
                }
            }
            "code" => {
                let ignore_type = params.get("ignore_type").map(String::as_str).unwrap_or("default");
                let text = concatenate_code(
                    &canon,
                    ignore_type,
                    params.get("ignore_file").map(String::as_str),
                    params.get("ignore_dir").map(String::as_str),
                    max_code_injection_bytes,
                );
                parts.push(Part::Text(text));
            }
            "project" => {
                outcome.project_root = Some(canon.clone());
                let mode = params.get("project_mode").cloned().unwrap_or_else(|| "default".into());
                let feature = params.get("project_feature").map(String::as_str);
                let mut sys = project_mode_prompt(&mode);
                if let Some(docs) = load_project_docs(&canon, &mode, feature) {
                    sys = format!("{docs}\n\n{sys}");
                }
                outcome.synthesized_system = Some(sys);
            }
            "system_prompt" => {
                outcome.synthesized_system = Some(system_prompt_preset(&value));
            }
            _ => unreachable!("split_kind only returns names in KINDS"),
        }
    }

    if !buf.is_empty() {
        parts.push(Part::Text(buf));
    }
    outcome.parts = parts;
    outcome
}

// ─── Tokenizing ───────────────────────────────────────────────────────────────

fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    for c in text.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            cur.push(c);
            continue;
        }
        if c.is_whitespace() && !in_quotes {
            if !cur.is_empty() {
                tokens.push(std::mem::take(&mut cur));
            }
        } else {
            cur.push(c);
        }
    }
    if !cur.is_empty() {
        tokens.push(cur);
    }
    tokens
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') { s[1..s.len() - 1].to_string() } else { s.to_string() }
}

fn split_kind(tok: &str) -> Option<(&'static str, &str)> {
    for &kind in KINDS {
        let prefix_len = kind.len() + "_path=".len();
        if tok.len() > prefix_len && tok.starts_with(kind) && tok[kind.len()..].starts_with("_path=") {
            return Some((kind, &tok[prefix_len..]));
        }
    }
    None
}

// ─── Per-kind expansion ───────────────────────────────────────────────────────

fn detect_mime(kind: &str, path: &Path) -> String {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    match (kind, ext.as_str()) {
        ("image", "png") => "image/png",
        ("image", "gif") => "image/gif",
        ("image", "webp") => "image/webp",
        ("image", _) => "image/jpeg",
        ("pdf", _) => "application/pdf",
        ("audio", "wav") => "audio/wav",
        ("audio", "ogg") => "audio/ogg",
        ("audio", _) => "audio/mpeg",
        _ => "application/octet-stream",
    }
    .to_string()
}

fn concatenate_code(
    root: &Path,
    ignore_type: &str,
    extra_file: Option<&str>,
    extra_dir: Option<&str>,
    budget_kb: usize,
) -> String {
    let mut ignore: HashSet<String> = DEFAULT_IGNORED_DIRS.iter().map(|s| s.to_string()).collect();
    if ignore_type == "minimal" {
        ignore.clear();
        ignore.insert(".git".into());
    }
    if let Some(f) = extra_file {
        ignore.insert(f.to_string());
    }
    if let Some(d) = extra_dir {
        ignore.insert(d.to_string());
    }

    let mut files = Vec::new();
    collect_files(root, &ignore, &mut files);
    files.sort();

    let budget_bytes = budget_kb * 1024;
    let mut out = String::new();
    for f in files {
        let Ok(content) = std::fs::read_to_string(&f) else { continue };
        let rel = f.strip_prefix(root).unwrap_or(&f).display().to_string();
        let block = format!("```{rel}\n{content}\n```\n\n");
        if out.len() + block.len() > budget_bytes {
            break;
        }
        out.push_str(&block);
    }
    out
}

fn collect_files(root: &Path, ignore: &HashSet<String>, out: &mut Vec<PathBuf>) {
    if root.is_file() {
        out.push(root.to_path_buf());
        return;
    }
    let Ok(entries) = std::fs::read_dir(root) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if ignore.contains(&name) {
            continue;
        }
        if path.is_dir() {
            collect_files(&path, ignore, out);
        } else {
            out.push(path);
        }
    }
}

fn project_mode_prompt(mode: &str) -> String {
    match mode {
        "review" => "You are reviewing this project for correctness and style.".to_string(),
        "debug" => "You are debugging an issue in this project. Be systematic; verify before concluding.".to_string(),
        "implement" => "You are implementing a feature in this project. Follow its existing conventions.".to_string(),
        _ => format!("You are assisting with the project in `{mode}` mode."),
    }
}

fn system_prompt_preset(name: &str) -> String {
    match name {
        "concise" => "Respond concisely, no preamble.".to_string(),
        "verbose" => "Explain your reasoning in detail before giving the answer.".to_string(),
        _ => format!("Use the `{name}` response style."),
    }
}

fn load_project_docs(root: &Path, mode: &str, feature: Option<&str>) -> Option<String> {
    let mut dir = root.join(".opengemini").join(mode);
    if let Some(f) = feature {
        dir = dir.join(f);
    }
    let entries = std::fs::read_dir(&dir).ok()?;
    let mut combined = String::new();
    let mut names: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    names.sort();
    for path in names {
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            if let Ok(content) = std::fs::read_to_string(&path) {
                combined.push_str(&content);
                combined.push('\n');
            }
        }
    }
    if combined.is_empty() {
        None
    } else {
        Some(combined)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn plain_text_with_no_directive_passes_through_as_single_part() {
        let dir = tempdir().unwrap();
        let out = expand_directives("hello there", dir.path(), 256);
        assert_eq!(out.parts.len(), 1);
        assert_eq!(out.parts[0], Part::Text("hello there".to_string()));
    }

    #[test]
    fn image_path_directive_reads_file_as_inline_blob() {
        let dir = tempdir().unwrap();
        let img_path = dir.path().join("pic.png");
        fs::write(&img_path, [0u8, 1, 2, 3]).unwrap();
        let text = format!("describe image_path={}", img_path.display());
        let out = expand_directives(&text, dir.path(), 256);
        let blob = out.parts.iter().find_map(|p| match p {
            Part::InlineBlob { mime, bytes } => Some((mime.clone(), bytes.clone())),
            _ => None,
        });
        let (mime, bytes) = blob.expect("expected an inline blob part");
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, vec![0, 1, 2, 3]);
    }

    #[test]
    fn code_path_directive_concatenates_files_as_fenced_blocks() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}").unwrap();
        let text = format!("review code_path={}", dir.path().display());
        let out = expand_directives(&text, dir.path(), 256);
        let has_code = out.parts.iter().any(|p| matches!(p, Part::Text(t) if t.contains("fn a()")));
        assert!(has_code);
    }

    #[test]
    fn project_path_directive_sets_root_and_synthesizes_system_instruction() {
        let dir = tempdir().unwrap();
        let text = format!("project_path={} project_mode=review", dir.path().display());
        let out = expand_directives(&text, dir.path(), 256);
        assert!(out.project_root.is_some());
        assert!(out.synthesized_system.unwrap().contains("reviewing"));
    }

    #[test]
    fn system_prompt_directive_synthesizes_preset_text() {
        let out = expand_directives("system_prompt_path=concise", Path::new("/tmp"), 256);
        assert_eq!(out.synthesized_system.unwrap(), "Respond concisely, no preamble.");
    }

    #[test]
    fn duplicate_directive_by_realpath_is_expanded_only_once() {
        let dir = tempdir().unwrap();
        let img_path = dir.path().join("pic.png");
        fs::write(&img_path, [9u8]).unwrap();
        let text = format!("image_path={} and again image_path={}", img_path.display(), img_path.display());
        let out = expand_directives(&text, dir.path(), 256);
        let blob_count = out.parts.iter().filter(|p| matches!(p, Part::InlineBlob { .. })).count();
        assert_eq!(blob_count, 1);
    }

    #[test]
    fn unknown_token_with_path_equals_is_left_as_plain_text() {
        let out = expand_directives("build_path=/tmp/x not a directive", Path::new("/tmp"), 256);
        assert!(out.parts.iter().any(|p| matches!(p, Part::Text(t) if t.contains("build_path"))));
    }
}
