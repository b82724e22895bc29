// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Per-request project-root sandbox (§4.3).
//!
//! Replaces the source's thread-local "current project root" with an
//! explicit value threaded through the call chain, per the redesign flag on
//! dynamic per-thread state — every built-in tool receives a [`RequestContext`]
//! argument instead of reaching into ambient storage.
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path escapes the project root")]
    Escapes,
    #[error("path is outside the configured allow-list")]
    NotAllowed,
    #[error("path does not exist")]
    NotFound,
}

/// Per-request tool execution context: the project root every built-in
/// path argument is resolved against, plus the optional global allow-list
/// of permitted roots (§4.3, §6 `ALLOWED_CODE_PATHS`).
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub project_root: PathBuf,
    pub allowed_roots: Vec<PathBuf>,
}

impl RequestContext {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            allowed_roots: Vec::new(),
        }
    }

    pub fn with_allowed_roots(mut self, roots: Vec<PathBuf>) -> Self {
        self.allowed_roots = roots;
        self
    }

    /// Resolve `candidate` (absolute or relative to `project_root`) to a
    /// realpath and verify it's a prefix-match of `project_root` and, if an
    /// allow-list is configured, of one of `allowed_roots` too. Does not
    /// require the path to already exist — the parent directory is resolved
    /// instead, so create-file style operations can sandbox-check a path
    /// before it's written.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf, SandboxError> {
        let joined = join_under_root(&self.project_root, candidate);
        let (existing_ancestor, tail) = deepest_existing_ancestor(&joined);
        let real_ancestor = existing_ancestor
            .canonicalize()
            .map_err(|_| SandboxError::NotFound)?;
        let resolved = real_ancestor.join(tail);

        let real_root = self
            .project_root
            .canonicalize()
            .map_err(|_| SandboxError::NotFound)?;
        if !resolved.starts_with(&real_root) {
            return Err(SandboxError::Escapes);
        }
        if !self.allowed_roots.is_empty()
            && !self
                .allowed_roots
                .iter()
                .filter_map(|r| r.canonicalize().ok())
                .any(|r| resolved.starts_with(&r))
        {
            return Err(SandboxError::NotAllowed);
        }
        Ok(resolved)
    }

    /// Like [`Self::resolve`] but additionally requires the path to exist.
    pub fn resolve_existing(&self, candidate: &str) -> Result<PathBuf, SandboxError> {
        let resolved = self.resolve(candidate)?;
        if !resolved.exists() {
            return Err(SandboxError::NotFound);
        }
        Ok(resolved)
    }
}

fn join_under_root(root: &Path, candidate: &str) -> PathBuf {
    let candidate_path = Path::new(candidate);
    if candidate_path.is_absolute() {
        candidate_path.to_path_buf()
    } else {
        root.join(candidate_path)
    }
}

/// Walk up `path` until an existing ancestor is found, returning
/// `(ancestor, remaining_tail)`.
fn deepest_existing_ancestor(path: &Path) -> (PathBuf, PathBuf) {
    let mut ancestor = path.to_path_buf();
    let mut tail = PathBuf::new();
    loop {
        if ancestor.exists() {
            return (ancestor, tail);
        }
        match (ancestor.file_name(), ancestor.parent()) {
            (Some(name), Some(parent)) => {
                let mut new_tail = PathBuf::from(name);
                new_tail.push(&tail);
                tail = new_tail;
                ancestor = parent.to_path_buf();
            }
            _ => return (ancestor, tail),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
