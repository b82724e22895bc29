// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Named credential store (`<config_dir>/api_keys.json`).
//!
//! Shares this crate's read-merge-persist shape (see `loader.rs`), adapted
//! to a single JSON file with exclusive file locking (`fs4`) instead of a
//! layered search, since credentials have exactly one writer-of-record and
//! must never be merged across layers.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use fs4::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no active API key is configured")]
    Missing,
    #[error("key id {0:?} is not registered")]
    UnknownKey(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed credential file: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default)]
    keys: HashMap<String, String>,
    #[serde(default)]
    active_key_id: Option<String>,
    /// Per-key daily token usage: `key_hash -> date -> model -> (input, output)`.
    /// Supplemental feature (ported from `record_token_usage` in the Python
    /// original) — operator visibility only, never read back into requests.
    #[serde(default)]
    token_usage: HashMap<String, HashMap<String, HashMap<String, (u64, u64)>>>,
}

/// Lock-guarded named-credential store.
///
/// Reads take the in-process `RwLock` for read; mutations take it for write
/// and additionally hold an exclusive OS file lock for the duration of the
/// read-modify-write cycle so two proxy processes sharing a config directory
/// cannot interleave writes.
pub struct CredentialStore {
    path: PathBuf,
    state: RwLock<CredentialFile>,
}

impl CredentialStore {
    /// Load (or initialize empty) the credential store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CredentialError> {
        let path = path.into();
        let state = if path.is_file() {
            let text = std::fs::read_to_string(&path)?;
            if text.trim().is_empty() {
                CredentialFile::default()
            } else {
                serde_json::from_str(&text)?
            }
        } else {
            CredentialFile::default()
        };
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    /// The active key's secret value, used as the upstream auth header.
    /// Errors as `CredentialError::Missing` when no key is active — callers
    /// in the HTTP layer surface this as a 401 before ever contacting the
    /// upstream.
    pub fn active_secret(&self) -> Result<String, CredentialError> {
        let state = self.state.read().unwrap();
        let id = state.active_key_id.as_ref().ok_or(CredentialError::Missing)?;
        state
            .keys
            .get(id)
            .cloned()
            .ok_or(CredentialError::Missing)
    }

    pub fn active_key_id(&self) -> Option<String> {
        self.state.read().unwrap().active_key_id.clone()
    }

    /// Add or update a named key.
    pub fn add_or_update(&self, id: &str, secret: &str) -> Result<(), CredentialError> {
        self.mutate(|f| {
            f.keys.insert(id.to_string(), secret.to_string());
        })
    }

    /// Delete a named key. Clears `active_key_id` if it pointed at this key.
    pub fn delete(&self, id: &str) -> Result<(), CredentialError> {
        self.mutate(|f| {
            f.keys.remove(id);
            if f.active_key_id.as_deref() == Some(id) {
                f.active_key_id = None;
            }
        })
    }

    /// Set the active key. Errors if `id` is not registered.
    pub fn set_active(&self, id: &str) -> Result<(), CredentialError> {
        {
            let state = self.state.read().unwrap();
            if !state.keys.contains_key(id) {
                return Err(CredentialError::UnknownKey(id.to_string()));
            }
        }
        self.mutate(|f| {
            f.active_key_id = Some(id.to_string());
        })
    }

    /// Record token usage against the active key for `date` (caller-supplied
    /// so tests and the orchestrator stay independent of wall-clock time)
    /// and `model`. Accumulates rather than overwrites.
    pub fn record_token_usage(
        &self,
        date: &str,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), CredentialError> {
        let key_hash = match self.active_key_id() {
            Some(id) => hash_key_id(&id),
            None => return Ok(()),
        };
        self.mutate(|f| {
            let by_date = f.token_usage.entry(key_hash.clone()).or_default();
            let by_model = by_date.entry(date.to_string()).or_default();
            let entry = by_model.entry(model.to_string()).or_insert((0, 0));
            entry.0 += input_tokens;
            entry.1 += output_tokens;
        })
    }

    /// Total usage recorded for the active key on `date`, summed across
    /// models, as `(input_tokens, output_tokens)`.
    pub fn usage_for_date(&self, date: &str) -> (u64, u64) {
        let Some(id) = self.active_key_id() else {
            return (0, 0);
        };
        let key_hash = hash_key_id(&id);
        let state = self.state.read().unwrap();
        let Some(by_date) = state.token_usage.get(&key_hash) else {
            return (0, 0);
        };
        let Some(by_model) = by_date.get(date) else {
            return (0, 0);
        };
        by_model
            .values()
            .fold((0u64, 0u64), |(i, o), (di, doo)| (i + di, o + doo))
    }

    fn mutate(&self, f: impl FnOnce(&mut CredentialFile)) -> Result<(), CredentialError> {
        let mut state = self.state.write().unwrap();
        f(&mut state);
        persist_locked(&self.path, &state)?;
        Ok(())
    }
}

fn hash_key_id(id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize `state` and write it to `path` while holding an exclusive OS
/// file lock, so concurrent processes sharing a config directory never
/// interleave partial writes.
fn persist_locked(path: &Path, state: &CredentialFile) -> Result<(), CredentialError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;
    FileExt::lock_exclusive(&file).map_err(CredentialError::Io)?;
    let result = write_locked(&file, state);
    let _ = FileExt::unlock(&file);
    result
}

fn write_locked(mut file: &File, state: &CredentialFile) -> Result<(), CredentialError> {
    let json = serde_json::to_string_pretty(state)?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(json.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[allow(dead_code)]
fn read_locked(file: &mut File) -> std::io::Result<String> {
    let mut buf = String::new();
    file.seek(SeekFrom::Start(0))?;
    file.read_to_string(&mut buf)?;
    Ok(buf)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (CredentialStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        (CredentialStore::open(&path).unwrap(), dir)
    }

    #[test]
    fn fresh_store_has_no_active_key() {
        let (s, _dir) = store();
        assert!(matches!(s.active_secret(), Err(CredentialError::Missing)));
    }

    #[test]
    fn add_then_set_active_then_read() {
        let (s, _dir) = store();
        s.add_or_update("k1", "secret-value").unwrap();
        s.set_active("k1").unwrap();
        assert_eq!(s.active_secret().unwrap(), "secret-value");
        assert_eq!(s.active_key_id().as_deref(), Some("k1"));
    }

    #[test]
    fn set_active_unknown_key_errors() {
        let (s, _dir) = store();
        assert!(matches!(
            s.set_active("ghost"),
            Err(CredentialError::UnknownKey(_))
        ));
    }

    #[test]
    fn delete_active_key_clears_active() {
        let (s, _dir) = store();
        s.add_or_update("k1", "v1").unwrap();
        s.set_active("k1").unwrap();
        s.delete("k1").unwrap();
        assert!(s.active_key_id().is_none());
        assert!(matches!(s.active_secret(), Err(CredentialError::Missing)));
    }

    #[test]
    fn delete_non_active_key_preserves_active() {
        let (s, _dir) = store();
        s.add_or_update("k1", "v1").unwrap();
        s.add_or_update("k2", "v2").unwrap();
        s.set_active("k1").unwrap();
        s.delete("k2").unwrap();
        assert_eq!(s.active_key_id().as_deref(), Some("k1"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_keys.json");
        {
            let s = CredentialStore::open(&path).unwrap();
            s.add_or_update("k1", "persisted-secret").unwrap();
            s.set_active("k1").unwrap();
        }
        let reopened = CredentialStore::open(&path).unwrap();
        assert_eq!(reopened.active_secret().unwrap(), "persisted-secret");
    }

    #[test]
    fn token_usage_accumulates_per_model_and_date() {
        let (s, _dir) = store();
        s.add_or_update("k1", "v1").unwrap();
        s.set_active("k1").unwrap();
        s.record_token_usage("2026-07-28", "gemini-pro", 100, 20)
            .unwrap();
        s.record_token_usage("2026-07-28", "gemini-pro", 50, 10)
            .unwrap();
        s.record_token_usage("2026-07-28", "gemini-flash", 5, 5)
            .unwrap();
        assert_eq!(s.usage_for_date("2026-07-28"), (155, 35));
    }

    #[test]
    fn token_usage_without_active_key_is_noop() {
        let (s, _dir) = store();
        s.record_token_usage("2026-07-28", "m", 1, 1).unwrap();
        assert_eq!(s.usage_for_date("2026-07-28"), (0, 0));
    }

    #[test]
    fn token_usage_isolated_by_date() {
        let (s, _dir) = store();
        s.add_or_update("k1", "v1").unwrap();
        s.set_active("k1").unwrap();
        s.record_token_usage("2026-07-27", "m", 10, 1).unwrap();
        s.record_token_usage("2026-07-28", "m", 20, 2).unwrap();
        assert_eq!(s.usage_for_date("2026-07-27"), (10, 1));
        assert_eq!(s.usage_for_date("2026-07-28"), (20, 2));
    }
}
