// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
mod credentials;
mod loader;
mod schema;

pub use credentials::{CredentialError, CredentialStore};
pub use loader::{apply_env_overlay, default_config_dir, load};
pub use schema::*;
