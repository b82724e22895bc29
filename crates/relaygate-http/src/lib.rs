// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-compatible chat-completions HTTP/SSE surface (§6).
mod error;
mod http;
mod openai;
mod state;

pub use http::{router, serve};
pub use state::AppState;
