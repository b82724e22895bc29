// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Events the orchestrator emits while streaming a single request (§4.1,
//! §4.8). The HTTP layer translates these into OpenAI-compatible SSE chunks.
use relaygate_tools::ToolCall;

pub use crate::windowing::WindowingTier;

#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// A text chunk streamed from the upstream.
    TextDelta(String),
    /// The model requested a tool call; dispatch is about to start.
    ToolCallStarted(ToolCall),
    /// A tool call finished (built-in, external process, or external HTTP).
    ToolCallFinished { call_id: String, tool_name: String, output: String, is_error: bool },
    /// Context windowing ran against the conversation before this round's request.
    ContextWindowed { tier: WindowingTier, messages_before: usize, messages_after: usize },
    /// Token usage reported alongside a response chunk.
    TokenUsage { input: u32, output: u32, cache_read: u32 },
    /// The request is finished; no further events follow.
    Done,
    /// An unrecoverable error terminated the request.
    Error(String),
}
