// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cache;
mod dispatcher;
mod events;
mod orchestrator;
mod output_optimizer;
mod path_directives;
mod profiles;
mod session;
mod windowing;

pub use cache::{ContextCache, ToolOutputCache};
pub use dispatcher::Dispatcher;
pub use events::{OrchestratorEvent, WindowingTier};
pub use orchestrator::Orchestrator;
pub use output_optimizer::{estimate_tokens, optimize, smart_truncate as optimizer_smart_truncate};
pub use path_directives::{expand_directives, DirectiveExpansion};
pub use profiles::{apply_text_overrides, load_profiles, match_profile, PromptProfile, SelectedTools};
pub use session::{approx_tokens, conversation_tokens, Session};
pub use windowing::fit_budget;
