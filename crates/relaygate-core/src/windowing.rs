// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Context windowing (§4.4.3): three ordered, fully deterministic tiers
//! applied until the conversation fits the token budget. None of these
//! tiers ever calls the upstream — there is no LLM-based compaction here,
//! only mechanical trimming.
//!
//! One invariant holds across every tier: a windowing boundary never
//! separates a `ToolCall` message from the `ToolResponse` message that
//! answers it, since that would leave a dangling reference the upstream
//! schema can't make sense of.
use std::collections::HashMap;

use regex::Regex;

use relaygate_config::ContextConfig;
use relaygate_model::{Message, Part, Role};

use crate::session::conversation_tokens;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowingTier {
    SelectiveKeep,
    SmartSummary,
    NaiveDrop,
}

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "on",
    "at", "for", "with", "by", "this", "that", "these", "those", "it", "its", "as", "from", "into", "about", "then",
    "than", "so", "if", "not", "no", "do", "does", "did", "have", "has", "had", "will", "would", "can", "could",
    "should", "you", "your", "i", "we", "they", "he", "she", "what", "which", "who", "whom",
];

/// Applies the three tiers in order until `messages` fits `budget_tokens`.
/// Returns the highest tier that ran, or `None` if the conversation already
/// fit and nothing was touched.
pub fn fit_budget(messages: &mut Vec<Message>, current_query: &str, budget_tokens: usize, cfg: &ContextConfig) -> Option<WindowingTier> {
    if conversation_tokens(messages) <= budget_tokens {
        return None;
    }

    let mut tier = None;
    if cfg.selective_context_enabled {
        selective_keep(messages, current_query, budget_tokens, cfg);
        tier = Some(WindowingTier::SelectiveKeep);
        if conversation_tokens(messages) <= budget_tokens {
            return tier;
        }
    }

    smart_summary(messages);
    tier = Some(WindowingTier::SmartSummary);
    if conversation_tokens(messages) <= budget_tokens {
        return tier;
    }

    naive_drop(messages, budget_tokens);
    Some(WindowingTier::NaiveDrop)
}

// ─── Tier 1: selective keyword keep ───────────────────────────────────────────

fn extract_keywords(query: &str) -> Vec<String> {
    let lower = query.to_lowercase();
    let word_re = Regex::new(r"[a-z0-9]+").expect("static regex");
    let mut counts: HashMap<String, usize> = HashMap::new();
    for m in word_re.find_iter(&lower) {
        let t = m.as_str();
        if t.len() < 3 {
            continue;
        }
        if t.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if STOP_WORDS.contains(&t) {
            continue;
        }
        *counts.entry(t.to_string()).or_insert(0) += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(20).map(|(k, _)| k).collect()
}

fn score_message(msg: &Message, keywords: &[String]) -> f32 {
    if keywords.is_empty() {
        return 0.0;
    }
    let text = msg.text_content().to_lowercase();
    let present = keywords.iter().filter(|k| text.contains(k.as_str())).count();
    let coverage = present as f32 / keywords.len() as f32;
    let occurrences: usize = keywords.iter().map(|k| text.matches(k.as_str()).count()).sum();
    let occurrence_score = (occurrences as f32 / 5.0).min(1.0);
    0.7 * coverage + 0.3 * occurrence_score
}

fn selective_keep(messages: &mut Vec<Message>, query: &str, budget_tokens: usize, cfg: &ContextConfig) {
    if messages.len() <= 1 {
        return;
    }
    let keep_recent = cfg.always_keep_recent.min(messages.len().saturating_sub(1));
    let recent_start = messages.len() - keep_recent;
    if recent_start <= 1 {
        return;
    }

    let keywords = extract_keywords(query);
    let mut scored: Vec<(usize, f32)> =
        (1..recent_start).map(|i| (i, score_message(&messages[i], &keywords))).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.retain(|(_, score)| *score >= cfg.min_relevance_score);

    let target_tokens = (budget_tokens as f32 * cfg.selective_target_fraction) as usize;
    let mut kept: Vec<usize> = Vec::with_capacity(messages.len());
    kept.push(0);
    kept.extend(recent_start..messages.len());

    let mut total: usize = kept.iter().map(|&i| crate::session::approx_tokens(&messages[i])).sum();
    for (i, _) in scored {
        if total >= target_tokens {
            break;
        }
        total += crate::session::approx_tokens(&messages[i]);
        kept.push(i);
    }

    kept = expand_tool_groups(kept, messages);
    kept.sort_unstable();
    kept.dedup();

    let new_messages: Vec<Message> = kept.into_iter().map(|i| messages[i].clone()).collect();
    *messages = new_messages;
}

// ─── Tier 2: smart summary ─────────────────────────────────────────────────────

fn role_tag(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn smart_summary(messages: &mut Vec<Message>) {
    if messages.len() <= 6 {
        return;
    }
    let keep_tail = 5.min(messages.len().saturating_sub(1));
    let mut recent_start = messages.len() - keep_tail;

    // Never split a tool-call group across the summary boundary: walk the
    // split point backward over any ToolCall/ToolResponse message.
    while recent_start > 1 && touches_tool_interaction(&messages[recent_start]) {
        recent_start -= 1;
    }
    if recent_start <= 1 {
        return;
    }

    let first = messages[0].clone();
    let summary_lines: Vec<String> = messages[1..recent_start]
        .iter()
        .map(|m| {
            let words: Vec<&str> = m.text_content().split_whitespace().take(15).collect();
            format!("{}: {}", role_tag(m.role), words.join(" "))
        })
        .collect();
    let synthetic = Message::text(Role::User, summary_lines.join("\n"));

    let mut new_messages = vec![first, synthetic];
    new_messages.extend(messages[recent_start..].iter().cloned());
    *messages = new_messages;
}

// ─── Tier 3: naive drop ────────────────────────────────────────────────────────

fn naive_drop(messages: &mut Vec<Message>, budget_tokens: usize) {
    while conversation_tokens(messages) > budget_tokens && messages.len() > 1 {
        messages.remove(1);
    }
}

// ─── Tool-call group boundary safety ──────────────────────────────────────────

fn touches_tool_interaction(msg: &Message) -> bool {
    msg.parts.iter().any(|p| matches!(p, Part::ToolCall { .. } | Part::ToolResponse { .. }))
}

fn has_tool_call(msg: &Message) -> bool {
    msg.parts.iter().any(|p| matches!(p, Part::ToolCall { .. }))
}

fn has_tool_response(msg: &Message) -> bool {
    msg.parts.iter().any(|p| matches!(p, Part::ToolResponse { .. }))
}

/// Expands a kept-index set so that no `ToolCall`/`ToolResponse` pair is
/// split: keeping one side pulls in the other. Runs to a fixed point since
/// pulling in a neighbor can itself require pulling in its own neighbor.
fn expand_tool_groups(mut kept: Vec<usize>, messages: &[Message]) -> Vec<usize> {
    loop {
        let mut changed = false;
        let mut additions = Vec::new();
        for &i in &kept {
            if has_tool_call(&messages[i]) && i + 1 < messages.len() && has_tool_response(&messages[i + 1]) && !kept.contains(&(i + 1)) {
                additions.push(i + 1);
            }
            if has_tool_response(&messages[i]) && i > 0 && has_tool_call(&messages[i - 1]) && !kept.contains(&(i - 1)) {
                additions.push(i - 1);
            }
        }
        if !additions.is_empty() {
            kept.extend(additions);
            changed = true;
        }
        if !changed {
            break;
        }
    }
    kept
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
