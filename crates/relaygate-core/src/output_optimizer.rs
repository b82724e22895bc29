// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Tool-output optimizer (§4.6): shrinks an oversized tool result before it
//! re-enters the conversation, dispatching on the tool's declared
//! [`OutputCategory`] rather than its name.
//!
//! Two token estimates are in play here, deliberately:
//! - the *eligibility* check uses `len(text) / 3.5` per §4.6, rounded, to
//!   decide whether a result is worth touching at all;
//! - the truncation target itself (how much to keep) is sized in
//!   characters at a fixed 4 chars/token budget, the same constant the rest
//!   of this crate uses for `TokenCounter` (see [`crate::session`]).
//! The two are independent knobs: the first is "is this big enough to
//! bother", the second is "how big should the kept portion be".
use relaygate_tools::OutputCategory;

const OPTIMIZE_THRESHOLD_TOKENS: usize = 1000;
const TARGET_TOKENS: usize = 1000;

pub fn estimate_tokens(text: &str) -> usize {
    (text.len() as f32 / 3.5).round() as usize
}

/// Returns `content` unchanged if its estimated token count is at or below
/// the optimizer threshold; otherwise applies the category-specific
/// extraction strategy.
pub fn optimize(content: &str, category: OutputCategory) -> String {
    if estimate_tokens(content) <= OPTIMIZE_THRESHOLD_TOKENS {
        return content.to_string();
    }
    smart_truncate(content, category, TARGET_TOKENS)
}

/// Deterministic, content-aware tool-result truncation.
///
/// Returns `content` unchanged when it fits within `cap_tokens` chars worth
/// of budget. Otherwise applies a category-specific extraction strategy:
/// - Unified-diff-like content (detected by [`looks_like_diff`], regardless
///   of category): keep only lines starting with `+`, `-`, `@@`, `diff`, or
///   `index`; drop the surrounding context lines.
/// - [`OutputCategory::HeadTail`]: keep the first 60 + last 40 lines (e.g. a
///   shell transcript) so both ends remain visible.
/// - [`OutputCategory::MatchList`]: keep the leading matches only — later
///   grep/search hits are less relevant than earlier ones.
/// - [`OutputCategory::FileContent`]: balanced head + tail split, preserving
///   both the file's declarations and its most recent lines.
/// - [`OutputCategory::Generic`]: hard line-boundary cut.
pub fn smart_truncate(content: &str, category: OutputCategory, cap_tokens: usize) -> String {
    if cap_tokens == 0 {
        return content.to_string();
    }
    let cap_chars = cap_tokens * 4;
    if content.len() <= cap_chars {
        return content.to_string();
    }
    let omitted_bytes = content.len().saturating_sub(cap_chars);
    match category {
        OutputCategory::HeadTail | OutputCategory::FileContent if looks_like_diff(content) => {
            retain_diff_lines(
                content,
                cap_chars,
                &format!(
                    "[... {{lines}} context lines omitted ({omitted_bytes} bytes); \
                         changed lines (+/-/@@) kept ...]"
                ),
            )
        }
        OutputCategory::HeadTail => head_tail_lines(
            content,
            cap_chars,
            60,
            40,
            &format!("[... {{lines}} lines / {omitted_bytes} bytes omitted ...]"),
        ),
        OutputCategory::MatchList => head_lines(
            content,
            cap_chars,
            &format!(
                "[... {{lines}} more matches omitted ({omitted_bytes} bytes); \
                     use a more specific pattern to see them ...]"
            ),
        ),
        OutputCategory::FileContent => head_tail_lines(
            content,
            cap_chars,
            usize::MAX,
            usize::MAX,
            &format!(
                "[... {{lines}} lines omitted ({omitted_bytes} bytes); \
                     use read_file with offset/limit to see more ...]"
            ),
        ),
        OutputCategory::Generic => {
            let cut = content[..cap_chars].rfind('\n').map(|p| p + 1).unwrap_or(cap_chars);
            format!(
                "{}\n[... {omitted_bytes} bytes omitted; \
                 content truncated to fit context budget ...]",
                &content[..cut]
            )
        }
    }
}

/// Whether `content` reads as a unified diff: a sample of its first 20 lines
/// contains a `diff `, `@@ `, or `index ` marker.
fn looks_like_diff(content: &str) -> bool {
    content
        .lines()
        .take(20)
        .any(|l| l.starts_with("diff ") || l.starts_with("@@ ") || l.starts_with("index "))
}

/// Keeps only lines starting with `+`, `-`, `@@`, `diff`, or `index`,
/// dropping unchanged context lines entirely rather than a head/tail window.
fn retain_diff_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let mut kept = String::with_capacity(cap_chars.min(content.len()));
    let mut kept_lines = 0usize;
    let mut context_omitted = 0usize;
    for line in content.lines() {
        let is_diff_line = line.starts_with('+')
            || line.starts_with('-')
            || line.starts_with("@@")
            || line.starts_with("diff")
            || line.starts_with("index");
        if !is_diff_line {
            context_omitted += 1;
            continue;
        }
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_lines += 1;
    }
    let notice = notice_template.replace("{lines}", &context_omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_lines(content: &str, cap_chars: usize, notice_template: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut kept = String::with_capacity(cap_chars);
    let mut kept_count = 0usize;
    for line in &lines {
        let needed = if kept.is_empty() { line.len() } else { line.len() + 1 };
        if kept.len() + needed > cap_chars {
            break;
        }
        if !kept.is_empty() {
            kept.push('\n');
        }
        kept.push_str(line);
        kept_count += 1;
    }
    let omitted = lines.len().saturating_sub(kept_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{kept}\n{notice}")
}

fn head_tail_lines(
    content: &str,
    cap_chars: usize,
    max_head: usize,
    max_tail: usize,
    notice_template: &str,
) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let half_cap = cap_chars / 2;

    let mut head = String::with_capacity(half_cap);
    let mut head_count = 0usize;
    for line in lines.iter().take(max_head) {
        let needed = if head.is_empty() { line.len() } else { line.len() + 1 };
        if head.len() + needed > half_cap {
            break;
        }
        if !head.is_empty() {
            head.push('\n');
        }
        head.push_str(line);
        head_count += 1;
    }

    let mut tail_lines: Vec<&str> = Vec::new();
    let mut tail_chars = 0usize;
    for line in lines.iter().rev().take(max_tail) {
        let needed = if tail_lines.is_empty() { line.len() } else { line.len() + 1 };
        if tail_chars + needed > half_cap {
            break;
        }
        tail_chars += needed;
        tail_lines.push(line);
    }
    tail_lines.reverse();
    let tail_count = tail_lines.len();
    let tail = tail_lines.join("\n");

    let omitted = lines.len().saturating_sub(head_count + tail_count);
    if omitted == 0 {
        return content[..cap_chars.min(content.len())].to_string();
    }
    let notice = notice_template.replace("{lines}", &omitted.to_string());
    format!("{head}\n{notice}\n{tail}")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optimize_leaves_small_output_untouched() {
        let content = "short result";
        assert_eq!(optimize(content, OutputCategory::Generic), content);
    }

    #[test]
    fn optimize_truncates_when_over_threshold() {
        let content = "x".repeat(5000);
        let result = optimize(&content, OutputCategory::Generic);
        assert!(result.len() < content.len());
        assert!(result.contains("bytes omitted"));
    }

    #[test]
    fn estimate_tokens_uses_len_over_3_5() {
        assert_eq!(estimate_tokens(&"a".repeat(35)), 10);
    }

    #[test]
    fn smart_truncate_returns_original_when_under_cap() {
        let short = "line one\nline two";
        assert_eq!(smart_truncate(short, OutputCategory::HeadTail, 100), short);
    }

    #[test]
    fn smart_truncate_zero_cap_returns_original() {
        let content = "x".repeat(500);
        assert_eq!(smart_truncate(&content, OutputCategory::HeadTail, 0), content);
    }

    #[test]
    fn smart_truncate_head_tail_preserves_both_ends() {
        let lines: Vec<String> = (0..200).map(|i| format!("line {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::HeadTail, 50);
        assert!(result.contains("line 0"));
        assert!(result.contains("line 199"));
        assert!(result.contains("omitted"));
    }

    #[test]
    fn smart_truncate_match_list_keeps_only_head() {
        let lines: Vec<String> = (0..200).map(|i| format!("match {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::MatchList, 50);
        assert!(result.contains("match 0"));
        assert!(!result.contains("match 199"));
        assert!(result.contains("more matches omitted"));
    }

    #[test]
    fn smart_truncate_file_content_balances_head_and_tail() {
        let lines: Vec<String> = (0..200).map(|i| format!("fn f{i}() {{}}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::FileContent, 50);
        assert!(result.contains("f0("));
        assert!(result.contains("f199("));
    }

    #[test]
    fn smart_truncate_generic_cuts_at_line_boundary() {
        let lines: Vec<String> = (0..100).map(|i| format!("row {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::Generic, 5);
        assert!(result.contains("bytes omitted"));
        assert!(!result.contains('\u{0}'));
    }

    #[test]
    fn smart_truncate_diff_keeps_changed_lines_drops_context() {
        let mut lines = vec!["diff --git a/f.rs b/f.rs".to_string(), "index 111..222 100644".to_string(), "@@ -1,3 +1,3 @@".to_string()];
        for i in 0..200 {
            lines.push(format!(" unchanged context line {i}"));
        }
        lines.push("-old line".to_string());
        lines.push("+new line".to_string());
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::HeadTail, 50);
        assert!(result.contains("+new line"));
        assert!(result.contains("-old line"));
        assert!(result.contains("@@ -1,3 +1,3 @@"));
        assert!(!result.contains("unchanged context line"));
        assert!(result.contains("context lines omitted"));
    }

    #[test]
    fn smart_truncate_non_diff_head_tail_is_unaffected_by_diff_detection() {
        let lines: Vec<String> = (0..200).map(|i| format!("log line {i}")).collect();
        let content = lines.join("\n");
        let result = smart_truncate(&content, OutputCategory::HeadTail, 50);
        assert!(result.contains("lines / "));
        assert!(!result.contains("context lines omitted"));
    }

    #[test]
    fn smart_truncate_exactly_at_cap_not_truncated() {
        let content = "x".repeat(40);
        let result = smart_truncate(&content, OutputCategory::Generic, 10);
        assert_eq!(result, content);
    }
}
