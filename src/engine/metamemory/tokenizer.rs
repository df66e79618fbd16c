// ── Metamemory: Token Estimation ────────────────────────────────────────────
//
// Single source of truth for token estimates inside metamemory: thread
// budgets, context budgets and summary caps all go through `Tokenizer`.
//
// Estimates come from character counts at a fixed 3.5 chars/token. That is a
// simplification, not a precision guarantee; what matters is that the same
// input always yields the same estimate.

use crate::engine::types::Message;

/// Per-message overhead (role, separators).
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

const CHARS_PER_TOKEN: f32 = 3.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tokenizer {
    chars_per_token: f32,
}

impl Tokenizer {
    pub fn heuristic() -> Self {
        Self {
            chars_per_token: CHARS_PER_TOKEN,
        }
    }

    /// Estimate the number of tokens in a string. Non-empty text costs at
    /// least one token.
    pub fn count_tokens(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        // Char count, not bytes, so CJK/emoji are not overcounted.
        let char_count = text.chars().count();
        let estimated = (char_count as f32 / self.chars_per_token).ceil() as usize;
        estimated.max(1)
    }

    pub fn count_message(&self, message: &Message) -> usize {
        self.count_tokens(&message.content) + MESSAGE_OVERHEAD_TOKENS
    }

    /// Token estimate of a thread: its member messages plus its summary.
    pub fn count_thread<'a, I>(&self, messages: I, summary: &str) -> usize
    where
        I: IntoIterator<Item = &'a Message>,
    {
        messages
            .into_iter()
            .map(|m| self.count_message(m))
            .sum::<usize>()
            + self.count_tokens(summary)
    }

    pub fn chars_for_tokens(&self, tokens: usize) -> usize {
        (tokens as f32 * self.chars_per_token) as usize
    }

    /// Truncate text to fit within a token budget, respecting UTF-8 boundaries.
    /// Returns the truncated text and its token cost.
    pub fn truncate_to_budget<'a>(&self, text: &'a str, max_tokens: usize) -> (&'a str, usize) {
        let current_tokens = self.count_tokens(text);
        if current_tokens <= max_tokens {
            return (text, current_tokens);
        }

        let max_chars = self.chars_for_tokens(max_tokens);
        let mut end = text
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(text.len());

        // Prefer a word boundary unless that loses more than half.
        if let Some(last_space) = text[..end].rfind(|c: char| c.is_whitespace()) {
            if last_space > end / 2 {
                end = last_space;
            }
        }

        let truncated = &text[..end];
        (truncated, self.count_tokens(truncated))
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::heuristic()
    }
}
