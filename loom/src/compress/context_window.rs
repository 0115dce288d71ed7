//! Token estimation and overflow detection for context window management.
//!
//! Uses a heuristic (~4 chars per token) and, when available, a hybrid
//! strategy using the last LLM usage plus an estimated delta for messages
//! added since.

use crate::message::Message;

const CHARS_PER_TOKEN: u32 = 4;

/// Heuristic token estimate: ~4 characters per token, summed over every
/// message's content.
pub fn estimate_tokens(messages: &[Message]) -> u32 {
    let total: usize = messages.iter().map(|m| m.content().len()).sum();
    (total / CHARS_PER_TOKEN as usize) as u32
}

/// Input for the overflow check; constructed by the caller from a `Session`
/// and an `AgentLoopConfig` so this module stays independent of either.
#[derive(Debug)]
pub struct ContextWindowCheck<'a> {
    pub messages: &'a [Message],
    /// Last LLM usage (prompt_tokens, completion_tokens), when available.
    pub usage: Option<(u32, u32)>,
    /// Message count at the last think step; messages after this index use
    /// the delta estimate instead of being recounted from scratch.
    pub message_count_after_last_think: Option<usize>,
    pub max_context_tokens: u32,
    pub reserve_tokens: u32,
}

/// Hybrid overflow check: real usage for the last completion plus an
/// estimated delta for messages appended since, when both are available;
/// otherwise a full heuristic estimate over the whole history.
pub fn is_overflow(input: &ContextWindowCheck<'_>) -> bool {
    let current = match (input.usage, input.message_count_after_last_think) {
        (Some((prompt, completion)), Some(count)) if count <= input.messages.len() => {
            let base = prompt + completion;
            let delta = estimate_tokens(&input.messages[count..]);
            base + delta
        }
        _ => estimate_tokens(input.messages),
    };
    current + input.reserve_tokens > input.max_context_tokens
}
