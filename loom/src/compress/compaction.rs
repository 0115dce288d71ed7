//! Conversation compaction: prune old tool results and compact history via
//! LLM summarization.
//!
//! - **prune**: replace old tool results beyond a token limit with a
//!   placeholder to bound context length without a full summarization pass.
//! - **compact**: summarize earlier messages into one system message via LLM
//!   and keep the most recent N verbatim.

use crate::error::AgentError;
use crate::llm::LlmClient;
use crate::message::Message;

use super::config::CompactionConfig;
use super::context_window::estimate_tokens;

pub const PRUNE_PLACEHOLDER: &str = "[Old tool result cleared]";

fn is_tool_result(m: &Message) -> bool {
    matches!(m, Message::Tool { .. })
}

/// Replaces old tool results beyond `prune_keep_tokens` with a placeholder.
///
/// Walks from newest to oldest, accumulating tokens across tool-result
/// messages only; once the running total exceeds `prune_keep_tokens`, every
/// older tool result is marked for pruning. No-ops if the total prunable
/// tokens would fall below `prune_minimum` (avoids frequent tiny edits).
pub fn prune(messages: Vec<Message>, config: &CompactionConfig) -> Vec<Message> {
    if !config.prune || config.prune_keep_tokens == 0 {
        return messages;
    }
    let min = config.prune_minimum.unwrap_or(20_000);

    let mut total: u32 = 0;
    let mut prunable: u32 = 0;
    let mut to_prune = Vec::new();

    for (i, m) in messages.iter().enumerate().rev() {
        if is_tool_result(m) {
            let tok = estimate_tokens(std::slice::from_ref(m));
            total += tok;
            if total > config.prune_keep_tokens {
                prunable += tok;
                to_prune.push(i);
            }
        }
    }

    if prunable < min {
        return messages;
    }

    let mut out = messages;
    for i in to_prune {
        if let Some(Message::Tool { content, .. }) = out.get_mut(i) {
            *content = PRUNE_PLACEHOLDER.to_string();
        }
    }
    out
}

/// Summarizes earlier messages into one system message via `llm` and keeps
/// the most recent `compact_keep_recent` messages as-is. Output is
/// `[summary system message] + [recent messages]`.
pub async fn compact(
    messages: &[Message],
    llm: &dyn LlmClient,
    config: &CompactionConfig,
) -> Result<Vec<Message>, AgentError> {
    let keep = config.compact_keep_recent;
    if messages.len() <= keep {
        return Ok(messages.to_vec());
    }
    let split = messages.len().saturating_sub(keep);
    let (to_summarize, recent) = messages.split_at(split);

    let prompt = build_summary_prompt(to_summarize);
    let response = llm.invoke(&[Message::user(prompt)]).await?;

    let summary = Message::system(format!("[Summary of earlier conversation]: {}", response.content));
    let mut out = vec![summary];
    out.extend(recent.iter().cloned());
    Ok(out)
}

fn build_summary_prompt(msgs: &[Message]) -> String {
    let mut parts = vec![
        "Summarize the following conversation. Focus on:".to_string(),
        "- What was done".to_string(),
        "- What is being worked on".to_string(),
        "- Which files are involved".to_string(),
        "- What needs to be done next".to_string(),
        String::new(),
    ];
    for m in msgs {
        parts.push(format!("{}: {}", m.role(), m.content()));
    }
    parts.join("\n")
}
