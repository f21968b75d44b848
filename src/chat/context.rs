//! Bounded context assembly for completion requests

use crate::db::{ChatMessage, MemoryRepo, Role};
use crate::llm::PromptMessage;
use crate::Result;

use super::prompt;

/// Rough shape of the recent conversation, used for memory scoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationPattern {
    /// Small talk, short exchanges
    Casual,
    /// The user is asking for help or troubleshooting
    HelpSeeking,
    /// Long-form explanation or teaching
    Explanation,
}

/// Classify the recent conversation by simple surface heuristics
#[must_use]
pub fn analyze_pattern(messages: &[ChatMessage]) -> ConversationPattern {
    let user_text: String = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .map(|m| m.content.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    let help_markers = ["help", "how do i", "error", "problem", "fix", "broken", "why"];
    if help_markers.iter().any(|marker| user_text.contains(marker)) {
        return ConversationPattern::HelpSeeking;
    }

    let avg_len = if messages.is_empty() {
        0
    } else {
        messages.iter().map(|m| m.content.chars().count()).sum::<usize>() / messages.len()
    };
    if avg_len > 200 {
        ConversationPattern::Explanation
    } else {
        ConversationPattern::Casual
    }
}

/// Builds the message list sent to the LLM: system prompt from retrieved
/// memories plus a bounded tail of the transcript.
pub struct ContextBuilder {
    /// Most recent transcript messages to include
    pub max_history_messages: usize,
    /// Most relevant memories to fold into the system prompt
    pub max_memories: usize,
    /// Soft cap on estimated prompt tokens
    pub context_window_tokens: usize,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            max_history_messages: 10,
            max_memories: 5,
            context_window_tokens: 6000,
        }
    }
}

impl ContextBuilder {
    /// Assemble the request messages for one turn
    ///
    /// # Errors
    ///
    /// Returns error if memory retrieval fails
    pub fn build(
        &self,
        transcript: &[ChatMessage],
        memories: &MemoryRepo,
        user_text: &str,
    ) -> Result<Vec<PromptMessage>> {
        let recalled = memories.retrieve_relevant(user_text, self.max_memories)?;
        let system = prompt::system_prompt(&recalled);

        let mut budget = self
            .context_window_tokens
            .saturating_sub(estimate_tokens(&system));

        // Walk history newest-first so the freshest turns survive the budget
        let mut history: Vec<PromptMessage> = Vec::new();
        for message in transcript.iter().rev().take(self.max_history_messages) {
            let cost = estimate_tokens(&message.content);
            if cost > budget {
                break;
            }
            budget -= cost;
            history.push(PromptMessage::from_role(message.role, message.content.clone()));
        }
        history.reverse();

        let mut request = vec![PromptMessage::system(system)];
        request.extend(history);
        Ok(request)
    }
}

/// Crude token estimate: four characters per token
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
