//! System prompt assembly

use crate::db::Memory;

const PERSONA: &str = "You are a friendly desktop companion with an animated avatar. \
Keep replies short and conversational. You may embed avatar motion commands of the \
form <motion:name> (e.g. <motion:wave>) where a gesture fits; they are not shown to \
the user.";

/// Build the system prompt, folding in recalled long-term memories
#[must_use]
pub fn system_prompt(memories: &[Memory]) -> String {
    if memories.is_empty() {
        return PERSONA.to_string();
    }

    let mut out = String::from(PERSONA);
    out.push_str("\n\nThings you remember about this user:\n");
    for memory in memories {
        out.push_str("- ");
        out.push_str(&memory.summary);
        out.push('\n');
    }
    out
}

/// Prompt asking the model to summarize a finished conversation for archival
#[must_use]
pub fn summarize_prompt(transcript_text: &str) -> String {
    format!(
        "Summarize the following conversation in two or three sentences, keeping any \
facts about the user worth remembering:\n\n{transcript_text}"
    )
}
