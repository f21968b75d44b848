//! Turn orchestration: one user input to one finished assistant reply

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;

use crate::avatar::AvatarSink;
use crate::db::{ChatMessage, Role};
use crate::llm::{ChatRequest, LlmTransport};
use crate::notify::{BusyState, Notifier};
use crate::store::SessionStore;
use crate::voice::speech::SpeechService;
use crate::{Error, Result};

use super::context::{analyze_pattern, ContextBuilder, ConversationPattern};
use super::motion::{extract_motions, strip_motion, strip_motion_prefix};
use super::{prompt, UsageSink};

/// Shown while the reply is pending and substituted for an empty reply
pub const APOLOGY_REPLY: &str = "Sorry, I didn't quite catch that. Could you say it again?";

/// Caption shown while waiting for the first token
const THINKING_CAPTION: &str = "......";

/// How long the finished caption stays on screen
const CAPTION_HIDE_DELAY: Duration = Duration::from_secs(3);

/// How a turn's reply is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Streaming: the transcript's last message grows chunk by chunk
    Inline,
    /// Non-streaming: one completed reply (fullscreen voice mode)
    Fullscreen,
}

/// Per-orchestrator settings
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub model: String,
    pub mode: DispatchMode,
    /// Speak finished streaming replies automatically
    pub auto_speak: bool,
}

/// Drives one chat turn end to end: append user message, build context, call
/// the LLM, publish the reply, account usage.
///
/// Concurrent `send_turn` calls on one orchestrator are not supported; the
/// busy flag is the caller's guard.
pub struct TurnOrchestrator {
    store: Arc<SessionStore>,
    transport: Arc<dyn LlmTransport>,
    context: ContextBuilder,
    notifier: Arc<dyn Notifier>,
    avatar: Arc<dyn AvatarSink>,
    usage: Arc<dyn UsageSink>,
    speech: Option<Arc<SpeechService>>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<SessionStore>,
        transport: Arc<dyn LlmTransport>,
        notifier: Arc<dyn Notifier>,
        avatar: Arc<dyn AvatarSink>,
        usage: Arc<dyn UsageSink>,
        speech: Option<Arc<SpeechService>>,
        config: TurnConfig,
    ) -> Self {
        Self {
            store,
            transport,
            context: ContextBuilder::default(),
            notifier,
            avatar,
            usage,
            speech,
            config,
        }
    }

    /// Run one turn for `text`
    ///
    /// # Errors
    ///
    /// Returns `SessionNotReady` before any state changes when the store is not
    /// initialized, and `Transport` when the completion fails.
    pub async fn send_turn(&self, text: &str) -> Result<()> {
        if !self.store.is_initialized() || self.store.current_session_id().is_none() {
            return Err(Error::SessionNotReady(
                "no active session; still initializing".to_string(),
            ));
        }
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        // Both messages of the turn share this timestamp; it is the audio cache key
        let turn_ts = Utc::now().timestamp_millis();

        let user = ChatMessage::with_timestamp(Role::User, trimmed, turn_ts);
        self.store.add_message(user.clone());
        self.store.save_message(&user);

        self.notifier.set_busy(Some(BusyState::Thinking));
        self.avatar.set_caption(THINKING_CAPTION);
        self.avatar.show_caption();

        let request = match self.context.build(
            &self.store.messages(),
            &self.store.memories(),
            trimmed,
        ) {
            Ok(messages) => ChatRequest { model: self.config.model.clone(), messages },
            Err(e) => {
                self.abort_turn(&e);
                return Err(e);
            }
        };

        let outcome = match self.config.mode {
            DispatchMode::Fullscreen => self.run_complete(turn_ts, request).await,
            DispatchMode::Inline => self.run_stream(turn_ts, request).await,
        };

        match outcome {
            Ok(()) => {
                self.notifier.set_busy(None);
                self.schedule_caption_hide();
                Ok(())
            }
            Err(e) => {
                self.abort_turn(&e);
                Err(e)
            }
        }
    }

    async fn run_complete(&self, turn_ts: i64, request: ChatRequest) -> Result<()> {
        let completion = self.transport.complete(request).await?;

        for motion in extract_motions(&completion.content) {
            self.avatar.play_motion(&motion);
        }

        let mut display = strip_motion(&completion.content);
        if display.is_empty() {
            display = APOLOGY_REPLY.to_string();
        }

        let reply = ChatMessage::with_timestamp(Role::Assistant, display.clone(), turn_ts);
        self.store.add_message(reply.clone());
        self.store.save_message(&reply);
        self.avatar.set_caption(&display);

        if let Some(tokens) = completion.total_tokens {
            self.usage.record(tokens);
        }
        Ok(())
    }

    async fn run_stream(&self, turn_ts: i64, request: ChatRequest) -> Result<()> {
        let mut stream = self.transport.stream(request).await?;

        // The in-flight reply lives in the transcript from the first moment
        self.store
            .add_message(ChatMessage::with_timestamp(Role::Assistant, "", turn_ts));

        let mut raw = String::new();
        let mut total_tokens = None;
        let mut first_delta = true;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    // Keep whatever already arrived; the turn still finalizes
                    tracing::warn!(error = %e, "stream interrupted");
                    self.notifier.warning("Reply was cut short");
                    break;
                }
            };
            if let Some(tokens) = chunk.total_tokens {
                total_tokens = Some(tokens);
            }
            let Some(delta) = chunk.delta else { continue };
            if first_delta {
                self.notifier.set_busy(Some(BusyState::Generating));
                first_delta = false;
            }

            raw.push_str(&delta);
            // Strip from the whole accumulated buffer so a tag split across
            // chunks never reaches the screen; whitespace is kept so the
            // visible text only grows. Trimming happens at finalization.
            let cleaned = strip_motion_prefix(&raw);
            self.store.update_last_message(&cleaned);
            self.avatar.set_caption(&cleaned);
        }

        for motion in extract_motions(&raw) {
            self.avatar.play_motion(&motion);
        }

        let mut display = strip_motion(&raw);
        if display.is_empty() {
            display = APOLOGY_REPLY.to_string();
            self.avatar.set_caption(&display);
        }
        self.store.update_last_message(&display);
        if let Some(reply) = self.store.last_message() {
            self.store.save_message(&reply);
        }

        if let Some(tokens) = total_tokens {
            self.usage.record(tokens);
        }

        if self.config.auto_speak {
            if let Some(speech) = self.speech.clone() {
                // Fire and forget; playback failures surface through the speech service
                tokio::spawn(async move {
                    speech.speak_message(turn_ts, &display).await;
                });
            }
        }
        Ok(())
    }

    /// Archive the conversation into long-term memory, then clear it
    ///
    /// # Errors
    ///
    /// Returns error if summarization or persistence fails
    pub async fn archive_conversation(&self) -> Result<()> {
        let messages = self.store.messages();
        if messages.is_empty() {
            self.notifier.info("Nothing to archive");
            return Ok(());
        }

        self.notifier.set_busy(Some(BusyState::Updating));
        let result = self.archive_inner(&messages).await;
        self.notifier.set_busy(None);

        match result {
            Ok(()) => {
                self.store.clear_messages();
                self.notifier.success("Conversation archived");
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Archiving failed; conversation kept");
                Err(e)
            }
        }
    }

    async fn archive_inner(&self, messages: &[ChatMessage]) -> Result<()> {
        let transcript: String = messages
            .iter()
            .map(|m| format!("{}: {}", m.role.as_str(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![crate::llm::PromptMessage::system(prompt::summarize_prompt(
                &transcript,
            ))],
        };
        let completion = self.transport.complete(request).await?;
        let summary = if completion.content.trim().is_empty() {
            "No summary available".to_string()
        } else {
            completion.content.trim().to_string()
        };

        let pattern = analyze_pattern(messages);
        let importance = importance_score(messages.len(), pattern);
        let tags = match pattern {
            ConversationPattern::Casual => "casual",
            ConversationPattern::HelpSeeking => "help",
            ConversationPattern::Explanation => "explanation",
        };

        self.store.memories().add(&transcript, &summary, importance, tags)?;
        Ok(())
    }

    /// Clear the conversation and reset token usage
    pub fn clear_chat(&self) {
        self.notifier.set_busy(Some(BusyState::Clearing));
        self.store.clear_messages();
        self.usage.reset();
        self.notifier.set_busy(None);
        self.notifier.success("Conversation cleared");
    }

    fn abort_turn(&self, error: &Error) {
        tracing::error!(error = %error, "turn failed");
        self.notifier.error(&format!("Reply failed: {error}"));
        self.notifier.set_busy(None);
        self.avatar.hide_caption();
    }

    fn schedule_caption_hide(&self) {
        let avatar = Arc::clone(&self.avatar);
        tokio::spawn(async move {
            tokio::time::sleep(CAPTION_HIDE_DELAY).await;
            avatar.hide_caption();
        });
    }
}

/// Longer, help-oriented conversations earn a higher recall priority
fn importance_score(message_count: usize, pattern: ConversationPattern) -> u32 {
    #[allow(clippy::cast_possible_truncation)]
    let base = message_count.min(10) as u32;
    let adjusted = base
        + match pattern {
            ConversationPattern::Casual => 0,
            ConversationPattern::Explanation => 2,
            ConversationPattern::HelpSeeking => 3,
        };
    adjusted.clamp(1, 15)
}
