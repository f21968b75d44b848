//! The speak flow: cache lookup, synthesis, playback

use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::db::AudioCacheRepo;
use crate::notify::Notifier;

use super::playback::{PlaybackManager, PlaybackOutcome};
use super::synthesis::Synthesizer;

fn emoji_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\p{Extended_Pictographic}\u{FE0F}\u{200D}]")
            .unwrap_or_else(|_| unreachable!())
    })
}

/// Remove emoji and pictographs; TTS providers read them out loud otherwise
#[must_use]
pub fn strip_emoji(text: &str) -> String {
    emoji_re().replace_all(text, "").to_string()
}

/// Speaks assistant replies, caching synthesized audio by turn timestamp
pub struct SpeechService {
    synthesizer: Arc<dyn Synthesizer>,
    playback: Arc<PlaybackManager>,
    cache: AudioCacheRepo,
    notifier: Arc<dyn Notifier>,
}

impl SpeechService {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        playback: Arc<PlaybackManager>,
        cache: AudioCacheRepo,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self { synthesizer, playback, cache, notifier }
    }

    /// Playback manager backing this service
    #[must_use]
    pub fn playback(&self) -> Arc<PlaybackManager> {
        Arc::clone(&self.playback)
    }

    /// Speak one reply. Cache hit plays directly; a miss synthesizes, caches
    /// (best effort), then plays. Failures are warned, never propagated.
    pub async fn speak_message(&self, timestamp_ms: i64, text: &str) -> PlaybackOutcome {
        if !self.synthesizer.is_enabled() {
            return PlaybackOutcome::Cancelled;
        }

        let spoken = strip_emoji(text);
        if spoken.trim().is_empty() {
            tracing::warn!(timestamp = timestamp_ms, "nothing speakable after emoji strip");
            return PlaybackOutcome::Cancelled;
        }

        let cached = match self.cache.get(timestamp_ms) {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!(error = %e, "audio cache lookup failed");
                None
            }
        };

        let audio = match cached {
            Some(audio) => audio,
            None => {
                let audio = match self.synthesizer.synthesize(&spoken).await {
                    Ok(audio) => audio,
                    Err(e) => {
                        tracing::warn!(error = %e, "speech synthesis failed");
                        self.notifier.warning("Could not synthesize speech");
                        return PlaybackOutcome::Cancelled;
                    }
                };
                if let Err(e) = self.cache.put(timestamp_ms, &audio) {
                    tracing::warn!(error = %e, "failed to cache synthesized audio");
                }
                audio
            }
        };

        match self.playback.play(&audio).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "playback failed");
                self.notifier.warning("Could not play audio");
                PlaybackOutcome::Cancelled
            }
        }
    }

    /// Stop whatever is being spoken
    pub fn stop(&self) {
        self.playback.stop_current();
    }
}
