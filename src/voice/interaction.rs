//! Fullscreen voice interaction state machine
//!
//! One loop: record, recognize, send, wait for the reply, speak it, return to
//! idle. A single cancellation flag is checked at every resumption point so
//! that `force_exit` from any phase leaves no stale work behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use crate::chat::{TurnOrchestrator, APOLOGY_REPLY};
use crate::db::Role;
use crate::notify::Notifier;
use crate::store::SessionStore;
use crate::Result;

use super::recognition::{describe_recognition_error, RecognitionGateway, RecognitionSession};
use super::speech::SpeechService;

/// How long to wait for an assistant reply before giving up
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

/// Replies this short are treated as not-yet-arrived stream fragments
const MIN_REPLY_CHARS: usize = 3;

/// Where the interaction currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Idle,
    Recording,
    AwaitingReply,
    Speaking,
}

/// Drives the record → recognize → send → wait → speak loop
pub struct VoiceInteraction {
    store: Arc<SessionStore>,
    orchestrator: Arc<TurnOrchestrator>,
    recognition: RecognitionGateway,
    speech: Arc<SpeechService>,
    notifier: Arc<dyn Notifier>,
    phase: watch::Sender<VoicePhase>,
    cancelled: AtomicBool,
    active: Mutex<Option<RecognitionSession>>,
}

impl VoiceInteraction {
    #[must_use]
    pub fn new(
        store: Arc<SessionStore>,
        orchestrator: Arc<TurnOrchestrator>,
        recognition: RecognitionGateway,
        speech: Arc<SpeechService>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let (phase, _) = watch::channel(VoicePhase::Idle);
        Self {
            store,
            orchestrator,
            recognition,
            speech,
            notifier,
            phase,
            cancelled: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> VoicePhase {
        *self.phase.borrow()
    }

    /// Subscribe to phase transitions
    #[must_use]
    pub fn subscribe_phase(&self) -> watch::Receiver<VoicePhase> {
        self.phase.subscribe()
    }

    /// Begin recording; ignored unless idle
    ///
    /// # Errors
    ///
    /// Returns error if the recognition session cannot start
    pub fn start_recording(&self) -> Result<()> {
        if self.phase() != VoicePhase::Idle {
            tracing::debug!(phase = ?self.phase(), "ignoring start_recording");
            return Ok(());
        }
        // A fresh recording re-arms a previously force-exited interaction
        self.cancelled.store(false, Ordering::SeqCst);

        let session = self.recognition.start_session(|level| {
            tracing::trace!(level, "voice level");
        })?;
        if let Ok(mut active) = self.active.lock() {
            *active = Some(session);
        }
        self.set_phase(VoicePhase::Recording);
        Ok(())
    }

    /// End recording and run the rest of the loop on the transcript
    pub async fn stop_recording(&self) {
        let session = self.active.lock().ok().and_then(|mut active| active.take());
        let Some(session) = session else { return };
        session.stop();

        let transcript = match session.finish().await {
            Ok(transcript) => transcript,
            Err(e) => {
                self.notifier.error(&describe_recognition_error(&e));
                self.set_phase(VoicePhase::Idle);
                return;
            }
        };

        self.handle_transcript(&transcript).await;
    }

    /// Send a recognized transcript and speak the reply. Public so callers with
    /// their own capture path can join the loop after recognition.
    pub async fn handle_transcript(&self, transcript: &str) {
        if self.is_cancelled() {
            self.set_phase(VoicePhase::Idle);
            return;
        }

        let trimmed = transcript.trim();
        if trimmed.is_empty() {
            self.notifier.warning("I didn't catch that. Try speaking again.");
            self.set_phase(VoicePhase::Idle);
            return;
        }

        self.set_phase(VoicePhase::AwaitingReply);
        let pre_count = self.store.message_count();
        let mut revisions = self.store.subscribe();

        // The turn task is never aborted: issued network and storage calls run
        // to completion, so a late reply still lands in the transcript and the
        // busy flag is always cleared. Only the wait here gives up.
        let orchestrator = Arc::clone(&self.orchestrator);
        let text = trimmed.to_string();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.send_turn(&text).await {
                tracing::warn!(error = %e, "voice turn failed");
            }
        });

        let arrived = tokio::time::timeout(REPLY_TIMEOUT, async {
            loop {
                if self.reply_arrived(pre_count) {
                    return true;
                }
                if revisions.changed().await.is_err() {
                    return false;
                }
            }
        })
        .await
        .unwrap_or(false);

        if self.is_cancelled() {
            self.set_phase(VoicePhase::Idle);
            return;
        }
        if !arrived {
            self.notifier.warning("No reply arrived in time.");
            self.set_phase(VoicePhase::Idle);
            return;
        }

        let Some(reply) = self.store.last_message() else {
            self.set_phase(VoicePhase::Idle);
            return;
        };
        if reply.content == APOLOGY_REPLY {
            // Nothing worth saying out loud
            self.set_phase(VoicePhase::Idle);
            return;
        }

        self.set_phase(VoicePhase::Speaking);
        let outcome = self
            .speech
            .speak_message(reply.timestamp_ms, &reply.content)
            .await;
        tracing::debug!(?outcome, "voice reply playback ended");

        self.set_phase(VoicePhase::Idle);
    }

    /// Leave the loop from any phase: stop recognition and playback, cancel
    /// pending waits, return to idle
    pub fn force_exit(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        if let Ok(mut active) = self.active.lock() {
            if let Some(session) = active.take() {
                session.stop();
            }
        }
        self.speech.stop();
        self.set_phase(VoicePhase::Idle);
    }

    fn reply_arrived(&self, pre_count: usize) -> bool {
        if self.store.message_count() < pre_count + 2 {
            return false;
        }
        self.store.last_message().is_some_and(|last| {
            last.role == Role::Assistant && last.content.trim().chars().count() > MIN_REPLY_CHARS
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: VoicePhase) {
        self.phase.send_replace(phase);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{DispatchMode, TokenCounter, TurnConfig};
    use crate::config::RecognizerProvider;
    use crate::db::{init_memory, AudioCacheRepo};
    use crate::llm::ChatCompletion;
    use crate::notify::{NoticeLevel, RecordingNotifier};
    use crate::testkit::{
        FixedSynthesizer, GatedOutput, InstantOutput, RecordingAvatar, ScriptedTransport,
    };
    use crate::voice::playback::{AudioOutput, PlaybackManager};

    struct Fixture {
        interaction: Arc<VoiceInteraction>,
        notifier: Arc<RecordingNotifier>,
        synthesizer: Arc<FixedSynthesizer>,
        playback: Arc<PlaybackManager>,
        store: Arc<SessionStore>,
    }

    async fn fixture(transport: ScriptedTransport, output: Arc<dyn AudioOutput>) -> Fixture {
        let pool = init_memory().unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let store = Arc::new(SessionStore::new(pool.clone(), notifier.clone()));
        store.initialize().await;

        let playback = Arc::new(PlaybackManager::new(output));
        let synthesizer = Arc::new(FixedSynthesizer::default());
        let speech = Arc::new(SpeechService::new(
            synthesizer.clone(),
            playback.clone(),
            AudioCacheRepo::new(pool),
            notifier.clone(),
        ));
        let orchestrator = Arc::new(TurnOrchestrator::new(
            store.clone(),
            Arc::new(transport),
            notifier.clone(),
            Arc::new(RecordingAvatar::new()),
            Arc::new(TokenCounter::new()),
            None,
            TurnConfig {
                model: "test-model".to_string(),
                mode: DispatchMode::Fullscreen,
                auto_speak: false,
            },
        ));
        let recognition = RecognitionGateway::new(RecognizerProvider::Whisper {
            api_key: "unused".to_string(),
            model: "whisper-1".to_string(),
        });

        let interaction = Arc::new(VoiceInteraction::new(
            store.clone(),
            orchestrator,
            recognition,
            speech,
            notifier.clone(),
        ));
        Fixture { interaction, notifier, synthesizer, playback, store }
    }

    #[tokio::test]
    async fn reply_is_spoken_then_phase_returns_to_idle() {
        let transport = ScriptedTransport::default().with_completion(ChatCompletion {
            content: "Nice to hear from you!".to_string(),
            total_tokens: Some(5),
        });
        let fx = fixture(transport, Arc::new(InstantOutput)).await;

        fx.interaction.handle_transcript("hello there").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert_eq!(fx.store.message_count(), 2);
        assert_eq!(
            fx.synthesizer.calls.lock().unwrap().as_slice(),
            ["Nice to hear from you!"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_reply_times_out_to_idle() {
        // Transport errors immediately: the assistant message never appears
        let fx = fixture(ScriptedTransport::default(), Arc::new(InstantOutput)).await;

        fx.interaction.handle_transcript("anyone home?").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert!(fx.notifier.has_notice(NoticeLevel::Warning, "No reply"));
        assert!(fx.synthesizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn late_reply_still_lands_and_busy_flag_clears() {
        let transport = ScriptedTransport::default()
            .with_completion(ChatCompletion {
                content: "Sorry, that took a while to think about.".to_string(),
                total_tokens: None,
            })
            .with_response_delay(Duration::from_secs(20));
        let fx = fixture(transport, Arc::new(InstantOutput)).await;

        fx.interaction.handle_transcript("still with me?").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert!(fx.notifier.has_notice(NoticeLevel::Warning, "No reply"));

        // The in-flight turn was not torn down; once the provider answers,
        // the reply lands in the transcript and input is re-enabled
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fx.store.message_count(), 2);
        assert_eq!(fx.notifier.busy_transitions().last(), Some(&None));
        // The loop already gave up, so the late reply is never spoken
        assert!(fx.synthesizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn whitespace_transcript_warns_without_sending() {
        let fx = fixture(ScriptedTransport::default(), Arc::new(InstantOutput)).await;

        fx.interaction.handle_transcript("   \n ").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert_eq!(fx.store.message_count(), 0);
        assert!(fx.notifier.has_notice(NoticeLevel::Warning, "didn't catch"));
    }

    #[tokio::test]
    async fn apology_fallback_is_not_spoken() {
        let transport = ScriptedTransport::default().with_completion(ChatCompletion {
            content: String::new(),
            total_tokens: None,
        });
        let fx = fixture(transport, Arc::new(InstantOutput)).await;

        fx.interaction.handle_transcript("hm?").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert!(fx.synthesizer.calls.lock().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn force_exit_during_speaking_stops_playback() {
        let transport = ScriptedTransport::default().with_completion(ChatCompletion {
            content: "This is a long reply being spoken.".to_string(),
            total_tokens: None,
        });
        let fx = fixture(transport, Arc::new(GatedOutput)).await;

        let mut phases = fx.interaction.subscribe_phase();
        let task = {
            let interaction = fx.interaction.clone();
            tokio::spawn(async move { interaction.handle_transcript("talk to me").await })
        };

        // Wait until playback has started
        loop {
            phases.changed().await.unwrap();
            if *phases.borrow() == VoicePhase::Speaking {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        fx.interaction.force_exit();
        task.await.unwrap();

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert!(!fx.playback.is_playing());
    }

    #[tokio::test]
    async fn cancelled_flag_short_circuits_new_transcripts() {
        let fx = fixture(ScriptedTransport::default(), Arc::new(InstantOutput)).await;

        fx.interaction.force_exit();
        fx.interaction.handle_transcript("should be ignored").await;

        assert_eq!(fx.interaction.phase(), VoicePhase::Idle);
        assert_eq!(fx.store.message_count(), 0);
    }
}
