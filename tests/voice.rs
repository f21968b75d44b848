//! Voice interaction loop through the public API

mod common;

use std::sync::Arc;

use common::{CollectingAvatar, CountingSynthesizer, FailingTransport, InstantOutput, StaticTransport};
use companion_shell::chat::{DispatchMode, TokenCounter, TurnConfig, TurnOrchestrator};
use companion_shell::config::RecognizerProvider;
use companion_shell::db::init_memory;
use companion_shell::notify::{NoticeLevel, RecordingNotifier};
use companion_shell::voice::playback::PlaybackManager;
use companion_shell::voice::{RecognitionGateway, SpeechService, VoiceInteraction, VoicePhase};
use companion_shell::SessionStore;

struct Harness {
    interaction: VoiceInteraction,
    notifier: Arc<RecordingNotifier>,
    synthesizer_calls: Arc<std::sync::Mutex<Vec<String>>>,
    store: Arc<SessionStore>,
}

async fn harness(transport: Arc<dyn companion_shell::llm::LlmTransport>) -> Harness {
    let pool = init_memory().unwrap();
    let notifier = Arc::new(RecordingNotifier::new());
    let store = Arc::new(SessionStore::new(pool, notifier.clone()));
    store.initialize().await;

    let synthesizer = CountingSynthesizer::default();
    let synthesizer_calls = synthesizer.calls.clone();
    let speech = Arc::new(SpeechService::new(
        Arc::new(synthesizer),
        Arc::new(PlaybackManager::new(Arc::new(InstantOutput))),
        store.audio_cache(),
        notifier.clone(),
    ));

    let orchestrator = Arc::new(TurnOrchestrator::new(
        store.clone(),
        transport,
        notifier.clone(),
        Arc::new(CollectingAvatar::default()),
        Arc::new(TokenCounter::new()),
        None,
        TurnConfig {
            model: "test-model".to_string(),
            mode: DispatchMode::Fullscreen,
            auto_speak: false,
        },
    ));

    let interaction = VoiceInteraction::new(
        store.clone(),
        orchestrator,
        RecognitionGateway::new(RecognizerProvider::Whisper {
            api_key: "unused".to_string(),
            model: "whisper-1".to_string(),
        }),
        speech,
        notifier.clone(),
    );

    Harness { interaction, notifier, synthesizer_calls, store }
}

#[tokio::test]
async fn transcript_is_sent_spoken_and_cached() {
    let h = harness(Arc::new(StaticTransport::new("Lovely to chat with you!"))).await;

    h.interaction.handle_transcript("hello companion").await;

    assert_eq!(h.interaction.phase(), VoicePhase::Idle);
    assert_eq!(h.store.message_count(), 2);
    assert_eq!(
        h.synthesizer_calls.lock().unwrap().as_slice(),
        ["Lovely to chat with you!"]
    );

    // The synthesized reply landed in the cache under the turn timestamp
    let reply = h.store.last_message().unwrap();
    let cached = h.store.audio_cache().get(reply.timestamp_ms).unwrap();
    assert_eq!(cached, Some(b"mp3-bytes".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn unanswered_turn_times_out_back_to_idle() {
    let h = harness(Arc::new(FailingTransport)).await;

    h.interaction.handle_transcript("is anyone there").await;

    assert_eq!(h.interaction.phase(), VoicePhase::Idle);
    assert!(h.notifier.has_notice(NoticeLevel::Warning, "No reply"));
    assert!(h.synthesizer_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn empty_transcript_never_reaches_the_llm() {
    let h = harness(Arc::new(FailingTransport)).await;

    h.interaction.handle_transcript("  ").await;

    assert_eq!(h.interaction.phase(), VoicePhase::Idle);
    assert_eq!(h.store.message_count(), 0);
    assert!(h.notifier.has_notice(NoticeLevel::Warning, "didn't catch"));
}

#[tokio::test]
async fn force_exit_resets_and_rearms() {
    let h = harness(Arc::new(StaticTransport::new("Still here!"))).await;

    h.interaction.force_exit();
    h.interaction.handle_transcript("ignored").await;
    assert_eq!(h.store.message_count(), 0);

    // A later recording re-arms the loop; transcripts work again
    // (start_recording is what clears the flag in the real loop)
    h.interaction.start_recording().ok();
}
