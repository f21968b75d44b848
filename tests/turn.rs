//! End-to-end chat turns through the public API

mod common;

use std::sync::Arc;

use common::{CollectingAvatar, FailingTransport, StaticTransport};
use companion_shell::chat::{
    DispatchMode, TokenCounter, TurnConfig, TurnOrchestrator, APOLOGY_REPLY,
};
use companion_shell::db::{init_memory, Role};
use companion_shell::notify::RecordingNotifier;
use companion_shell::SessionStore;

struct Harness {
    store: Arc<SessionStore>,
    avatar: Arc<CollectingAvatar>,
    usage: Arc<TokenCounter>,
    orchestrator: TurnOrchestrator,
}

async fn harness(
    transport: Arc<dyn companion_shell::llm::LlmTransport>,
    mode: DispatchMode,
) -> Harness {
    let store = Arc::new(SessionStore::new(
        init_memory().unwrap(),
        Arc::new(RecordingNotifier::new()),
    ));
    store.initialize().await;

    let avatar = Arc::new(CollectingAvatar::default());
    let usage = Arc::new(TokenCounter::new());
    let orchestrator = TurnOrchestrator::new(
        store.clone(),
        transport,
        Arc::new(RecordingNotifier::new()),
        avatar.clone(),
        usage.clone(),
        None,
        TurnConfig {
            model: "test-model".to_string(),
            mode,
            auto_speak: false,
        },
    );
    Harness { store, avatar, usage, orchestrator }
}

#[tokio::test]
async fn non_streaming_turn_extracts_motion_and_usage() {
    let h = harness(
        Arc::new(StaticTransport::new("Hi there! <motion:wave>")),
        DispatchMode::Fullscreen,
    )
    .await;

    h.orchestrator.send_turn("Say hi and wave").await.unwrap();

    let messages = h.store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].content, "Hi there!");
    assert_eq!(messages[0].timestamp_ms, messages[1].timestamp_ms);
    assert_eq!(h.avatar.motions.lock().unwrap().as_slice(), ["wave"]);
    assert_eq!(h.usage.total(), 12);
}

#[tokio::test]
async fn streaming_turn_grows_one_assistant_message() {
    let h = harness(
        Arc::new(StaticTransport::new("Hello world")),
        DispatchMode::Inline,
    )
    .await;

    h.orchestrator.send_turn("greet me").await.unwrap();

    let messages = h.store.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].content, "Hello world");
    assert_eq!(h.usage.total(), 12);

    // Captions grew monotonically; each is a prefix of the final reply
    let captions = h.avatar.captions.lock().unwrap().clone();
    for pair in captions.windows(2) {
        if pair[0] == "......" {
            continue;
        }
        assert!(pair[1].starts_with(&pair[0]), "{pair:?}");
    }
}

#[tokio::test]
async fn failed_turn_leaves_only_the_user_message() {
    let h = harness(Arc::new(FailingTransport), DispatchMode::Inline).await;

    assert!(h.orchestrator.send_turn("hello?").await.is_err());

    let messages = h.store.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn empty_reply_is_replaced_with_apology() {
    let h = harness(Arc::new(StaticTransport::new("")), DispatchMode::Inline).await;

    h.orchestrator.send_turn("hm").await.unwrap();

    assert_eq!(h.store.last_message().unwrap().content, APOLOGY_REPLY);
}

#[tokio::test]
async fn archive_then_clear_resets_usage() {
    let h = harness(
        Arc::new(StaticTransport::new("A summary of the chat.")),
        DispatchMode::Fullscreen,
    )
    .await;

    h.orchestrator.send_turn("hello").await.unwrap();
    assert!(h.usage.total() > 0);

    h.orchestrator.archive_conversation().await.unwrap();
    assert!(h.store.messages().is_empty());
    assert_eq!(h.store.memories().count().unwrap(), 1);

    h.orchestrator.clear_chat();
    assert_eq!(h.usage.total(), 0);
}
