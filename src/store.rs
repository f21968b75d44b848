//! Session store: the single owner of live conversation state
//!
//! Every mutation goes through this store so that the in-memory transcript,
//! persistence, and change notification stay coherent. Persistence is
//! best-effort; memory is the source of truth for the running session.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;

use crate::db::{AudioCacheRepo, ChatMessage, DbPool, MemoryRepo, SessionRepo};
use crate::notify::Notifier;
use crate::{Error, Result};

/// Delay between initialization attempts
const INIT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Default)]
struct StoreState {
    messages: Vec<ChatMessage>,
    current_session_id: Option<i64>,
    is_initialized: bool,
}

/// Shared conversation state with change notification
pub struct SessionStore {
    state: RwLock<StoreState>,
    revision: watch::Sender<u64>,
    sessions: SessionRepo,
    audio_cache: AudioCacheRepo,
    memories: MemoryRepo,
    notifier: Arc<dyn Notifier>,
}

impl SessionStore {
    /// Create a store over a database pool; call [`initialize`](Self::initialize) before use
    #[must_use]
    pub fn new(pool: DbPool, notifier: Arc<dyn Notifier>) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            state: RwLock::new(StoreState::default()),
            revision,
            sessions: SessionRepo::new(pool.clone()),
            audio_cache: AudioCacheRepo::new(pool.clone()),
            memories: MemoryRepo::new(pool),
            notifier,
        }
    }

    /// Load or create the active session, retrying every 2 seconds until storage
    /// is reachable. Publishes messages, session id, and the initialized flag as
    /// one atomic update.
    pub async fn initialize(&self) {
        loop {
            match self.try_initialize() {
                Ok(session_id) => {
                    tracing::info!(session = session_id, "session store initialized");
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "session initialization failed, retrying");
                    self.notifier
                        .error(&format!("Could not load conversation storage: {e}"));
                    tokio::time::sleep(INIT_RETRY_DELAY).await;
                }
            }
        }
    }

    fn try_initialize(&self) -> Result<i64> {
        let init_err = |e: Error| Error::Initialization(e.to_string());
        let session = self.sessions.find_or_create_active().map_err(init_err)?;
        let messages = self.sessions.messages(session.id).map_err(init_err)?;

        {
            let mut state = self.write_state()?;
            state.messages = messages;
            state.current_session_id = Some(session.id);
            state.is_initialized = true;
        }
        self.bump();
        Ok(session.id)
    }

    /// Whether initialization has completed
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state.read().map(|s| s.is_initialized).unwrap_or(false)
    }

    /// Active session id, once initialized
    #[must_use]
    pub fn current_session_id(&self) -> Option<i64> {
        self.state.read().ok().and_then(|s| s.current_session_id)
    }

    /// Snapshot of the transcript
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.state.read().map(|s| s.messages.clone()).unwrap_or_default()
    }

    /// Number of messages in the transcript
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.state.read().map(|s| s.messages.len()).unwrap_or(0)
    }

    /// Last message of the transcript, if any
    #[must_use]
    pub fn last_message(&self) -> Option<ChatMessage> {
        self.state.read().ok().and_then(|s| s.messages.last().cloned())
    }

    /// Subscribe to transcript revisions; the value bumps on every mutation
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Append a message to the in-memory transcript
    pub fn add_message(&self, message: ChatMessage) {
        if let Ok(mut state) = self.write_state() {
            state.messages.push(message);
        }
        self.bump();
    }

    /// Replace the content of the last message; no-op when the transcript is empty
    pub fn update_last_message(&self, content: &str) {
        let mut changed = false;
        if let Ok(mut state) = self.write_state() {
            if let Some(last) = state.messages.last_mut() {
                last.content = content.to_string();
                changed = true;
            }
        }
        if changed {
            self.bump();
        }
    }

    /// Replace the whole transcript
    pub fn set_messages(&self, messages: Vec<ChatMessage>) {
        if let Ok(mut state) = self.write_state() {
            state.messages = messages;
        }
        self.bump();
    }

    /// Persist a message to the active session. Skips silently when no session is
    /// active; storage failures are warned and never surfaced to the caller.
    pub fn save_message(&self, message: &ChatMessage) {
        let session_id = {
            let Ok(state) = self.state.read() else { return };
            if !state.is_initialized {
                return;
            }
            let Some(id) = state.current_session_id else {
                return;
            };
            id
        };

        if let Err(e) = self.sessions.add_message(session_id, message) {
            tracing::warn!(error = %e, session = session_id, "failed to persist message");
            self.notifier.warning("Message could not be saved");
        }
    }

    /// Clear the transcript. Memory is cleared first and unconditionally; the
    /// database delete is best-effort.
    pub fn clear_messages(&self) {
        let session_id = {
            let Ok(mut state) = self.write_state() else { return };
            state.messages.clear();
            state.current_session_id
        };
        self.bump();

        if let Some(id) = session_id {
            if let Err(e) = self.sessions.clear_messages(id) {
                tracing::warn!(error = %e, session = id, "failed to clear stored messages");
                self.notifier.warning("Stored history could not be cleared");
            }
        }
    }

    /// Switch the active session id
    pub fn set_current_session_id(&self, session_id: i64) {
        if let Ok(mut state) = self.write_state() {
            state.current_session_id = Some(session_id);
        }
        self.bump();
    }

    /// Audio cache repository for the speak flow
    #[must_use]
    pub fn audio_cache(&self) -> AudioCacheRepo {
        self.audio_cache.clone()
    }

    /// Memory repository for context building and archival
    #[must_use]
    pub fn memories(&self) -> MemoryRepo {
        self.memories.clone()
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| Error::Storage("store lock poisoned".to_string()))
    }
}
