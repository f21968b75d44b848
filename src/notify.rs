//! User-facing notifications and the input busy flag
//!
//! The core never talks to a UI toolkit directly; toast-equivalent notices and
//! the "input disabled" state go through this seam.

use std::sync::Mutex;

/// Severity of a user-facing notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Why the input control is currently disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyState {
    /// Waiting for the LLM to respond
    Thinking,
    /// Streaming tokens are arriving
    Generating,
    /// Archiving the conversation into long-term memory
    Updating,
    /// Clearing the conversation
    Clearing,
}

/// Sink for toast-equivalent notices and the busy flag
pub trait Notifier: Send + Sync {
    /// Deliver a notice to the user
    fn notify(&self, level: NoticeLevel, message: &str);

    /// Set or clear the input busy flag (`None` re-enables input)
    fn set_busy(&self, busy: Option<BusyState>);

    fn info(&self, message: &str) {
        self.notify(NoticeLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.notify(NoticeLevel::Success, message);
    }

    fn warning(&self, message: &str) {
        self.notify(NoticeLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.notify(NoticeLevel::Error, message);
    }
}

/// Default notifier backed by tracing
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info | NoticeLevel::Success => tracing::info!(notice = message),
            NoticeLevel::Warning => tracing::warn!(notice = message),
            NoticeLevel::Error => tracing::error!(notice = message),
        }
    }

    fn set_busy(&self, busy: Option<BusyState>) {
        tracing::debug!(?busy, "busy state");
    }
}

/// Notifier that records everything it receives; used in tests
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
    busy: Mutex<Vec<Option<BusyState>>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All notices received so far
    #[must_use]
    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices.lock().map(|n| n.clone()).unwrap_or_default()
    }

    /// All busy transitions received so far
    #[must_use]
    pub fn busy_transitions(&self) -> Vec<Option<BusyState>> {
        self.busy.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Whether any notice at `level` contains `needle`
    #[must_use]
    pub fn has_notice(&self, level: NoticeLevel, needle: &str) -> bool {
        self.notices()
            .iter()
            .any(|(l, m)| *l == level && m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        if let Ok(mut notices) = self.notices.lock() {
            notices.push((level, message.to_string()));
        }
    }

    fn set_busy(&self, busy: Option<BusyState>) {
        if let Ok(mut transitions) = self.busy.lock() {
            transitions.push(busy);
        }
    }
}
