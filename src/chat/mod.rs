//! Chat turn orchestration

pub mod context;
pub mod motion;
pub mod prompt;
pub mod turn;

use std::sync::atomic::{AtomicU64, Ordering};

pub use context::{ContextBuilder, ConversationPattern};
pub use turn::{DispatchMode, TurnConfig, TurnOrchestrator, APOLOGY_REPLY};

/// Sink for token usage accounting
pub trait UsageSink: Send + Sync {
    /// Record tokens spent by one completed turn
    fn record(&self, total_tokens: u32);

    /// Reset the running total (conversation cleared)
    fn reset(&self);
}

/// Default usage sink: a process-wide running total
#[derive(Default)]
pub struct TokenCounter {
    total: AtomicU64,
}

impl TokenCounter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens recorded since the last reset
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

impl UsageSink for TokenCounter {
    fn record(&self, total_tokens: u32) {
        self.total.fetch_add(u64::from(total_tokens), Ordering::Relaxed);
    }

    fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
    }
}
