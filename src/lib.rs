//! Companion Shell - voice and text chat core for an avatar companion
//!
//! This library provides the moving parts behind an animated desktop
//! companion:
//! - Session store owning the live transcript with SQLite persistence
//! - Chat turn orchestration (streaming and non-streaming) with avatar
//!   motion-command extraction
//! - Speech synthesis and recognition gateways with a timestamp-keyed
//!   audio cache and single-flight playback
//! - The fullscreen voice interaction state machine
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Front door (CLI / REPL)          │
//! └───────────────────┬──────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────┐
//! │  VoiceInteraction │ TurnOrchestrator          │
//! │  STT / TTS / Playback │ SessionStore          │
//! └───────────────────┬──────────────────────────┘
//!                     │
//! ┌───────────────────▼──────────────────────────┐
//! │  SQLite (sessions, audio cache, memories)     │
//! │  OpenAI-compatible LLM endpoint               │
//! └──────────────────────────────────────────────┘
//! ```

pub mod avatar;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod llm;
pub mod notify;
pub mod store;
pub mod voice;

#[cfg(test)]
pub(crate) mod testkit;

pub use config::Config;
pub use error::{Error, Result};
pub use store::SessionStore;
