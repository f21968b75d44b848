//! Configuration loading for the companion shell
//!
//! Settings live in a TOML file under the platform config directory and can be
//! overridden by environment variables for the secrets.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::Deserialize;

use crate::{Error, Result};

/// Resolved runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the SQLite database
    pub data_dir: PathBuf,

    /// Chat completion endpoint
    pub llm: LlmConfig,

    /// Speech synthesis provider; `Off` disables auto-speak entirely
    pub speech: SpeechProvider,

    /// Speech recognition provider
    pub recognizer: RecognizerProvider,

    /// Speak assistant replies automatically after streaming turns
    pub auto_speak: bool,
}

/// LLM endpoint configuration (OpenAI-compatible)
#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Base URL, e.g. `https://api.openai.com/v1`
    pub api_url: String,
    pub api_key: String,
    pub model: String,
}

/// Speech synthesis provider, resolved at configuration time
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum SpeechProvider {
    /// Synthesis disabled; speak requests are no-ops
    Off,
    OpenAi {
        api_key: String,
        /// TTS model, e.g. "tts-1"
        model: String,
        /// Voice identifier, e.g. "alloy"
        voice: String,
        #[serde(default = "default_speed")]
        speed: f64,
    },
    ElevenLabs {
        api_key: String,
        voice_id: String,
        #[serde(default = "default_eleven_model")]
        model: String,
    },
}

impl SpeechProvider {
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

/// Speech recognition provider, resolved at configuration time
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum RecognizerProvider {
    Whisper {
        api_key: String,
        #[serde(default = "default_whisper_model")]
        model: String,
    },
    Deepgram {
        api_key: String,
        #[serde(default = "default_deepgram_model")]
        model: String,
    },
}

fn default_speed() -> f64 {
    1.0
}

fn default_eleven_model() -> String {
    "eleven_monolingual_v1".to_string()
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_deepgram_model() -> String {
    "nova-2".to_string()
}

/// On-disk configuration file shape
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    llm: LlmConfig,
    #[serde(default)]
    speech: Option<SpeechProvider>,
    #[serde(default)]
    recognizer: Option<RecognizerProvider>,
    #[serde(default = "default_auto_speak")]
    auto_speak: bool,
}

fn default_auto_speak() -> bool {
    true
}

impl Config {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or malformed
    pub fn load() -> Result<Self> {
        let dirs = ProjectDirs::from("sh", "companion", "companion")
            .ok_or_else(|| Error::Config("cannot determine config directory".to_string()))?;
        let path = dirs.config_dir().join("config.toml");
        Self::load_from(&path, dirs.data_dir())
    }

    /// Load configuration from an explicit path
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or malformed
    pub fn load_from(path: &Path, default_data_dir: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut file: ConfigFile = toml::from_str(&raw)?;

        // Secrets may come from the environment instead of the file
        if let Ok(key) = std::env::var("COMPANION_LLM_API_KEY") {
            file.llm.api_key = key;
        }

        let recognizer = file.recognizer.ok_or_else(|| {
            Error::Config("missing [recognizer] section".to_string())
        })?;

        Ok(Self {
            data_dir: file.data_dir.unwrap_or_else(|| default_data_dir.to_path_buf()),
            llm: file.llm,
            speech: file.speech.unwrap_or(SpeechProvider::Off),
            recognizer,
            auto_speak: file.auto_speak,
        })
    }

    /// Path of the SQLite database inside the data directory
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("companion.db")
    }
}
