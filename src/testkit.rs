//! Shared test doubles for unit tests

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;

use crate::avatar::AvatarSink;
use crate::llm::{ChatCompletion, ChatRequest, LlmTransport, StreamChunk};
use crate::voice::playback::{AudioOutput, PlaybackOutcome};
use crate::voice::synthesis::Synthesizer;
use crate::{Error, Result};

type ChunkScript = Vec<Result<StreamChunk>>;

/// Transport that replays scripted completions and streams
#[derive(Default)]
pub struct ScriptedTransport {
    completions: Mutex<VecDeque<ChatCompletion>>,
    streams: Mutex<VecDeque<ChunkScript>>,
    delay: Option<Duration>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn with_completion(self, completion: ChatCompletion) -> Self {
        if let Ok(mut q) = self.completions.lock() {
            q.push_back(completion);
        }
        self
    }

    #[must_use]
    pub fn with_stream(self, chunks: ChunkScript) -> Self {
        if let Ok(mut q) = self.streams.lock() {
            q.push_back(chunks);
        }
        self
    }

    /// Delay every response; models a slow provider
    #[must_use]
    pub fn with_response_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.completions
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| Error::Transport("no scripted completion".to_string()))
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        if let Ok(mut reqs) = self.requests.lock() {
            reqs.push(request);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let chunks = self
            .streams
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .ok_or_else(|| Error::Transport("no scripted stream".to_string()))?;
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Avatar sink that records captions, visibility, and motions
#[derive(Default)]
pub struct RecordingAvatar {
    captions: Mutex<Vec<String>>,
    motions: Mutex<Vec<String>>,
    hidden: Mutex<u32>,
}

impl RecordingAvatar {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn captions(&self) -> Vec<String> {
        self.captions.lock().map(|c| c.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn motions(&self) -> Vec<String> {
        self.motions.lock().map(|m| m.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn hide_count(&self) -> u32 {
        self.hidden.lock().map(|h| *h).unwrap_or(0)
    }
}

impl AvatarSink for RecordingAvatar {
    fn set_caption(&self, text: &str) {
        if let Ok(mut captions) = self.captions.lock() {
            captions.push(text.to_string());
        }
    }

    fn show_caption(&self) {}

    fn hide_caption(&self) {
        if let Ok(mut hidden) = self.hidden.lock() {
            *hidden += 1;
        }
    }

    fn play_motion(&self, name: &str) {
        if let Ok(mut motions) = self.motions.lock() {
            motions.push(name.to_string());
        }
    }
}

/// Output that finishes instantly unless already cancelled
pub struct InstantOutput;

impl AudioOutput for InstantOutput {
    fn render(&self, _samples: Vec<f32>, cancel: watch::Receiver<bool>) -> Result<PlaybackOutcome> {
        if *cancel.borrow() {
            return Ok(PlaybackOutcome::Cancelled);
        }
        Ok(PlaybackOutcome::Completed)
    }
}

/// Output that blocks until it is cancelled; models long playback
pub struct GatedOutput;

impl AudioOutput for GatedOutput {
    fn render(
        &self,
        _samples: Vec<f32>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PlaybackOutcome> {
        loop {
            if *cancel.borrow() {
                return Ok(PlaybackOutcome::Cancelled);
            }
            if cancel.has_changed().is_err() {
                return Ok(PlaybackOutcome::Cancelled);
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

/// Synthesizer that returns fixed bytes and counts calls
#[derive(Default)]
pub struct FixedSynthesizer {
    pub calls: Mutex<Vec<String>>,
    pub fail: bool,
}

#[async_trait]
impl Synthesizer for FixedSynthesizer {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        if self.fail {
            return Err(Error::Synthesis("scripted failure".to_string()));
        }
        Ok(vec![0xAA, 0xBB])
    }
}
