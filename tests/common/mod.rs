//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use tokio::sync::watch;

use companion_shell::avatar::AvatarSink;
use companion_shell::llm::{ChatCompletion, ChatRequest, LlmTransport, StreamChunk};
use companion_shell::voice::playback::{AudioOutput, PlaybackOutcome};
use companion_shell::voice::synthesis::Synthesizer;
use companion_shell::{Error, Result};

/// Transport that always answers with a fixed reply. Streaming splits the
/// reply into 4-byte chunks, mimicking token deltas.
pub struct StaticTransport {
    pub reply: String,
    pub total_tokens: u32,
}

impl StaticTransport {
    pub fn new(reply: &str) -> Self {
        Self { reply: reply.to_string(), total_tokens: 12 }
    }
}

#[async_trait]
impl LlmTransport for StaticTransport {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
        Ok(ChatCompletion {
            content: self.reply.clone(),
            total_tokens: Some(self.total_tokens),
        })
    }

    async fn stream(
        &self,
        _request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let bytes = self.reply.clone().into_bytes();
        let mut chunks: Vec<Result<StreamChunk>> = bytes
            .chunks(4)
            .map(|c| {
                Ok(StreamChunk {
                    delta: Some(String::from_utf8_lossy(c).to_string()),
                    total_tokens: None,
                })
            })
            .collect();
        chunks.push(Ok(StreamChunk {
            delta: None,
            total_tokens: Some(self.total_tokens),
        }));
        Ok(futures::stream::iter(chunks).boxed())
    }
}

/// Transport that fails every request
pub struct FailingTransport;

#[async_trait]
impl LlmTransport for FailingTransport {
    async fn complete(&self, _request: ChatRequest) -> Result<ChatCompletion> {
        Err(Error::Transport("scripted outage".to_string()))
    }

    async fn stream(
        &self,
        _request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        Err(Error::Transport("scripted outage".to_string()))
    }
}

/// Avatar that records motions and the final caption
#[derive(Default)]
pub struct CollectingAvatar {
    pub motions: Mutex<Vec<String>>,
    pub captions: Mutex<Vec<String>>,
}

impl AvatarSink for CollectingAvatar {
    fn set_caption(&self, text: &str) {
        if let Ok(mut captions) = self.captions.lock() {
            captions.push(text.to_string());
        }
    }

    fn show_caption(&self) {}

    fn hide_caption(&self) {}

    fn play_motion(&self, name: &str) {
        if let Ok(mut motions) = self.motions.lock() {
            motions.push(name.to_string());
        }
    }
}

/// Output that renders instantly
pub struct InstantOutput;

impl AudioOutput for InstantOutput {
    fn render(&self, _samples: Vec<f32>, cancel: watch::Receiver<bool>) -> Result<PlaybackOutcome> {
        if *cancel.borrow() {
            return Ok(PlaybackOutcome::Cancelled);
        }
        Ok(PlaybackOutcome::Completed)
    }
}

/// Synthesizer that returns recognizable bytes and counts invocations
#[derive(Default)]
pub struct CountingSynthesizer {
    pub calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Synthesizer for CountingSynthesizer {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(text.to_string());
        }
        Ok(b"mp3-bytes".to_vec())
    }
}
