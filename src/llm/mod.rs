//! OpenAI-compatible chat completion transport

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};

use crate::db::Role;
use crate::{Error, Result};

/// One message of a completion request
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: &'static str,
    pub content: String,
}

impl PromptMessage {
    #[must_use]
    pub const fn system(content: String) -> Self {
        Self { role: "system", content }
    }

    #[must_use]
    pub const fn from_role(role: Role, content: String) -> Self {
        Self { role: role.as_str(), content }
    }
}

/// A chat completion request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<PromptMessage>,
}

/// A finished, non-streaming completion
#[derive(Debug, Clone)]
pub struct ChatCompletion {
    pub content: String,
    pub total_tokens: Option<u32>,
}

/// One delta of a streaming completion. Usage arrives with the final chunk.
#[derive(Debug, Clone, Default)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub total_tokens: Option<u32>,
}

/// Chat completion backend seam
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Run a non-streaming completion
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the response is malformed
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion>;

    /// Run a streaming completion, yielding content deltas in order
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>>;
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    /// Asks the endpoint to attach usage to the final stream chunk
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiUsage {
    total_tokens: u32,
}

#[derive(Deserialize)]
struct ApiStreamEvent {
    #[serde(default)]
    choices: Vec<ApiStreamChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Deserialize)]
struct ApiStreamChoice {
    delta: ApiDelta,
}

#[derive(Deserialize)]
struct ApiDelta {
    content: Option<String>,
}

/// Real transport against an OpenAI-compatible endpoint
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl OpenAiChatClient {
    #[must_use]
    pub fn new(api_url: String, api_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
            api_key,
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl LlmTransport for OpenAiChatClient {
    async fn complete(&self, request: ChatRequest) -> Result<ChatCompletion> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&ApiRequest {
                model: &request.model,
                messages: &request.messages,
                stream: false,
                stream_options: None,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("chat API returned {status}: {body}")));
        }

        let parsed: ApiResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        Ok(ChatCompletion {
            content,
            total_tokens: parsed.usage.map(|u| u.total_tokens),
        })
    }

    async fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamChunk>>> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&ApiRequest {
                model: &request.model,
                messages: &request.messages,
                stream: true,
                stream_options: Some(StreamOptions { include_usage: true }),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("chat API returned {status}: {body}")));
        }

        let bytes = response.bytes_stream().map(|r| r.map(|b| b.to_vec()));
        let chunks = futures::stream::unfold(
            SseState { bytes: bytes.boxed(), carry: String::new(), done: false },
            |mut state| async move {
                loop {
                    if state.done {
                        return None;
                    }
                    // Drain complete lines from the carry buffer first
                    if let Some(pos) = state.carry.find('\n') {
                        let line: String = state.carry.drain(..=pos).collect();
                        match parse_sse_line(line.trim()) {
                            SseLine::Chunk(chunk) => return Some((Ok(chunk), state)),
                            SseLine::Done => {
                                state.done = true;
                                return None;
                            }
                            SseLine::Skip => continue,
                        }
                    }
                    match state.bytes.next().await {
                        Some(Ok(buf)) => {
                            state.carry.push_str(&String::from_utf8_lossy(&buf));
                        }
                        Some(Err(e)) => {
                            state.done = true;
                            return Some((Err(Error::from(e)), state));
                        }
                        None => return None,
                    }
                }
            },
        );

        Ok(chunks.boxed())
    }
}

struct SseState {
    bytes: BoxStream<'static, std::result::Result<Vec<u8>, reqwest::Error>>,
    carry: String,
    done: bool,
}

enum SseLine {
    Chunk(StreamChunk),
    Done,
    Skip,
}

/// Parse one SSE line: `data: {...}` payloads, `data: [DONE]` terminator
fn parse_sse_line(line: &str) -> SseLine {
    let Some(payload) = line.strip_prefix("data: ") else {
        return SseLine::Skip;
    };
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<ApiStreamEvent>(payload) {
        Ok(event) => SseLine::Chunk(StreamChunk {
            delta: event.choices.into_iter().next().and_then(|c| c.delta.content),
            total_tokens: event.usage.map(|u| u.total_tokens),
        }),
        Err(e) => {
            tracing::debug!(error = %e, "skipping malformed stream event");
            SseLine::Skip
        }
    }
}
