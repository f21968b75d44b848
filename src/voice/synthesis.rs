//! Speech synthesis gateway

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SpeechProvider;
use crate::{Error, Result};

/// Synthesis seam; the gateway in production, scripted bytes in tests
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Whether synthesis is configured at all
    fn is_enabled(&self) -> bool;

    /// Synthesize `text` into MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails or synthesis is disabled
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;
}

/// Real gateway over the configured provider
pub struct SynthesisGateway {
    provider: SpeechProvider,
    client: reqwest::Client,
}

impl SynthesisGateway {
    #[must_use]
    pub fn new(provider: SpeechProvider) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
        }
    }

    /// Round-trip a short phrase to verify the provider is reachable
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn probe(&self) -> Result<usize> {
        let audio = self.synthesize("Hello! This is a speech test.").await?;
        Ok(audio.len())
    }

    async fn synthesize_openai(
        &self,
        api_key: &str,
        model: &str,
        voice: &str,
        speed: f64,
        text: &str,
    ) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f64,
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(api_key)
            .json(&Request { model, input: text, voice, speed })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn synthesize_elevenlabs(
        &self,
        api_key: &str,
        voice_id: &str,
        model: &str,
        text: &str,
    ) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct Request<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice_id}");
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", api_key)
            .json(&Request { text, model_id: model })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Synthesizer for SynthesisGateway {
    fn is_enabled(&self) -> bool {
        self.provider.is_enabled()
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        match &self.provider {
            SpeechProvider::Off => {
                Err(Error::Synthesis("speech synthesis is disabled".to_string()))
            }
            SpeechProvider::OpenAi { api_key, model, voice, speed } => {
                self.synthesize_openai(api_key, model, voice, *speed, text).await
            }
            SpeechProvider::ElevenLabs { api_key, voice_id, model } => {
                self.synthesize_elevenlabs(api_key, voice_id, model, text).await
            }
        }
    }
}
