//! Speech recognition gateway and capture session
//!
//! A recognition session owns the microphone on a dedicated thread (cpal
//! streams are not `Send`), watches for a rolling silence window after speech,
//! then hands the captured samples back for transcription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::config::RecognizerProvider;
use crate::{Error, Result};

use super::capture::{samples_to_wav, AudioCapture, SAMPLE_RATE};

/// Silence after the last detected speech that ends a session
const SILENCE_WINDOW: Duration = Duration::from_secs(2);

/// How often the session thread inspects the capture buffer
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// RMS energy above which a poll counts as speech
const SPEECH_THRESHOLD: f32 = 0.03;

/// Shorter captures than this are treated as "nothing was said"
const MIN_CAPTURE: Duration = Duration::from_millis(300);

#[derive(Deserialize)]
struct WhisperResponse {
    text: String,
}

#[derive(Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Transcribes captured speech through the configured provider
#[derive(Clone)]
pub struct RecognitionGateway {
    provider: RecognizerProvider,
    client: reqwest::Client,
}

impl RecognitionGateway {
    #[must_use]
    pub fn new(provider: RecognizerProvider) -> Self {
        Self {
            provider,
            client: reqwest::Client::new(),
        }
    }

    /// Start a microphone session; ends on [`RecognitionSession::stop`] or
    /// after 2 seconds of silence following speech
    ///
    /// `on_level` reports the RMS energy of each capture poll, not interim
    /// transcript text: the supported providers are batch and only return
    /// text once in [`RecognitionSession::finish`]. A caller wanting a live
    /// caption can render the level as a voice activity meter instead.
    ///
    /// # Errors
    ///
    /// This call itself cannot fail; device errors surface from
    /// [`RecognitionSession::finish`]
    #[allow(clippy::unnecessary_wraps)]
    pub fn start_session<F>(&self, on_level: F) -> Result<RecognitionSession>
    where
        F: Fn(f32) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);
        let (tx, rx) = oneshot::channel();

        std::thread::spawn(move || {
            let result = run_capture(&stop_thread, &on_level);
            let _ = tx.send(result);
        });

        Ok(RecognitionSession {
            stop,
            samples: rx,
            gateway: self.clone(),
        })
    }

    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if the provider call fails
    pub async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        match &self.provider {
            RecognizerProvider::Whisper { api_key, model } => {
                self.transcribe_whisper(api_key, model, wav).await
            }
            RecognizerProvider::Deepgram { api_key, model } => {
                self.transcribe_deepgram(api_key, model, wav).await
            }
        }
    }

    async fn transcribe_whisper(&self, api_key: &str, model: &str, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", model.to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!("Whisper API error {status}: {body}")));
        }

        let result: WhisperResponse = response.json().await?;
        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    async fn transcribe_deepgram(
        &self,
        api_key: &str,
        model: &str,
        wav: Vec<u8>,
    ) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting Deepgram transcription");

        let url = format!("https://api.deepgram.com/v1/listen?model={model}&punctuate=true");
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {api_key}"))
            .header("Content-Type", "audio/wav")
            .body(wav)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Recognition(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await?;
        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

/// An in-flight microphone capture
pub struct RecognitionSession {
    stop: Arc<AtomicBool>,
    samples: oneshot::Receiver<Result<Vec<f32>>>,
    gateway: RecognitionGateway,
}

impl RecognitionSession {
    /// Ask the capture thread to wind down; takes effect within one poll
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait for capture to end and transcribe the result. An empty string means
    /// nothing usable was said; it is a sentinel, not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the device failed or transcription failed
    pub async fn finish(self) -> Result<String> {
        let samples = self
            .samples
            .await
            .map_err(|_| Error::Recognition("capture thread exited abruptly".to_string()))??;

        let min_samples = (SAMPLE_RATE as u64 * MIN_CAPTURE.as_millis() as u64 / 1000) as usize;
        if samples.len() < min_samples {
            return Ok(String::new());
        }

        let wav = samples_to_wav(&samples, SAMPLE_RATE)?;
        self.gateway.transcribe(wav).await
    }
}

fn run_capture<F: Fn(f32)>(stop: &AtomicBool, on_level: &F) -> Result<Vec<f32>> {
    let mut capture = AudioCapture::new()?;
    capture.start()?;

    let window_samples = SAMPLE_RATE as usize / 2;
    let mut tracker = SilenceTracker::new(SILENCE_WINDOW);

    loop {
        std::thread::sleep(POLL_INTERVAL);
        if stop.load(Ordering::SeqCst) {
            break;
        }
        let energy = capture.recent_energy(window_samples);
        on_level(energy);
        if tracker.observe(energy > SPEECH_THRESHOLD, Instant::now()) {
            tracing::debug!("silence window elapsed, ending capture");
            break;
        }
    }

    capture.stop();
    Ok(capture.take_buffer())
}

/// Ends a capture once `window` has passed since the last detected speech.
/// Silence before any speech never ends the capture.
struct SilenceTracker {
    window: Duration,
    last_speech: Option<Instant>,
}

impl SilenceTracker {
    const fn new(window: Duration) -> Self {
        Self { window, last_speech: None }
    }

    /// Feed one poll; returns true when the capture should end
    fn observe(&mut self, is_speech: bool, now: Instant) -> bool {
        if is_speech {
            self.last_speech = Some(now);
            return false;
        }
        self.last_speech
            .is_some_and(|last| now.duration_since(last) >= self.window)
    }
}

/// Turn a recognition failure into a message a user can act on
#[must_use]
pub fn describe_recognition_error(error: &Error) -> String {
    let detail = error.to_string().to_lowercase();
    if detail.contains("permission") || detail.contains("denied") || detail.contains("no input") {
        "Microphone unavailable. Check that the app has microphone permission.".to_string()
    } else if detail.contains("network")
        || detail.contains("connection")
        || detail.contains("timed out")
        || detail.contains("dns")
    {
        "Speech service unreachable. Check your network connection.".to_string()
    } else {
        format!("Speech recognition failed: {error}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_before_speech_never_ends_capture() {
        let mut tracker = SilenceTracker::new(Duration::from_secs(2));
        let start = Instant::now();
        for i in 0..20 {
            assert!(!tracker.observe(false, start + Duration::from_millis(i * 500)));
        }
    }

    #[test]
    fn silence_window_after_speech_ends_capture() {
        let mut tracker = SilenceTracker::new(Duration::from_secs(2));
        let start = Instant::now();

        assert!(!tracker.observe(true, start));
        assert!(!tracker.observe(false, start + Duration::from_millis(500)));
        assert!(!tracker.observe(false, start + Duration::from_millis(1900)));
        assert!(tracker.observe(false, start + Duration::from_millis(2000)));
    }

    #[test]
    fn speech_resets_the_silence_window() {
        let mut tracker = SilenceTracker::new(Duration::from_secs(2));
        let start = Instant::now();

        assert!(!tracker.observe(true, start));
        assert!(!tracker.observe(false, start + Duration::from_millis(1500)));
        assert!(!tracker.observe(true, start + Duration::from_millis(1800)));
        // Window restarts from the second utterance
        assert!(!tracker.observe(false, start + Duration::from_millis(3500)));
        assert!(tracker.observe(false, start + Duration::from_millis(3900)));
    }

    #[test]
    fn permission_failures_get_a_tailored_message() {
        let err = Error::Audio("no input device available".to_string());
        assert!(describe_recognition_error(&err).contains("permission"));

        let err = Error::Recognition("connection refused".to_string());
        assert!(describe_recognition_error(&err).contains("network"));

        let err = Error::Recognition("http 500".to_string());
        assert!(describe_recognition_error(&err).contains("recognition failed"));
    }
}
