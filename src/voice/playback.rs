//! Single-flight audio playback
//!
//! At most one reply is audible at a time. Starting a new playback cancels the
//! previous one, whose caller gets `PlaybackOutcome::Cancelled` rather than a
//! dangling future or an error.

use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::watch;

use crate::{Error, Result};

/// Playback sample rate (matches common TTS output)
const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// How a playback request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Rendered to the end
    Completed,
    /// Superseded by a newer playback or stopped explicitly
    Cancelled,
}

/// Blocking sample renderer; the cpal device in production, instant in tests
pub trait AudioOutput: Send + Sync {
    /// Render samples to the device, honouring the cancel signal
    ///
    /// # Errors
    ///
    /// Returns error if the output device fails
    fn render(&self, samples: Vec<f32>, cancel: watch::Receiver<bool>) -> Result<PlaybackOutcome>;
}

struct ActivePlayback {
    generation: u64,
    cancel: watch::Sender<bool>,
}

/// Owns the single playback slot
pub struct PlaybackManager {
    output: Arc<dyn AudioOutput>,
    generation: AtomicU64,
    active: Mutex<Option<ActivePlayback>>,
    playing: watch::Sender<bool>,
}

impl PlaybackManager {
    #[must_use]
    pub fn new(output: Arc<dyn AudioOutput>) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            output,
            generation: AtomicU64::new(0),
            active: Mutex::new(None),
            playing,
        }
    }

    /// Decode MP3 bytes and play them, cancelling any playback in flight
    ///
    /// # Errors
    ///
    /// Returns error if decoding fails or the output device fails
    pub async fn play(&self, mp3: &[u8]) -> Result<PlaybackOutcome> {
        let samples = decode_mp3(mp3)?;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut active = self
                .active
                .lock()
                .map_err(|_| Error::Audio("playback lock poisoned".to_string()))?;
            if let Some(previous) = active.take() {
                let _ = previous.cancel.send(true);
            }
            *active = Some(ActivePlayback { generation, cancel: cancel_tx });
        }
        // send_replace updates the value even when nobody subscribes
        self.playing.send_replace(true);

        let output = Arc::clone(&self.output);
        let rendered = tokio::task::spawn_blocking(move || output.render(samples, cancel_rx))
            .await
            .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?;

        // Only the playback that still owns the slot releases it
        if let Ok(mut active) = self.active.lock() {
            if active.as_ref().is_some_and(|a| a.generation == generation) {
                *active = None;
                self.playing.send_replace(false);
            }
        }

        rendered
    }

    /// Cancel whatever is playing; no-op when idle
    pub fn stop_current(&self) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(current) = active.take() {
                let _ = current.cancel.send(true);
                self.playing.send_replace(false);
            }
        }
    }

    /// Point-in-time answer; may be stale by the time the caller acts on it
    #[must_use]
    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    /// Subscribe to playing-state transitions
    #[must_use]
    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }
}

/// Real output device backed by cpal
pub struct CpalOutput;

impl AudioOutput for CpalOutput {
    fn render(&self, samples: Vec<f32>, cancel: watch::Receiver<bool>) -> Result<PlaybackOutcome> {
        if samples.is_empty() {
            return Ok(PlaybackOutcome::Completed);
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() <= 2
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

        let config: StreamConfig = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();
        let channels = config.channels as usize;

        let sample_count = samples.len();
        let shared = Arc::new(Mutex::new((samples, 0usize, false)));
        let shared_cb = Arc::clone(&shared);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let Ok(mut state) = shared_cb.lock() else { return };
                    let (samples, pos, finished) = &mut *state;
                    for frame in data.chunks_mut(channels) {
                        let sample = if *pos < samples.len() {
                            let s = samples[*pos];
                            *pos += 1;
                            s
                        } else {
                            *finished = true;
                            0.0
                        };
                        for out in frame.iter_mut() {
                            *out = sample;
                        }
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let start = std::time::Instant::now();
        let timeout = std::time::Duration::from_millis(duration_ms + 500);

        let outcome = loop {
            if *cancel.borrow() {
                break PlaybackOutcome::Cancelled;
            }
            let finished = shared.lock().map(|state| state.2).unwrap_or(true);
            if finished || start.elapsed() > timeout {
                break PlaybackOutcome::Completed;
            }
            std::thread::sleep(std::time::Duration::from_millis(50));
        };

        drop(stream);
        tracing::debug!(samples = sample_count, ?outcome, "playback finished");
        Ok(outcome)
    }
}

/// Decode MP3 bytes to mono f32 samples
fn decode_mp3(mp3: &[u8]) -> Result<Vec<f32>> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3));
    let mut samples = Vec::new();

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof | minimp3::Error::InsufficientData) => break,
            // Junk between frames is skipped, not fatal
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    Ok(samples)
}
