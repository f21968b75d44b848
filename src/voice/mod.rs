//! Voice pipeline: capture, recognition, synthesis, playback, and the
//! fullscreen interaction state machine

pub mod capture;
pub mod interaction;
pub mod playback;
pub mod recognition;
pub mod speech;
pub mod synthesis;

pub use interaction::{VoiceInteraction, VoicePhase};
pub use playback::{PlaybackManager, PlaybackOutcome};
pub use recognition::RecognitionGateway;
pub use speech::SpeechService;
pub use synthesis::SynthesisGateway;
