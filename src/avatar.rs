//! Avatar collaborator contract
//!
//! The Live2D renderer is an external collaborator; the core only drives its
//! caption bubble and named motions through this sink.

/// Sink for avatar caption and motion updates
pub trait AvatarSink: Send + Sync {
    /// Replace the caption text (live-mirrors streaming assistant content)
    fn set_caption(&self, text: &str);

    /// Make the caption visible
    fn show_caption(&self);

    /// Hide the caption
    fn hide_caption(&self);

    /// Play a named motion (e.g. `wave`) extracted from assistant output
    fn play_motion(&self, name: &str);
}

/// Default sink that logs avatar activity
pub struct TracingAvatar;

impl AvatarSink for TracingAvatar {
    fn set_caption(&self, text: &str) {
        tracing::debug!(caption = text, "avatar caption");
    }

    fn show_caption(&self) {
        tracing::trace!("avatar caption shown");
    }

    fn hide_caption(&self) {
        tracing::trace!("avatar caption hidden");
    }

    fn play_motion(&self, name: &str) {
        tracing::info!(motion = name, "avatar motion");
    }
}
