//! Motion command sub-grammar
//!
//! Assistant output may embed commands like `<motion:wave>` that drive the
//! avatar. They are extracted for the renderer and stripped from display text.
//! Stripping is applied to the accumulated buffer on every stream chunk, so it
//! must be idempotent and must hide a tag that is still arriving.

use std::sync::OnceLock;

use regex::Regex;

fn motion_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<motion:([A-Za-z0-9_-]+)>").unwrap_or_else(|_| unreachable!()))
}

/// Remove motion commands (including a partially-received trailing one) and trim
#[must_use]
pub fn strip_motion(text: &str) -> String {
    strip_motion_prefix(text).trim().to_string()
}

/// Like [`strip_motion`] but keeps surrounding whitespace. Applied to streamed
/// prefixes, where trimming would make the visible text shrink and regrow
/// around word boundaries.
#[must_use]
pub fn strip_motion_prefix(text: &str) -> String {
    let cleaned = motion_re().replace_all(text, "");
    trim_partial_tag(&cleaned).to_string()
}

/// Motion names embedded in the text, in order of appearance
#[must_use]
pub fn extract_motions(text: &str) -> Vec<String> {
    motion_re()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Drop an unterminated `<motion:...` suffix so it never flashes mid-stream
fn trim_partial_tag(text: &str) -> &str {
    if let Some(start) = text.rfind('<') {
        let tail = &text[start..];
        let could_be_motion = "<motion:".starts_with(tail) || tail.starts_with("<motion:");
        if !tail.contains('>') && could_be_motion {
            return &text[..start];
        }
    }
    text
}
