//! thor-pi: voice client for the Thor workout agent.
//!
//! One interaction cycle records a few seconds of microphone audio,
//! transcribes it, sends the text to a backend over HTTP and speaks the reply.
//! - `client`: HTTP wrappers for thor-agent and meta-runner
//! - `stt`: local whisper.cpp or remote API transcription
//! - `tts`: Kokoro or espeak speech, plus tonal cues
//! - `recorder`: fixed-duration microphone capture
//! - `pipeline`: the cycle and its manual/repeating loops

pub mod client;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod recorder;
pub mod stt;
pub mod tts;

pub use error::{Error, Result};

/// Shorten text for log lines without splitting a UTF-8 character.
pub fn truncate_preview(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
