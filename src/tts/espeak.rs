//! espeak command-line speech.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use super::SpeechEngine;
use crate::config::TtsConfig;
use crate::{Error, Result};

/// Speaks through the `espeak` binary, one process per utterance.
pub struct EspeakEngine {
    rate: u32,
    volume: f32,
}

impl EspeakEngine {
    /// Fails with a configuration error when `espeak` is not on PATH.
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let path = which::which("espeak").map_err(|_| {
            Error::Config("espeak not found. Install with: sudo apt install espeak".into())
        })?;
        info!("Using espeak at {}", path.display());
        Ok(Self::with_settings(config.rate, config.volume))
    }

    fn with_settings(rate: u32, volume: f32) -> Self {
        Self { rate, volume }
    }

    /// Arguments for one utterance. espeak amplitude runs 0..=200.
    fn args(&self, text: &str) -> Vec<String> {
        let amplitude = (self.volume.clamp(0.0, 1.0) * 200.0).round() as u32;
        vec![
            "-v".into(),
            "en".into(),
            "-s".into(),
            self.rate.to_string(),
            "-a".into(),
            amplitude.to_string(),
            "--".into(),
            text.to_string(),
        ]
    }
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    fn name(&self) -> &str {
        "espeak"
    }

    async fn say(&self, text: &str) -> Result<()> {
        let args = self.args(text);
        debug!("espeak {:?}", &args[..args.len() - 1]);

        let status = Command::new("espeak")
            .args(&args)
            .status()
            .await
            .map_err(|e| Error::Tts(format!("Failed to run espeak: {e}")))?;

        if !status.success() {
            return Err(Error::Tts(format!("espeak exited with {status}")));
        }
        Ok(())
    }
}
