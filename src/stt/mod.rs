//! Speech-to-text.
//!
//! [`SpeechRecognizer`] wraps exactly one engine, chosen from configuration
//! when it is built:
//! - `local`: whisper.cpp model loaded into this process
//! - `api`: OpenAI transcription endpoint
//!
//! Callers only see `transcribe`. Failures surface as [`Error::Stt`] and are
//! never retried or routed to the other engine.

mod api;
mod local;
mod resample;

pub use api::WhisperApiEngine;
pub use local::LocalWhisperEngine;
pub use resample::resample;

use async_trait::async_trait;
use tracing::info;

use crate::config::{SttConfig, SttMode};
use crate::{Error, Result};

/// One way of turning audio into text.
#[async_trait]
pub trait RecognizerEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe mono f32 samples recorded at `sample_rate`.
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Speech recognizer backed by a single configured engine.
pub struct SpeechRecognizer {
    engine: Box<dyn RecognizerEngine>,
}

impl SpeechRecognizer {
    /// Build the engine named by `config.mode`.
    ///
    /// Loading a local model blocks for a few seconds; the API engine fails
    /// immediately without a key.
    pub async fn from_config(config: &SttConfig) -> Result<Self> {
        info!("Initializing STT (mode: {:?})...", config.mode);
        let engine: Box<dyn RecognizerEngine> = match config.mode {
            SttMode::Local => {
                let config = config.clone();
                let engine = tokio::task::spawn_blocking(move || LocalWhisperEngine::load(&config))
                    .await
                    .map_err(|e| Error::Stt(format!("Model loading task failed: {e}")))??;
                Box::new(engine)
            }
            SttMode::Api => Box::new(WhisperApiEngine::new(config)?),
        };
        Ok(Self { engine })
    }

    pub fn with_engine(engine: Box<dyn RecognizerEngine>) -> Self {
        Self { engine }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Transcribe audio, returning text with surrounding whitespace removed.
    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        let text = self.engine.transcribe(samples, sample_rate).await?;
        Ok(text.trim().to_string())
    }
}
