//! Whisper ASR transcription using whisper-rs (whisper.cpp bindings).
//!
//! Loads a GGML model once at startup, then transcribes f32 audio on demand.
//! Audio is normalized to [-1, 1] and resampled to 16kHz before inference.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use super::{resample, RecognizerEngine};
use crate::config::SttConfig;
use crate::recorder::peak_amplitude;
use crate::{truncate_preview, Error, Result};

/// Sample rate whisper.cpp expects.
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Thread-safe wrapper around WhisperContext.
/// WhisperContext is Send+Sync, so we wrap it in Arc for sharing.
#[derive(Clone)]
pub struct LocalWhisperEngine {
    ctx: Arc<WhisperContext>,
    language: String,
}

impl LocalWhisperEngine {
    /// Load the Whisper GGML model named by `config.model`.
    pub fn load(config: &SttConfig) -> Result<Self> {
        let model_path = find_model(&config.model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let path_str = model_path
            .to_str()
            .ok_or_else(|| Error::Config(format!("Model path is not UTF-8: {}", model_path.display())))?;
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| Error::Stt(format!("Failed to load Whisper model: {e}")))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            language: config.language.clone(),
        })
    }

    /// Blocking inference on 16kHz samples.
    fn run(&self, samples: &[f32]) -> Result<String> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| Error::Stt(format!("Failed to create whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some(self.language.as_str()));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| Error::Stt(format!("Whisper inference failed: {e}")))?;

        let n_segments = state.full_n_segments();

        let mut text = String::new();
        for i in 0..n_segments {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(segment_text) = segment.to_str_lossy() {
                    let trimmed = segment_text.trim();
                    if !trimmed.is_empty() {
                        if !text.is_empty() {
                            text.push(' ');
                        }
                        text.push_str(trimmed);
                    }
                }
            }
        }

        let latency_ms = t0.elapsed().as_secs_f64() * 1000.0;
        let audio_duration = samples.len() as f64 / f64::from(WHISPER_SAMPLE_RATE);
        info!(
            "Transcribed {:.1}s audio in {:.0}ms: \"{}\"",
            audio_duration,
            latency_ms,
            truncate_preview(&text, 80)
        );

        Ok(text)
    }
}

#[async_trait]
impl RecognizerEngine for LocalWhisperEngine {
    fn name(&self) -> &str {
        "whisper-local"
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        info!("Transcribing with local Whisper...");

        let mut audio = normalize(samples);
        if sample_rate != WHISPER_SAMPLE_RATE {
            warn!("Resampling from {sample_rate}Hz to {WHISPER_SAMPLE_RATE}Hz");
            audio = resample(&audio, sample_rate, WHISPER_SAMPLE_RATE)?;
        }

        let engine = self.clone();
        let text = tokio::task::spawn_blocking(move || engine.run(&audio))
            .await
            .map_err(|e| Error::Stt(format!("Transcription task failed: {e}")))??;

        Ok(text.trim().to_string())
    }
}

/// Scale audio into [-1, 1] if any sample falls outside it.
pub(crate) fn normalize(samples: &[f32]) -> Vec<f32> {
    let peak = peak_amplitude(samples);
    if peak > 1.0 {
        samples.iter().map(|s| s / peak).collect()
    } else {
        samples.to_vec()
    }
}

/// Find the GGML model file for a size name such as `base` or `small.en`.
fn find_model(model_name: &str) -> Result<PathBuf> {
    // Check if it's a direct path to an existing file
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filenames = [
        format!("ggml-{model_name}.bin"),
        format!("ggml-{model_name}.en.bin"),
    ];

    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
        dirs::home_dir().map(|h| h.join(".local/share/thor-pi/models")),
    ]
    .into_iter()
    .flatten()
    .collect();

    for dir in &search_dirs {
        for filename in &filenames {
            let path = dir.join(filename);
            if path.exists() {
                return Ok(path);
            }
        }
    }

    Err(Error::Config(format!(
        "Whisper GGML model '{model_name}' not found. Download with:\n  \
         wget https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-{model_name}.bin\n\
         Searched in: {search_dirs:?}"
    )))
}
