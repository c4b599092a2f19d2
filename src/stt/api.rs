//! Transcription through the OpenAI audio API.
//!
//! Audio is written to a temporary WAV file, uploaded as multipart form data,
//! and the file is removed when it goes out of scope, whatever the outcome.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, info};

use super::RecognizerEngine;
use crate::config::SttConfig;
use crate::{truncate_preview, Error, Result};

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Remote Whisper transcription.
pub struct WhisperApiEngine {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    language: String,
    temp_dir: Option<PathBuf>,
}

impl WhisperApiEngine {
    /// Fails with a configuration error when no API key is available.
    pub fn new(config: &SttConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                Error::Config("OPENAI_API_KEY not found. Set it in .env or the environment.".into())
            })?;

        info!("OpenAI Whisper API client initialized");
        Ok(Self {
            client: Client::new(),
            api_key,
            endpoint: format!("{}/audio/transcriptions", config.api_url.trim_end_matches('/')),
            model: config.api_model.clone(),
            language: config.language.clone(),
            temp_dir: None,
        })
    }

    /// Write temporary WAV files under `dir` instead of the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    async fn upload(&self, wav_path: &Path) -> Result<String> {
        let audio = tokio::fs::read(wav_path).await?;
        debug!(audio_bytes = audio.len(), "uploading audio for transcription");

        let part = Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| Error::Stt(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Stt(format!("Transcription request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Stt(format!("Transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::Stt(format!("Failed to parse transcription response: {e}")))?;

        Ok(result.text)
    }
}

#[async_trait]
impl RecognizerEngine for WhisperApiEngine {
    fn name(&self) -> &str {
        "whisper-api"
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        info!("Transcribing with OpenAI Whisper API...");

        let mut builder = tempfile::Builder::new();
        builder.prefix("thor-pi-").suffix(".wav");
        let wav_file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };

        write_wav(wav_file.path(), samples, sample_rate)?;

        // wav_file is deleted on drop, on every path out of this function
        let text = self.upload(wav_file.path()).await.map_err(|e| {
            error!("API transcription failed: {e}");
            e
        })?;

        let text = text.trim().to_string();
        info!("Transcription: {}", truncate_preview(&text, 80));
        Ok(text)
    }
}

/// Encode f32 samples as 16-bit mono PCM WAV.
fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let wav_err = |e: hound::Error| Error::Stt(format!("Failed to write WAV: {e}"));
    let mut writer = hound::WavWriter::create(path, spec).map_err(wav_err)?;
    for &sample in samples {
        // f32 [-1, 1] → i16
        let s = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
        writer.write_sample(s).map_err(wav_err)?;
    }
    writer.finalize().map_err(wav_err)
}
