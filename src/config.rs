//! Configuration management for the Pi voice client.
//!
//! Loads config from YAML files in standard locations. Every section has
//! defaults, so a partial file (or no file at all) is valid. Command-line
//! flags and environment variables are layered on top in `main`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::{Error, Result};

/// Which backend service the pipeline talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// thor-agent: `{message, reset, sessionId}` conversational agent
    Agent,
    /// meta-runner: `{text, mode}` intent router
    MetaRunner,
}

/// Routing hint sent to the meta-runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    Auto,
    Thor,
    Nutrition,
    Health,
    Overview,
}

impl RoutingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Thor => "thor",
            Self::Nutrition => "nutrition",
            Self::Health => "health",
            Self::Overview => "overview",
        }
    }
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Speech recognition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SttMode {
    /// whisper.cpp model on this machine
    Local,
    /// OpenAI transcription API
    Api,
}

/// Speech synthesis engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TtsEngineKind {
    /// Kokoro ONNX model, rendered in-process
    Kokoro,
    /// `espeak` command-line tool
    Espeak,
}

/// How interaction cycles are triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Wait for ENTER before each cycle
    Manual,
    /// Run cycles back to back with a fixed pause
    Repeating,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub url: String,
    /// Chat request timeout in seconds. Unset means 30 for the agent and 90
    /// for the meta-runner, whose local models answer slowly.
    pub timeout: Option<u64>,
    /// Health check timeout in seconds.
    pub health_timeout: u64,
    pub routing_mode: RoutingMode,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Agent,
            url: "http://localhost:3001".into(),
            timeout: None,
            health_timeout: 5,
            routing_mode: RoutingMode::Auto,
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        let seconds = self.timeout.unwrap_or(match self.kind {
            BackendKind::Agent => 30,
            BackendKind::MetaRunner => 90,
        });
        Duration::from_secs(seconds)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_secs(self.health_timeout)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Seconds of audio captured per cycle.
    pub record_duration: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            record_duration: 5.0,
        }
    }
}

impl AudioConfig {
    /// Capture length. Zero when the configured value is unusable; [`Config::validate`] rejects those.
    pub fn record_duration(&self) -> Duration {
        seconds(self.record_duration).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    pub mode: SttMode,
    /// Whisper model size (tiny/base/small/medium/large) or a path to a GGML file.
    pub model: String,
    pub language: String,
    /// OpenAI API key. Usually supplied through `OPENAI_API_KEY`.
    pub api_key: Option<String>,
    pub api_url: String,
    pub api_model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            mode: SttMode::Api,
            model: "base".into(),
            language: "en".into(),
            api_key: None,
            api_url: "https://api.openai.com/v1".into(),
            api_model: "whisper-1".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub engine: TtsEngineKind,
    /// espeak speed in words per minute.
    pub rate: u32,
    /// Output volume, 0.0 to 1.0.
    pub volume: f32,
    /// Kokoro voice name.
    pub voice: String,
    /// Kokoro speed multiplier.
    pub speed: f32,
    /// Directory holding kokoro-v1.0.onnx, voices-v1.0.bin and tokenizer.json.
    /// Empty means the working directory.
    pub model_dir: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            engine: TtsEngineKind::Kokoro,
            rate: 150,
            volume: 0.9,
            voice: "af_heart".into(),
            speed: 1.0,
            model_dir: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub mode: RunMode,
    /// Seconds between cycles in repeating mode.
    pub interval: f64,
    /// Peak amplitude below which a recording counts as silence.
    pub silence_threshold: f32,
    /// Shortest transcript (in characters, after trimming) worth sending.
    pub min_transcript_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Manual,
            interval: 1.0,
            silence_threshold: 0.01,
            min_transcript_chars: 2,
        }
    }
}

impl PipelineConfig {
    pub fn interval(&self) -> Duration {
        seconds(self.interval).unwrap_or_default()
    }
}

/// Non-negative, finite seconds that fit in a [`Duration`].
fn seconds(value: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(value).ok()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendConfig,
    pub audio: AudioConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/thor-pi/config.yaml
    /// 3. /etc/thor-pi/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/thor-pi/config.yaml")),
                Some(PathBuf::from("/etc/thor-pi/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::from_yaml(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn from_yaml(contents: &str) -> std::result::Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }

    /// Reject values that cannot drive a cycle, after flags have been applied.
    pub fn validate(&self) -> Result<()> {
        match seconds(self.audio.record_duration) {
            Some(d) if !d.is_zero() => {}
            _ => {
                return Err(Error::Config(format!(
                    "record_duration must be a positive number of seconds, got {}",
                    self.audio.record_duration
                )))
            }
        }
        if seconds(self.pipeline.interval).is_none() {
            return Err(Error::Config(format!(
                "interval must be a non-negative number of seconds, got {}",
                self.pipeline.interval
            )));
        }
        Ok(())
    }
}
