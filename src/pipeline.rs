//! Voice interaction cycle and the loops that drive it.
//!
//! IDLE → LISTENING → TRANSCRIBING → DISPATCHING → SPEAKING → IDLE
//!
//! A cycle stops at the first handled failure, tells the user what went
//! wrong, and returns to IDLE. Anything spoken, apologies included, is spoken
//! in SPEAKING. Nothing in a cycle is retried.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::client::ChatBackend;
use crate::config::Config;
use crate::recorder::{is_silent, AudioRecorder};
use crate::stt::SpeechRecognizer;
use crate::tts::{Cue, CuePlayer, SpeechSynthesizer};
use crate::{truncate_preview, Error, Result};

pub const SILENCE_MESSAGE: &str = "I didn't hear anything. Please try again.";
pub const TRANSCRIPTION_FAILED_MESSAGE: &str = "Sorry, I couldn't understand that.";
pub const SHORT_TRANSCRIPT_MESSAGE: &str = "I didn't catch that. Please speak clearly.";
pub const BACKEND_FAILED_MESSAGE: &str = "Sorry, I couldn't reach the workout server.";
pub const EMPTY_REPLY_MESSAGE: &str = "Sorry, I didn't get a response.";

/// Where a cycle is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Listening,
    Transcribing,
    Dispatching,
    Speaking,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "IDLE"),
            Self::Listening => write!(f, "LISTENING"),
            Self::Transcribing => write!(f, "TRANSCRIBING"),
            Self::Dispatching => write!(f, "DISPATCHING"),
            Self::Speaking => write!(f, "SPEAKING"),
        }
    }
}

/// Something that can capture a fixed-duration mono clip.
#[async_trait]
pub trait AudioSource: Send + Sync {
    fn sample_rate(&self) -> u32;

    async fn capture(&self, duration: Duration) -> Result<Vec<f32>>;
}

#[async_trait]
impl AudioSource for AudioRecorder {
    fn sample_rate(&self) -> u32 {
        AudioRecorder::sample_rate(self)
    }

    async fn capture(&self, duration: Duration) -> Result<Vec<f32>> {
        let recorder = self.clone();
        tokio::task::spawn_blocking(move || recorder.record(duration))
            .await
            .map_err(|e| Error::Audio(format!("Recording task failed: {e}")))?
    }
}

/// Per-cycle thresholds.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub record_duration: Duration,
    /// Peak amplitude below which a clip counts as silence.
    pub silence_threshold: f32,
    /// Shortest transcript, in characters, worth sending to the backend.
    pub min_transcript_chars: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            record_duration: config.audio.record_duration(),
            silence_threshold: config.pipeline.silence_threshold,
            min_transcript_chars: config.pipeline.min_transcript_chars,
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// A completed exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub transcript: String,
    pub reply: String,
    pub actions: Vec<Value>,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(Interaction),
    CaptureFailed,
    Silence,
    TranscriptionFailed,
    TranscriptTooShort,
    BackendFailed,
    EmptyReply,
}

/// Record → transcribe → dispatch → speak.
pub struct VoicePipeline {
    source: Box<dyn AudioSource>,
    recognizer: SpeechRecognizer,
    backend: Box<dyn ChatBackend>,
    synthesizer: SpeechSynthesizer,
    cues: Arc<dyn CuePlayer>,
    settings: PipelineSettings,
    stage: watch::Sender<Stage>,
}

impl VoicePipeline {
    pub fn new(
        source: Box<dyn AudioSource>,
        recognizer: SpeechRecognizer,
        backend: Box<dyn ChatBackend>,
        synthesizer: SpeechSynthesizer,
        cues: Arc<dyn CuePlayer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            recognizer,
            backend,
            synthesizer,
            cues,
            settings,
            stage: watch::Sender::new(Stage::Idle),
        }
    }

    pub fn stage(&self) -> Stage {
        *self.stage.borrow()
    }

    /// Follow stage changes, e.g. to drive a status LED.
    pub fn watch_stage(&self) -> watch::Receiver<Stage> {
        self.stage.subscribe()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Fail with [`Error::BackendUnavailable`] unless the backend reports healthy.
    pub async fn ensure_backend_ready(&self) -> Result<()> {
        let name = self.backend.name();
        info!("Checking {name} health...");
        if !self.backend.health_check().await {
            error!("{name} is not available");
            return Err(Error::BackendUnavailable(name.to_string()));
        }
        info!("{name} is ready");
        Ok(())
    }

    /// Run one interaction cycle. Always ends back in IDLE.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        let outcome = self.cycle().await;
        self.transition(Stage::Idle);
        outcome
    }

    async fn cycle(&mut self) -> CycleOutcome {
        self.transition(Stage::Listening);
        self.cue(Cue::Ready).await;

        let samples = match self.source.capture(self.settings.record_duration).await {
            Ok(samples) => samples,
            Err(e) => {
                error!("Recording failed: {e}");
                self.cue(Cue::Error).await;
                return CycleOutcome::CaptureFailed;
            }
        };
        self.cue(Cue::Done).await;

        if is_silent(&samples, self.settings.silence_threshold) {
            warn!("No speech detected (silence)");
            self.say(SILENCE_MESSAGE).await;
            return CycleOutcome::Silence;
        }

        self.transition(Stage::Transcribing);
        let transcript = match self
            .recognizer
            .transcribe(&samples, self.source.sample_rate())
            .await
        {
            Ok(text) => text,
            Err(e) => {
                error!("Transcription failed: {e}");
                self.say(TRANSCRIPTION_FAILED_MESSAGE).await;
                return CycleOutcome::TranscriptionFailed;
            }
        };

        if transcript.chars().count() < self.settings.min_transcript_chars {
            warn!("Transcript too short: {transcript:?}");
            self.say(SHORT_TRANSCRIPT_MESSAGE).await;
            return CycleOutcome::TranscriptTooShort;
        }
        info!("You said: {transcript}");

        self.transition(Stage::Dispatching);
        let turn = match self.backend.chat(&transcript).await {
            Ok(turn) => turn,
            Err(e) => {
                error!("{} request failed: {e}", self.backend.name());
                self.say(BACKEND_FAILED_MESSAGE).await;
                return CycleOutcome::BackendFailed;
            }
        };

        if turn.reply.trim().is_empty() {
            warn!("Empty reply from {}", self.backend.name());
            self.say(EMPTY_REPLY_MESSAGE).await;
            return CycleOutcome::EmptyReply;
        }

        if !turn.actions.is_empty() {
            info!("Backend reported {} action(s)", turn.actions.len());
            for action in &turn.actions {
                debug!("  {action}");
            }
        }
        info!("Reply: {}", truncate_preview(&turn.reply, 100));

        self.say(&turn.reply).await;

        CycleOutcome::Completed(Interaction {
            transcript,
            reply: turn.reply,
            actions: turn.actions,
        })
    }

    /// Wait for a line on `trigger` before each cycle.
    ///
    /// Ends when the trigger reaches EOF or `shutdown` resolves, returning the
    /// number of cycles that ran to an outcome.
    pub async fn run_manual<R, S>(&mut self, trigger: R, shutdown: S) -> Result<usize>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        self.ensure_backend_ready().await?;
        tokio::pin!(shutdown);

        let mut lines = trigger.lines();
        let mut cycles = 0;

        loop {
            info!("Press Enter to speak (Ctrl+C to quit)");
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(_) => {}
                    None => {
                        info!("Trigger input closed");
                        break;
                    }
                },
                () = &mut shutdown => {
                    info!("Shutting down...");
                    break;
                }
            }

            tokio::select! {
                outcome = self.run_cycle() => {
                    cycles += 1;
                    debug!("Cycle {cycles} finished: {outcome:?}");
                }
                () = &mut shutdown => {
                    info!("Shutting down...");
                    break;
                }
            }
        }

        self.synthesizer.stop();
        Ok(cycles)
    }

    /// Run cycles back to back with `interval` between them until `shutdown` resolves.
    pub async fn run_repeating<S>(&mut self, interval: Duration, shutdown: S) -> Result<usize>
    where
        S: Future<Output = ()>,
    {
        self.ensure_backend_ready().await?;
        tokio::pin!(shutdown);

        info!("Repeating mode: listening every {:.1}s", interval.as_secs_f64());
        let mut cycles = 0;

        loop {
            tokio::select! {
                outcome = self.run_cycle() => {
                    cycles += 1;
                    debug!("Cycle {cycles} finished: {outcome:?}");
                }
                () = &mut shutdown => break,
            }

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = &mut shutdown => break,
            }
        }

        info!("Shutting down...");
        self.synthesizer.stop();
        Ok(cycles)
    }

    fn transition(&mut self, next: Stage) {
        let current = self.stage();
        if current != next {
            info!("State: {current} → {next}");
            self.stage.send_replace(next);
        }
    }

    /// Enter SPEAKING and speak to completion; a synthesis failure is logged
    /// and answered with the error cue.
    async fn say(&mut self, text: &str) {
        self.transition(Stage::Speaking);
        if let Err(e) = self.synthesizer.speak(text, true).await {
            error!("Speech failed: {e}");
            self.cue(Cue::Error).await;
        }
    }

    async fn cue(&self, cue: Cue) {
        let cues = Arc::clone(&self.cues);
        if let Err(e) = tokio::task::spawn_blocking(move || cues.play(cue)).await {
            warn!("Cue task failed: {e}");
        }
    }
}
