//! Text-to-speech and tonal cues.
//!
//! [`SpeechSynthesizer`] fronts one [`SpeechEngine`] and serializes playback:
//! every utterance takes the same lock, so speech never overlaps.

mod cue;
mod espeak;
mod kokoro;

pub use cue::{sine_samples, Cue, CuePlayer, Tone, TonePlayer, CUE_SAMPLE_RATE};
pub use espeak::EspeakEngine;
pub use kokoro::KokoroEngine;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::config::{TtsConfig, TtsEngineKind};
use crate::{truncate_preview, Result};

/// One way of turning text into audible speech.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Synthesize and play `text`, returning once playback finishes.
    async fn say(&self, text: &str) -> Result<()>;

    /// Interrupt playback in progress. Best effort.
    fn stop(&self) {}
}

/// Speech output shared by the pipeline.
#[derive(Clone)]
pub struct SpeechSynthesizer {
    engine: Arc<dyn SpeechEngine>,
    playback: Arc<Mutex<()>>,
}

impl SpeechSynthesizer {
    /// Build the engine named by `config.engine`.
    pub async fn from_config(config: &TtsConfig) -> Result<Self> {
        info!("Initializing TTS (engine: {:?})...", config.engine);
        let engine: Arc<dyn SpeechEngine> = match config.engine {
            TtsEngineKind::Kokoro => Arc::new(KokoroEngine::load(config).await?),
            TtsEngineKind::Espeak => Arc::new(EspeakEngine::new(config)?),
        };
        Ok(Self::with_engine(engine))
    }

    pub fn with_engine(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            playback: Arc::new(Mutex::new(())),
        }
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Speak `text`.
    ///
    /// With `blocking` the call returns after playback and reports engine
    /// failures. Otherwise playback runs on a detached task and failures are
    /// only logged; the order of a non-blocking utterance relative to later
    /// ones is whichever reaches the playback lock first.
    pub async fn speak(&self, text: &str, blocking: bool) -> Result<()> {
        if text.trim().is_empty() {
            warn!("Empty text provided to TTS");
            return Ok(());
        }

        info!("Speaking: {}", truncate_preview(text, 50));

        if blocking {
            let _guard = self.playback.lock().await;
            return self.engine.say(text).await;
        }

        let engine = Arc::clone(&self.engine);
        let playback = Arc::clone(&self.playback);
        let text = text.to_string();
        tokio::spawn(async move {
            let _guard = playback.lock_owned().await;
            if let Err(e) = engine.say(&text).await {
                error!("Background speech failed: {e}");
            }
        });
        Ok(())
    }

    /// Interrupt current speech. Never fails.
    pub fn stop(&self) {
        self.engine.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        spoken: StdMutex<Vec<String>>,
        stops: StdMutex<usize>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl SpeechEngine for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn say(&self, text: &str) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.spoken.lock().unwrap().push(text.to_string());
            Ok(())
        }

        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
    }

    struct Mute;

    #[async_trait]
    impl SpeechEngine for Mute {
        fn name(&self) -> &str {
            "mute"
        }

        async fn say(&self, _text: &str) -> Result<()> {
            Err(Error::Tts("no output device".into()))
        }
    }

    #[tokio::test]
    async fn blank_text_is_not_spoken() {
        let engine = Arc::new(Recording::default());
        let tts = SpeechSynthesizer::with_engine(engine.clone());
        tts.speak("", true).await.unwrap();
        tts.speak("  \n ", false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(engine.spoken.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocking_speech_finishes_before_returning() {
        let engine = Arc::new(Recording {
            delay: Some(Duration::from_millis(30)),
            ..Recording::default()
        });
        let tts = SpeechSynthesizer::with_engine(engine.clone());
        tts.speak("Done for today.", true).await.unwrap();
        assert_eq!(*engine.spoken.lock().unwrap(), vec!["Done for today."]);
    }

    #[tokio::test]
    async fn blocking_speech_reports_engine_failure() {
        let tts = SpeechSynthesizer::with_engine(Arc::new(Mute));
        assert!(matches!(tts.speak("hello", true).await, Err(Error::Tts(_))));
    }

    #[tokio::test]
    async fn non_blocking_speech_returns_immediately() {
        let engine = Arc::new(Recording {
            delay: Some(Duration::from_millis(100)),
            ..Recording::default()
        });
        let tts = SpeechSynthesizer::with_engine(engine.clone());

        tts.speak("in the background", false).await.unwrap();
        assert!(engine.spoken.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(*engine.spoken.lock().unwrap(), vec!["in the background"]);
    }

    #[tokio::test]
    async fn non_blocking_failure_is_swallowed() {
        let tts = SpeechSynthesizer::with_engine(Arc::new(Mute));
        assert!(tts.speak("hello", false).await.is_ok());
    }

    #[tokio::test]
    async fn blocking_speech_waits_for_pending_utterance() {
        let engine = Arc::new(Recording {
            delay: Some(Duration::from_millis(50)),
            ..Recording::default()
        });
        let tts = SpeechSynthesizer::with_engine(engine.clone());

        tts.speak("first", false).await.unwrap();
        // let the detached task take the playback lock
        tokio::time::sleep(Duration::from_millis(10)).await;
        tts.speak("second", true).await.unwrap();

        assert_eq!(*engine.spoken.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn stop_reaches_engine() {
        let engine = Arc::new(Recording::default());
        let tts = SpeechSynthesizer::with_engine(engine.clone());
        tts.stop();
        tts.stop();
        assert_eq!(*engine.stops.lock().unwrap(), 2);
    }
}
