//! Kokoro TTS engine: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Audio → rodio Sink playback, checking for cancellation

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ndarray::{Array1, Array2, Array3};
use ndarray_npy::NpzReader;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStreamBuilder, Sink};
use tracing::{debug, info};

use super::SpeechEngine;
use crate::config::TtsConfig;
use crate::{Error, Result};

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension
const STYLE_DIM: usize = 256;
const CANCEL_POLL: Duration = Duration::from_millis(50);

const MODEL_FILE: &str = "kokoro-v1.0.onnx";
const VOICES_FILE: &str = "voices-v1.0.bin";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// Loaded model state. Inference is blocking and runs on worker threads.
struct KokoroModel {
    // ort 2.0 Session::run needs &mut
    session: Mutex<Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    /// Style vectors for the configured voice indexed by token count, shape (510, 256).
    styles: Array2<f32>,
    speed: f32,
}

/// Native Kokoro TTS engine.
pub struct KokoroEngine {
    model: Arc<KokoroModel>,
    cancel_flag: Arc<AtomicBool>,
}

impl KokoroEngine {
    /// Load the ONNX model, tokenizer, voice and phonemizer from `config.model_dir`.
    pub async fn load(config: &TtsConfig) -> Result<Self> {
        let config = config.clone();
        let model = tokio::task::spawn_blocking(move || KokoroModel::load(&config))
            .await
            .map_err(|e| Error::Tts(format!("Model loading task failed: {e}")))??;

        Ok(Self {
            model: Arc::new(model),
            cancel_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    async fn generate(&self, sentence: &str) -> Result<Vec<f32>> {
        let model = Arc::clone(&self.model);
        let sentence = sentence.to_string();
        tokio::task::spawn_blocking(move || model.generate_audio(&sentence))
            .await
            .map_err(|e| Error::Tts(format!("Generation task failed: {e}")))?
    }

    /// Play samples on the default output. Returns true if cancelled during playback.
    async fn play_audio(&self, samples: Vec<f32>) -> Result<bool> {
        let cancel_flag = Arc::clone(&self.cancel_flag);
        tokio::task::spawn_blocking(move || {
            let mut stream = OutputStreamBuilder::open_default_stream()
                .map_err(|e| Error::Tts(format!("Failed to open audio output: {e}")))?;
            stream.log_on_drop(false);
            let sink = Sink::connect_new(stream.mixer());
            sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples));

            while !sink.empty() {
                if cancel_flag.load(Ordering::Relaxed) {
                    sink.stop();
                    return Ok(true);
                }
                std::thread::sleep(CANCEL_POLL);
            }
            Ok(false)
        })
        .await
        .map_err(|e| Error::Tts(format!("Playback task failed: {e}")))?
    }
}

#[async_trait]
impl SpeechEngine for KokoroEngine {
    fn name(&self) -> &str {
        "kokoro"
    }

    async fn say(&self, text: &str) -> Result<()> {
        self.cancel_flag.store(false, Ordering::Relaxed);

        let sentences = split_sentences(text.trim());
        let total = sentences.len();

        for (i, sentence) in sentences.iter().enumerate() {
            if self.cancelled() {
                info!("Cancelled before sentence {}/{total}", i + 1);
                break;
            }

            let t_gen = Instant::now();
            let samples = self.generate(sentence).await?;
            let gen_ms = t_gen.elapsed().as_secs_f64() * 1000.0;

            if self.cancelled() {
                info!("Cancelled after generating sentence {}/{total}", i + 1);
                break;
            }
            if samples.is_empty() {
                continue;
            }

            let t_play = Instant::now();
            if self.play_audio(samples).await? {
                info!("Cancelled during playback of sentence {}/{total}", i + 1);
                break;
            }
            debug!(
                "Sentence {}/{total}: gen={gen_ms:.0}ms play={:.1}s",
                i + 1,
                t_play.elapsed().as_secs_f64()
            );
        }

        Ok(())
    }

    fn stop(&self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        info!("TTS cancelled");
    }
}

impl KokoroModel {
    fn load(config: &TtsConfig) -> Result<Self> {
        let t0 = Instant::now();
        let base_dir = if config.model_dir.is_empty() {
            std::env::current_dir()?
        } else {
            PathBuf::from(&config.model_dir)
        };

        let tokenizer_path = base_dir.join(TOKENIZER_FILE);
        info!("Loading tokenizer from {}", tokenizer_path.display());
        let vocab = load_tokenizer(&tokenizer_path)?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        let voices_path = base_dir.join(VOICES_FILE);
        info!("Loading voice '{}' from {}", config.voice, voices_path.display());
        let styles = load_voice(&voices_path, &config.voice)?;

        let model_path = base_dir.join(MODEL_FILE);
        info!("Loading ONNX model from {}", model_path.display());
        let session = Session::builder()
            .map_err(|e| Error::Tts(format!("Failed to create ONNX session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::Tts(format!("Failed to set optimization level: {e}")))?
            .with_intra_threads(4)
            .map_err(|e| Error::Tts(format!("Failed to set thread count: {e}")))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::Config(format!("Failed to load ONNX model {}: {e}", model_path.display())))?;

        info!("Initializing misaki-rs phonemizer...");
        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!("Kokoro TTS loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            session: Mutex::new(session),
            phonemizer,
            vocab,
            styles,
            speed: config.speed,
        })
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> Result<Vec<f32>> {
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| Error::Tts(format!("Phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        let token_ids = tokenize(&phonemes, &self.vocab);
        let n_tokens = token_ids.len();

        let style_idx = n_tokens.saturating_sub(2).min(self.styles.nrows() - 1);
        let style_vec: Vec<f32> = self.styles.row(style_idx).to_vec();

        let tokens_array = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| Error::Tts(format!("Failed to create tokens tensor: {e}")))?;
        let tokens_tensor = Tensor::from_array(tokens_array)
            .map_err(|e| Error::Tts(format!("Failed to create tokens ort tensor: {e}")))?;

        let style_array = Array2::from_shape_vec((1, STYLE_DIM), style_vec)
            .map_err(|e| Error::Tts(format!("Failed to create style tensor: {e}")))?;
        let style_tensor = Tensor::from_array(style_array)
            .map_err(|e| Error::Tts(format!("Failed to create style ort tensor: {e}")))?;

        let speed_tensor = Tensor::from_array(Array1::from_vec(vec![self.speed]))
            .map_err(|e| Error::Tts(format!("Failed to build speed tensor: {e}")))?;

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(ort::inputs![
                "tokens" => tokens_tensor,
                "style" => style_tensor,
                "speed" => speed_tensor
            ])
            .map_err(|e| Error::Tts(format!("ONNX inference failed: {e}")))?;

        let (_name, first_output) = outputs
            .iter()
            .next()
            .ok_or_else(|| Error::Tts("No output tensor from model".into()))?;

        // ort 2.0: try_extract_tensor returns (&Shape, &[T])
        let (_shape, audio) = first_output
            .try_extract_tensor::<f32>()
            .map_err(|e| Error::Tts(format!("Failed to extract audio tensor: {e}")))?;

        let samples = audio.to_vec();
        debug!(
            "Generated {} samples ({:.1}s)",
            samples.len(),
            samples.len() as f32 / SAMPLE_RATE as f32
        );
        Ok(samples)
    }
}

/// Map phonemes to token IDs with start and end padding, capped at [`MAX_TOKENS`].
/// Characters missing from the vocabulary are skipped.
fn tokenize(phonemes: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = Vec::with_capacity(phonemes.len() + 2);
    ids.push(0);
    ids.extend(phonemes.chars().filter_map(|ch| vocab.get(&ch).copied()));
    ids.push(0);
    ids.truncate(MAX_TOKENS);
    ids
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>> {
    let contents = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read tokenizer {}: {e}", path.display())))?;
    parse_vocab(&contents)
}

fn parse_vocab(contents: &str) -> Result<HashMap<char, i64>> {
    let data: serde_json::Value = serde_json::from_str(contents)
        .map_err(|e| Error::Config(format!("Failed to parse tokenizer JSON: {e}")))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| Error::Config("Missing model.vocab in tokenizer.json".into()))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| Error::Config(format!("Token ID for {token:?} is not an integer")))?;
        // Each token is a single character
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }
    Ok(map)
}

/// Load one voice's style vectors from the NPZ voices file.
fn load_voice(path: &Path, voice: &str) -> Result<Array2<f32>> {
    let load_err = |e: String| Error::Config(format!("Failed to load voice '{voice}': {e}"));

    let file = fs::File::open(path).map_err(|e| load_err(e.to_string()))?;
    let mut npz = NpzReader::new(file).map_err(|e| load_err(e.to_string()))?;
    let arr: Array3<f32> = npz
        .by_name(&format!("{voice}.npy"))
        .map_err(|e| load_err(e.to_string()))?;

    // Shape is (510, 1, 256). Squeeze the middle dimension.
    let (rows, dim) = (arr.shape()[0], arr.shape()[2]);
    if rows == 0 || dim != STYLE_DIM {
        return Err(load_err(format!("unexpected shape {:?}", arr.shape())));
    }
    arr.into_shape_with_order((rows, dim))
        .map_err(|e| load_err(e.to_string()))
}

/// Split text into sentences at .!? followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') && bytes.get(i + 1).is_some_and(u8::is_ascii_whitespace) {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i + 1;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        sentences.push(rest);
    }
    sentences
}
