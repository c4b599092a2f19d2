//! thor-pi: voice client for the Thor workout agent on a Raspberry Pi.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use thor_pi::client::{AgentClient, ChatBackend, MetaRunnerClient};
use thor_pi::config::{BackendKind, Config, RoutingMode, RunMode, SttMode, TtsEngineKind};
use thor_pi::pipeline::{PipelineSettings, VoicePipeline};
use thor_pi::recorder::AudioRecorder;
use thor_pi::stt::SpeechRecognizer;
use thor_pi::tts::{SpeechSynthesizer, TonePlayer};
use tokio::io::BufReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "thor-pi", about = "Voice client for the Thor workout agent")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, alias = "agent-url", env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// Backend service to talk to
    #[arg(long, value_enum, env = "BACKEND")]
    backend: Option<BackendKind>,

    /// Routing mode for the meta-runner backend
    #[arg(long, value_enum, env = "ROUTING_MODE")]
    routing_mode: Option<RoutingMode>,

    /// Speech recognition: local model or remote API
    #[arg(long, value_enum, env = "STT_MODE")]
    stt_mode: Option<SttMode>,

    /// Whisper model size for local recognition (tiny, base, small, ...)
    #[arg(long, env = "WHISPER_MODEL")]
    whisper_model: Option<String>,

    /// Speech synthesis engine
    #[arg(long, value_enum, env = "TTS_ENGINE")]
    tts_engine: Option<TtsEngineKind>,

    /// Capture sample rate in Hz
    #[arg(long, env = "SAMPLE_RATE")]
    sample_rate: Option<u32>,

    /// Seconds of audio per cycle
    #[arg(long, env = "RECORD_DURATION")]
    record_duration: Option<f64>,

    /// manual: press ENTER per cycle; repeating: listen continuously
    #[arg(short, long, value_enum)]
    mode: Option<RunMode>,

    /// Seconds between cycles in repeating mode
    #[arg(long)]
    interval: Option<f64>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Layer flags and environment over the file configuration.
    fn apply_to(&self, config: &mut Config) {
        if let Some(url) = &self.backend_url {
            config.backend.url.clone_from(url);
        }
        if let Some(kind) = self.backend {
            config.backend.kind = kind;
        }
        if let Some(mode) = self.routing_mode {
            config.backend.routing_mode = mode;
        }
        if let Some(mode) = self.stt_mode {
            config.stt.mode = mode;
        }
        if let Some(model) = &self.whisper_model {
            config.stt.model.clone_from(model);
        }
        if let Some(engine) = self.tts_engine {
            config.tts.engine = engine;
        }
        if let Some(rate) = self.sample_rate {
            config.audio.sample_rate = rate;
        }
        if let Some(seconds) = self.record_duration {
            config.audio.record_duration = seconds;
        }
        if let Some(mode) = self.mode {
            config.pipeline.mode = mode;
        }
        if let Some(seconds) = self.interval {
            config.pipeline.interval = seconds;
        }
        if config.stt.api_key.is_none() {
            config.stt.api_key = std::env::var("OPENAI_API_KEY").ok();
        }
    }
}

fn build_backend(config: &Config) -> reqwest::Result<Box<dyn ChatBackend>> {
    Ok(match config.backend.kind {
        BackendKind::Agent => Box::new(AgentClient::from_config(&config.backend)?),
        BackendKind::MetaRunner => Box::new(MetaRunnerClient::from_config(&config.backend)?),
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize logging (suppress noisy ort/whisper internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=warn,whisper_rs=warn")
    } else {
        EnvFilter::new("info,ort=warn,whisper_rs=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("thor-pi starting");

    let mut config = Config::load(args.config.as_deref());
    args.apply_to(&mut config);
    config.validate()?;

    let backend = build_backend(&config)?;
    let recognizer = SpeechRecognizer::from_config(&config.stt).await?;
    let synthesizer = SpeechSynthesizer::from_config(&config.tts).await?;
    let recorder = AudioRecorder::new(config.audio.clone());

    println!("{}", "=".repeat(50));
    println!("Thor Pi voice client");
    println!("{}", "=".repeat(50));
    let stt_name = recognizer.engine_name().to_string();
    let tts_name = synthesizer.engine_name().to_string();
    let mut pipeline = VoicePipeline::new(
        Box::new(recorder),
        recognizer,
        backend,
        synthesizer,
        Arc::new(TonePlayer),
        PipelineSettings::from_config(&config),
    );

    println!("{}", "=".repeat(50));
    println!("Thor Pi voice client");
    println!("{}", "=".repeat(50));
    println!("Backend:  {} ({})", pipeline.backend_name(), config.backend.url);
    if config.backend.kind == BackendKind::MetaRunner {
        println!("Routing:  {}", config.backend.routing_mode);
    }
    println!("STT:      {stt_name}");
    println!("TTS:      {tts_name}");
    println!(
        "Audio:    {} Hz, {:.1}s per cycle",
        config.audio.sample_rate, config.audio.record_duration
    );
    println!("{}", "=".repeat(50));

    let result = match config.pipeline.mode {
        RunMode::Manual => {
            println!("Press ENTER to speak, Ctrl+C to quit.");
            let stdin = BufReader::new(tokio::io::stdin());
            pipeline.run_manual(stdin, shutdown_signal()).await
        }
        RunMode::Repeating => {
            println!("Listening continuously, Ctrl+C to quit.");
            pipeline
                .run_repeating(config.pipeline.interval(), shutdown_signal())
                .await
        }
    };

    match result {
        Ok(cycles) => {
            info!("Goodbye after {cycles} cycle(s)");
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}
