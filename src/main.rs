use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use loqa_voice::audio::{
    calibrate, list_devices, AudioCaptureService, AudioFile, CpalMicrophone, CpalSpeaker,
    ScriptedMicrophone, TimedSpeaker,
};
use loqa_voice::config::RecognizerKind;
use loqa_voice::providers::nats::{NatsClient, NatsRecognizer};
use loqa_voice::providers::openai::{OpenAiChat, OpenAiClient, OpenAiSpeech, OpenAiTranscriber};
use loqa_voice::providers::scripted::{
    ScriptedLanguageModel, ScriptedRecognizer, ScriptedSynthesizer,
};
use loqa_voice::{
    create_router, AppState, AudioInput, AudioOutput, Config, Providers, TurnOrchestrator,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-voice")]
#[command(about = "Hands-free voice conversation engine")]
struct Cli {
    /// Config file (extension optional; missing file means defaults)
    #[arg(short, long, default_value = "config/loqa-voice")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a conversation (default)
    Run(RunArgs),
    /// Measure ambient noise and suggest energy thresholds
    Calibrate {
        /// Seconds of ambient audio to sample
        #[arg(short, long, default_value = "5")]
        seconds: f64,
    },
    /// List audio devices
    Devices,
}

#[derive(Args, Default)]
struct RunArgs {
    /// RMS energy that wakes the engine
    #[arg(long)]
    wake_threshold: Option<u32>,

    /// RMS energy below which audio counts as silence
    #[arg(long)]
    silence_threshold: Option<u32>,

    /// Seconds of silence that end an utterance
    #[arg(long)]
    silence_duration: Option<f64>,

    /// Seconds after speaking before listening again
    #[arg(long)]
    cooldown: Option<f64>,

    /// Turns of dialogue kept for the language model
    #[arg(long)]
    max_turns: Option<usize>,

    /// Do not save the session transcript
    #[arg(long)]
    no_save: bool,

    /// Replay an audio file instead of using the microphone
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Use echoing in-memory providers and a silent speaker
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config))?;

    info!("Loqa Voice v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => {
            apply_overrides(&mut cfg, &args)?;
            run(cfg, args).await
        }
        Command::Calibrate { seconds } => run_calibration(&cfg, &cli.config, seconds).await,
        Command::Devices => print_devices(),
    }
}

fn apply_overrides(cfg: &mut Config, args: &RunArgs) -> Result<()> {
    let engine = &mut cfg.engine;
    if let Some(v) = args.wake_threshold {
        engine.wake_threshold = v;
    }
    if let Some(v) = args.silence_threshold {
        engine.silence_threshold = v;
    }
    if let Some(v) = args.silence_duration {
        engine.silence_duration = v;
    }
    if let Some(v) = args.cooldown {
        engine.post_speech_cooldown = v;
    }
    if let Some(v) = args.max_turns {
        engine.max_history_turns = v;
    }
    if args.no_save {
        cfg.session.save_transcripts = false;
    }
    engine.validate().context("Invalid command-line overrides")
}

async fn run(cfg: Config, args: RunArgs) -> Result<()> {
    let session_id = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();

    // Devices first: without them there is no session.
    let input: Box<dyn AudioInput> = match &args.input_file {
        Some(path) => {
            let file = AudioFile::open(path)?;
            Box::new(ScriptedMicrophone::from_clip(&file.clip))
        }
        None => Box::new(CpalMicrophone::open(&cfg.device).context("Failed to open microphone")?),
    };
    let output: Box<dyn AudioOutput> = if args.dry_run {
        Box::new(TimedSpeaker::new())
    } else {
        Box::new(CpalSpeaker::open(&cfg.device).context("Failed to open speaker")?)
    };

    let providers = if args.dry_run {
        info!("Dry run: using in-memory providers");
        Providers {
            recognizer: Arc::new(ScriptedRecognizer::new().with_fallback("hello")),
            synthesizer: Arc::new(ScriptedSynthesizer::new()),
            model: Arc::new(ScriptedLanguageModel::new()),
        }
    } else {
        build_providers(&cfg, &session_id).await?
    };

    let (engine, handle) =
        TurnOrchestrator::new(cfg.engine.clone(), cfg.session.clone(), input, output, providers)?;
    let engine = engine.with_session_id(session_id);

    let server = if cfg.service.http.enabled {
        let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind control API on {}", addr))?;
        info!("Control API listening on http://{}", addr);
        let router = create_router(AppState::new(handle.clone()));
        Some(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!("Control API stopped: {}", e);
            }
        }))
    } else {
        None
    };

    let signals = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing the current turn (press again to quit now)");
            signals.stop();
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Second Ctrl-C, exiting immediately");
            std::process::exit(130);
        }
    });

    let report = engine.run().await?;

    if let Some(server) = server {
        server.abort();
    }

    if let Some(path) = &report.transcript_path {
        println!("Transcript saved: {}", path.display());
    }
    println!("{}", report.stats.summary());
    Ok(())
}

async fn build_providers(cfg: &Config, session_id: &str) -> Result<Providers> {
    let openai = OpenAiClient::new(&cfg.providers).context("Failed to configure OpenAI client")?;

    let recognizer: Arc<dyn loqa_voice::SpeechRecognizer> = match cfg.providers.recognizer {
        RecognizerKind::Openai => {
            Arc::new(OpenAiTranscriber::new(openai.clone(), &cfg.providers.openai))
        }
        RecognizerKind::Nats => {
            let client = NatsClient::connect(&cfg.providers.nats.url, session_id.to_string())
                .await
                .context("Failed to connect to NATS")?;
            let timeout = Duration::try_from_secs_f64(cfg.providers.nats.transcript_timeout)
                .context("Invalid nats.transcript_timeout")?;
            Arc::new(NatsRecognizer::new(client, timeout))
        }
    };

    Ok(Providers {
        recognizer,
        synthesizer: Arc::new(OpenAiSpeech::new(openai.clone(), &cfg.providers.openai)),
        model: Arc::new(OpenAiChat::new(
            openai,
            &cfg.providers.openai,
            cfg.session.system_prompt.clone(),
        )),
    })
}

async fn run_calibration(cfg: &Config, config_path: &str, seconds: f64) -> Result<()> {
    let mic = CpalMicrophone::open(&cfg.device).context("Failed to open microphone")?;
    let capture = AudioCaptureService::new(Box::new(mic), cfg.engine.frame(), cfg.engine.rms_window());
    let window = cfg.engine.rms_window();
    let duration = Duration::from_secs_f64(seconds.max(0.5));

    let calibration = tokio::task::spawn_blocking(move || calibrate(&capture, window, duration))
        .await
        .context("Calibration task panicked")??;

    println!(
        "Ambient noise: mean {} / p90 {} / peak {}",
        calibration.ambient_mean, calibration.ambient_p90, calibration.ambient_peak
    );
    println!("Suggested thresholds (add to {}.toml):\n", config_path);
    println!("{}", calibration.to_toml());
    Ok(())
}

fn print_devices() -> Result<()> {
    let devices = list_devices().context("Failed to enumerate audio devices")?;
    let mark = |name: &str, default: &Option<String>| {
        if default.as_deref() == Some(name) {
            " (default)"
        } else {
            ""
        }
    };

    println!("Input devices:");
    for name in &devices.inputs {
        println!("  {}{}", name, mark(name, &devices.default_input));
    }
    println!("Output devices:");
    for name in &devices.outputs {
        println!("  {}{}", name, mark(name, &devices.default_output));
    }
    Ok(())
}
