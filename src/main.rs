use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use waav_duplex::core::audio::{AudioDevice, WavFileDevice};
use waav_duplex::core::realtime::TurnMode;
use waav_duplex::core::stt::WhisperApiTranscriber;
use waav_duplex::core::tools::ToolDispatcher;
use waav_duplex::engine::{ConversationEvent, DuplexEngine, spawn_keyboard_source};
use waav_duplex::{ClientConfig, EngineError};

/// WaaV Duplex - Full-duplex realtime voice dialogue client
#[derive(Parser, Debug)]
#[command(name = "waav-duplex")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replay a mono 16-bit WAV file as the microphone
    #[arg(short = 'i', long = "input", value_name = "WAV")]
    input: Option<PathBuf>,

    /// Record assistant audio to a WAV file (with --input)
    #[arg(short = 'r', long = "record", value_name = "WAV")]
    record: Option<PathBuf>,

    /// Stop after this many seconds of silence once the input file ends
    #[arg(long = "trailing-silence", value_name = "SECS")]
    trailing_silence: Option<f32>,

    /// Detect turns locally and transcribe each utterance
    #[arg(long = "local-vad")]
    local_vad: bool,

    /// Keep sending microphone audio while the assistant speaks
    #[arg(long = "full-duplex")]
    full_duplex: bool,

    /// Do not treat Enter on stdin as an interrupt
    #[arg(long = "no-keyboard")]
    no_keyboard: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig::from_env()?
    };
    if cli.local_vad {
        config.turn_mode = TurnMode::LocalVad;
    }
    if cli.full_duplex {
        config.full_duplex = true;
    }
    if cli.no_keyboard {
        config.keyboard_interrupt = false;
    }
    config.validate()?;

    let dispatcher =
        ToolDispatcher::with_catalogs(config.menu_path.as_deref(), config.books_path.as_deref())
            .context("Failed to load tool catalogs")?;

    let (device, recording) = open_device(&cli, &config)?;

    let mut engine = DuplexEngine::new(config.to_engine_settings(), device, dispatcher);
    if config.turn_mode == TurnMode::LocalVad {
        let transcriber = WhisperApiTranscriber::new(config.to_whisper_config()?)
            .context("Failed to create transcriber")?;
        engine = engine.with_transcriber(Arc::new(transcriber));
    }

    let shutdown = engine.shutdown_token();
    let keyboard = config
        .keyboard_interrupt
        .then(|| spawn_keyboard_source(engine.interrupt_handle(), shutdown.clone()));
    let printer = tokio::spawn(print_events(engine.subscribe()));

    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c_token.cancel();
        }
    });

    info!(
        "Starting {} conversation with {} (press Enter to interrupt)",
        config.turn_mode, config.model
    );
    let result = engine.connect_and_run(config.to_realtime_config()?).await;

    shutdown.cancel();
    if let Some(keyboard) = keyboard {
        keyboard.abort();
    }
    let _ = printer.await;
    if let Some(device) = recording {
        device.finalize().context("Failed to finalize recording")?;
    }

    match result {
        Ok(summary) => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Err(EngineError::ConnectionLost) => {
            Err(anyhow!("Connection to the realtime service was lost"))
        }
        Err(e) => Err(e.into()),
    }
}

/// Pick the audio device; the second value is kept for finalizing a recording.
fn open_device(
    cli: &Cli,
    config: &ClientConfig,
) -> anyhow::Result<(Arc<dyn AudioDevice>, Option<Arc<WavFileDevice>>)> {
    if let Some(input) = &cli.input {
        let mut device = WavFileDevice::new(config.audio, input);
        if let Some(record) = &cli.record {
            device = device.with_recording(record);
        }
        if let Some(secs) = cli.trailing_silence {
            device = device
                .with_trailing_silence(std::time::Duration::from_secs_f32(secs.max(0.0)));
        }
        let device = Arc::new(device);
        return Ok((device.clone(), Some(device)));
    }

    if cli.record.is_some() {
        warn!("--record only applies together with --input");
    }

    #[cfg(feature = "audio-device")]
    {
        let device: Arc<dyn AudioDevice> =
            Arc::new(waav_duplex::core::audio::CpalDevice::new(config.audio));
        return Ok((device, None));
    }

    #[cfg(not(feature = "audio-device"))]
    {
        return Err(anyhow!(
            "No audio input: pass --input <WAV> or build with the audio-device feature"
        ));
    }
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<ConversationEvent>) {
    loop {
        match events.recv().await {
            Ok(ConversationEvent::UserTranscript { text, .. }) => println!("you: {text}"),
            Ok(ConversationEvent::AssistantTranscript { transcript, .. }) => {
                println!("assistant: {transcript}")
            }
            Ok(ConversationEvent::AssistantText { text, .. }) => println!("assistant: {text}"),
            Ok(ConversationEvent::ToolCalled { name, output, .. }) => {
                println!("[tool {name}] {output}")
            }
            Ok(ConversationEvent::Interrupted { reason }) => println!("[interrupted: {reason}]"),
            Ok(ConversationEvent::Ended { reason }) => {
                println!("[ended: {reason}]");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(n)) => warn!("Event printer lagged by {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
