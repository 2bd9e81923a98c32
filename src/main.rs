use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{error, info};
use murmur::{
    list_input_devices, load_or_create_settings, SessionEvent, StreamingSession,
    TextServiceClient, TranscriptionClient,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "murmur", about = "murmur - streaming speech to text")]
struct Cli {
    /// Path to the settings file (created with defaults if missing)
    #[arg(long, default_value = murmur::settings::DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Capture device name (overrides the settings file)
    #[arg(long)]
    microphone: Option<String>,

    /// Transcription language code, or "auto" (overrides the settings file)
    #[arg(long)]
    language: Option<String>,

    /// API key for the transcription provider (overrides the settings file)
    #[arg(long)]
    api_key: Option<String>,

    /// Print a summary of the transcript after recording ends
    #[arg(long)]
    summarize: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available audio input devices
    Devices,
    /// List models offered by the configured provider
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let mut cli = Cli::parse();

    match cli.command.take() {
        Some(Command::Devices) => list_devices(),
        Some(Command::Models) => list_models(&cli).await,
        None => run_live(cli).await,
    }
}

fn list_devices() -> Result<()> {
    for device in list_input_devices()? {
        if device.is_default {
            println!("{} (default)", device.name);
        } else {
            println!("{}", device.name);
        }
    }
    Ok(())
}

async fn list_models(cli: &Cli) -> Result<()> {
    let mut settings = load_or_create_settings(&cli.settings)?;
    if let Some(api_key) = &cli.api_key {
        settings.api_key = Some(api_key.clone());
    }

    let client = TextServiceClient::new(&settings.text_service_base_url, settings.api_key)?;
    for model in client.fetch_models().await? {
        println!("{}", model);
    }
    Ok(())
}

async fn run_live(cli: Cli) -> Result<()> {
    let mut settings = load_or_create_settings(&cli.settings)?;
    if let Some(microphone) = cli.microphone {
        settings.selected_microphone = Some(microphone);
    }
    if let Some(language) = cli.language {
        settings.language = language;
    }
    if let Some(api_key) = cli.api_key {
        settings.api_key = Some(api_key);
    }
    settings.normalize();

    let transcriber = Arc::new(TranscriptionClient::new(
        &settings.transcription_base_url,
        settings.api_key.clone(),
    )?);
    let text_service = Arc::new(TextServiceClient::new(
        &settings.text_service_base_url,
        settings.api_key.clone(),
    )?);

    let (mut session, mut events) =
        StreamingSession::new(settings.clone(), transcriber, text_service.clone());
    session.start_recording()?;
    info!("Recording; press Ctrl-C to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                session.stop_recording();
                break;
            }
            event = events.recv() => match event {
                Some(event) => print_event(&event),
                None => break,
            }
        }
    }

    // keep printing until the stop cycle finishes draining
    while let Some(event) = events.recv().await {
        let stopped = matches!(event, SessionEvent::RecordingStopped { .. });
        print_event(&event);
        if stopped {
            break;
        }
    }

    let transcript = session.shutdown().await?;

    if cli.summarize && !transcript.trim().is_empty() {
        let language = if settings.language == "auto" {
            None
        } else {
            Some(settings.language.as_str())
        };
        match text_service
            .summarize(
                &transcript,
                language,
                settings.summary_instructions.as_deref(),
            )
            .await
        {
            Ok(summary) => println!("\n{}", summary),
            Err(e) => error!("Summarization failed: {}", e),
        }
    }

    Ok(())
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::TranscriptUpdated { text } => println!("> {}", text),
        SessionEvent::TranslationUpdated { text } => println!("~ {}", text),
        SessionEvent::SilenceStateChanged { is_silent } => {
            info!("{}", if *is_silent { "silence" } else { "speech" });
        }
        SessionEvent::SpeakerSegments { segments } => {
            for segment in segments {
                println!("[{}] {}", segment.speaker, segment.text);
            }
        }
        SessionEvent::TransientError { message } => error!("{}", message),
        SessionEvent::RecordingStopped { final_text } => {
            println!("\n--- final transcript ---\n{}", final_text);
        }
        SessionEvent::Started | SessionEvent::RecordingStarted => {}
    }
}
