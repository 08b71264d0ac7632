use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::fmt::time::ChronoLocal;
use voicelink_core::config::{LinkOptions, SessionConfig};
use voicelink_core::credentials::StaticCredentials;
use voicelink_core::resilience::RetryPolicy;
use voicelink_core::{SessionDeps, SessionEvent, VoiceSession};
use voicelink_service::backend::{CpalBackend, describe_devices};
use voicelink_service::config::{Config, DEFAULT_INSTRUCTIONS};
use voicelink_service::live_adapter::LiveConnector;
use voicelink_service::tools::DemoTools;
use voicelink_types::{AmbientMode, MicProfile, Source};

#[derive(Parser)]
#[command(version, about = "Talk to a live voice agent from the terminal")]
struct Cli {
    /// Persona the agent speaks as. Overrides PERSONA.
    persona: Option<String>,
    /// Prebuilt voice name. Overrides VOICE.
    #[arg(long)]
    voice: Option<String>,
    /// System instructions for the agent.
    #[arg(long)]
    instructions: Option<String>,
    /// Microphone profile: standard, isolation or hifi. Overrides MIC_PROFILE.
    #[arg(long)]
    mic_profile: Option<MicProfile>,
    /// Background sound: off, drone or rain. Overrides AMBIENT.
    #[arg(long)]
    ambient: Option<AmbientMode>,
    /// Input device name; the host default when omitted.
    #[arg(long)]
    input_device: Option<String>,
    /// Output device name; the host default when omitted.
    #[arg(long)]
    output_device: Option<String>,
    /// Print the available audio devices and exit.
    #[arg(long)]
    list_devices: bool,
}

/// Settings that can change between connections of one run.
struct Persona {
    name: String,
    voice: Option<String>,
    instructions: String,
    model: Option<String>,
}

impl Persona {
    fn session_config(&self) -> SessionConfig {
        let mut builder = SessionConfig::builder(&self.name)
            .with_instructions(&self.instructions)
            .with_tools(DemoTools::declarations());
        if let Some(voice) = &self.voice {
            builder = builder.with_voice(voice);
        }
        if let Some(model) = &self.model {
            builder = builder.with_model(model);
        }
        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Parse Command-Line Arguments ---
    let args = Cli::parse();
    if args.list_devices {
        println!("{}", describe_devices()?);
        return Ok(());
    }

    // --- 2. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 3. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting voice link...");

    // --- 4. Build the Session ---
    let mut persona = Persona {
        name: args.persona.unwrap_or_else(|| config.persona.clone()),
        voice: args.voice.or_else(|| config.voice.clone()),
        instructions: args
            .instructions
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        model: config.model.clone(),
    };

    let options = LinkOptions {
        retry: RetryPolicy {
            max_retries: config.max_retries,
            ..RetryPolicy::default()
        },
        reconnect_on_drop: config.reconnect_on_drop,
        mic_profile: args.mic_profile.unwrap_or(config.mic_profile),
        ..LinkOptions::default()
    };

    let deps = SessionDeps {
        backend: Arc::new(CpalBackend::new(args.input_device, args.output_device)),
        connector: Arc::new(LiveConnector::new(config.base_url.clone())),
        credentials: Arc::new(StaticCredentials::new(config.api_key)),
        tools: Arc::new(DemoTools),
    };
    let session = VoiceSession::new(deps, options).context("Audio backend is not usable")?;

    tokio::spawn(print_events(session.subscribe()));
    session
        .ambient()
        .set_mode(args.ambient.unwrap_or(config.ambient));

    spawn_connect(&session, persona.session_config());

    // --- 5. Command Loop ---
    println!("Type to send text. Commands: /voice NAME, /mic PROFILE, /ambient MODE, /stats, /level, /reconnect, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl-C received, shutting down.");
                break;
            }
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => line,
                None => break,
            },
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, argument) = line.split_once(' ').unwrap_or((line, ""));
        match command {
            "/quit" | "/exit" => break,
            "/voice" => {
                persona.voice = Some(argument.trim().to_string());
                let session = session.clone();
                let config = persona.session_config();
                tokio::spawn(async move {
                    if let Err(e) = session.reconnect_with(config).await {
                        tracing::error!("reconnect failed: {}", e);
                    }
                });
            }
            "/reconnect" => spawn_connect(&session, persona.session_config()),
            "/mic" => match argument.trim().parse::<MicProfile>() {
                Ok(profile) => {
                    if let Err(e) = session.set_mic_profile(profile).await {
                        tracing::error!("could not switch microphone profile: {}", e);
                    }
                }
                Err(e) => println!("{e}"),
            },
            "/ambient" => match argument.trim().parse::<AmbientMode>() {
                Ok(mode) => session.ambient().set_mode(mode),
                Err(e) => println!("{e}"),
            },
            "/stats" => println!("{}", serde_json::to_string_pretty(&session.stats())?),
            "/level" => {
                let spectrum = match session.analyser().lock() {
                    Ok(mut analyser) => analyser.byte_frequency_data(),
                    Err(_) => Vec::new(),
                };
                let peak = spectrum.iter().copied().max().unwrap_or(0);
                println!("output level: {}", "#".repeat(peak as usize / 8));
            }
            _ => {
                if let Err(e) = session.send_text(line).await {
                    println!("not sent: {e}");
                }
            }
        }
    }

    session.shutdown().await;
    tracing::info!("Voice link stopped.");
    Ok(())
}

fn spawn_connect(session: &VoiceSession, config: SessionConfig) {
    let session = session.clone();
    tokio::spawn(async move {
        if let Err(e) = session.connect(config).await {
            tracing::error!("connection failed: {}", e);
        }
    });
}

async fn print_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::StatusChanged { state, detail }) => match detail {
                Some(detail) => println!("[{state}] {detail}"),
                None => println!("[{state}]"),
            },
            Ok(SessionEvent::Transcript(t)) if t.is_final => {
                let who = match t.source {
                    Source::User => "you",
                    Source::Model => "agent",
                };
                println!("{who}: {}", t.text);
            }
            Ok(SessionEvent::ToolCallFinished { name, ok, .. }) => {
                tracing::info!(tool = %name, ok, "tool call finished");
            }
            Ok(SessionEvent::Interrupted) => tracing::debug!("agent interrupted"),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("event printer lagged by {} events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
