use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mantra::{
    telemetry, MantraService, SessionEvent, StartOptions, TrackDescriptor, VoiceOptions,
};
use mantraconf::MantraConfig;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Infinite-audio session orchestrator
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file to use instead of ./mantra.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective configuration and where it came from
    Config,

    /// Run one session, driving playback faster than real time
    Demo {
        /// Declared track length in seconds
        #[arg(long, default_value = "300")]
        track_seconds: f64,

        /// Playback seconds per wall-clock second
        #[arg(long, default_value = "20")]
        speed: f64,

        /// Track type used in the music prompt
        #[arg(long, default_value = "meditation")]
        track_type: String,

        /// Mood tag (repeatable)
        #[arg(long = "mood")]
        moods: Vec<String>,

        /// Affirmation text (repeatable)
        #[arg(long = "affirmation")]
        affirmations: Vec<String>,

        /// Seconds between affirmations
        #[arg(long)]
        interval: Option<f64>,
    },

    /// Run the orchestrator and retention sweeper until interrupted
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = MantraConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    if let Command::Config = cli.command {
        for file in &sources.files {
            println!("# loaded: {}", file.display());
        }
        for var in &sources.env_overrides {
            println!("# env: {}", var);
        }
        print!("{}", config.to_toml());
        return Ok(());
    }

    telemetry::init(&config.infra.telemetry).context("Failed to initialize telemetry")?;

    std::fs::create_dir_all(&config.infra.paths.state_dir)
        .context("Failed to create state directory")?;
    tracing::info!(
        state_dir = %config.infra.paths.state_dir.display(),
        backend = %config.bootstrap.generation.backend,
        "Starting mantra"
    );

    let service = MantraService::from_config(&config)?;
    let shutdown_token = CancellationToken::new();

    let events = tokio::spawn(log_events(service.subscribe(), shutdown_token.clone()));
    let sweeper = service.sweeper().spawn(shutdown_token.clone());

    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_token.cancel();
    });

    match cli.command {
        Command::Demo {
            track_seconds,
            speed,
            track_type,
            moods,
            affirmations,
            interval,
        } => {
            let track = TrackDescriptor {
                id: "demo-track".to_string(),
                track_type,
                mood_tags: moods,
                duration_secs: track_seconds,
                affirmations: if affirmations.is_empty() {
                    default_affirmations()
                } else {
                    affirmations
                },
                voice: VoiceOptions::default(),
            };
            let options = StartOptions {
                affirmation_interval: interval,
                ..Default::default()
            };
            run_demo(&service, track, options, speed, shutdown_token.clone()).await?;
        }
        Command::Serve => {
            tracing::info!("Orchestrator ready, waiting for shutdown signal");
            shutdown_token.cancelled().await;
        }
        Command::Config => {}
    }

    shutdown_token.cancel();
    let report = service.shutdown().await;
    tracing::info!(
        released = report.released,
        failures = report.failures.len(),
        "Shutdown complete"
    );

    let _ = sweeper.await;
    let _ = events.await;

    telemetry::shutdown()?;
    Ok(())
}

async fn run_demo(
    service: &MantraService,
    track: TrackDescriptor,
    options: StartOptions,
    speed: f64,
    shutdown: CancellationToken,
) -> Result<()> {
    let started = service.start_session("demo", track, options)?;
    tracing::info!(
        session.id = %started.id,
        total_duration = started.total_duration,
        affirmation_interval = started.affirmation_interval,
        "Demo session started"
    );

    let tick = Duration::from_millis(250);
    let step = speed.max(0.0) * tick.as_secs_f64();
    let mut ticker = tokio::time::interval(tick);
    let mut position = 0.0;

    while position < started.total_duration {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Demo interrupted");
                break;
            }
            _ = ticker.tick() => {
                position += step;
                let update = service.update_position(&started.id, position).await?;
                tracing::debug!(
                    position = update.position,
                    segment.index = update.current_segment_index,
                    "Position update"
                );
            }
        }
    }

    if let Ok(snapshot) = service.get_session(&started.id).await {
        tracing::info!(
            segments = snapshot.segments.len(),
            affirmations = snapshot.affirmations.len(),
            position = snapshot.current_position,
            "Demo finished"
        );
    }
    let report = service.stop_session(&started.id).await?;
    tracing::info!(
        released = report.released,
        already_missing = report.already_missing,
        failures = report.failures.len(),
        "Demo session cleaned up"
    );
    Ok(())
}

async fn log_events(mut rx: broadcast::Receiver<SessionEvent>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = rx.recv() => match received {
                Ok(SessionEvent::GenerationError { session_id, cause }) => {
                    tracing::warn!(session.id = %session_id, cause = %cause, "Generation error");
                }
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = %json, "Session event"),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}

// Handle both SIGINT (Ctrl+C) and SIGTERM (systemd, container runtimes)
async fn wait_for_signal() {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};
                let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        }
    }
}

fn default_affirmations() -> Vec<String> {
    [
        "I am calm and present",
        "Each breath settles me deeper",
        "I let go of what I cannot control",
        "I am safe right here",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
