//! Poppy - Gapless Command Line Audio Player
//!
//! Opens the given files into one playlist, starts the output stream and
//! reads transport commands from standard input until the playlist is
//! exhausted or the user quits.

use std::{io::stderr, path::PathBuf, process::ExitCode, sync::atomic::Ordering};

use {
    anyhow::Result as AnyhowResult,
    clap::Parser,
    tokio::{
        io::{AsyncBufReadExt, BufReader, stdin},
        select,
        sync::broadcast::error::RecvError,
    },
    tracing::{info, warn},
    tracing_subscriber::EnvFilter,
};

use poppy::{
    audio::{
        engine::EngineGain,
        output::{AudioOutput, OutputConfig, PlaybackProducer, ring_buffer},
        playlist::{PlayMode, Playlist},
        track::GainReference,
    },
    config::{PlayerSettings, SettingsManager},
    error::{ErrorReporter, PlayerError, ResultExt},
    state::{
        Command, ControlQueue, NowPlaying, Player, PlayerEvent, SharedPlayer, Transport,
        parse_command,
    },
};

/// Gapless Opus, Vorbis and FLAC player.
#[derive(Parser, Debug)]
#[command(name = "poppy", version)]
struct Args {
    /// Play mode: sequential, repeat, repeat-one or single
    #[arg(short, long)]
    mode: Option<PlayMode>,

    /// Engine gain in dB
    #[arg(short, long, allow_negative_numbers = true)]
    gain: Option<f32>,

    /// Loudness correction: header, album, track or absolute
    #[arg(short, long)]
    reference: Option<GainReference>,

    /// Output device name
    #[arg(short, long)]
    device: Option<String>,

    /// Output buffer length in milliseconds
    #[arg(long)]
    buffer_ms: Option<u32>,

    /// Files to play, in order
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("poppy=info")),
        )
        .with_writer(stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            ErrorReporter::report(&e, "poppy");
            ExitCode::FAILURE
        }
    }
}

/// Stored preferences with the command line applied on top.
fn session_settings(args: &Args) -> PlayerSettings {
    let mut settings = match SettingsManager::new() {
        Ok(manager) => manager.get_settings().clone(),
        Err(e) => {
            warn!(error = %e, "Ignoring unreadable settings");
            PlayerSettings::default()
        }
    };

    if let Some(mode) = args.mode {
        settings.play_mode = mode;
    }
    if let Some(gain) = args.gain {
        settings.gain_db = gain;
    }
    if let Some(reference) = args.reference {
        settings.gain_reference = reference;
    }
    if let Some(device) = &args.device {
        settings.audio_device = Some(device.clone());
    }
    if let Some(buffer_ms) = args.buffer_ms {
        settings.buffer_ms = buffer_ms;
    }
    settings
}

fn announce(now_playing: &NowPlaying) {
    info!(
        track = now_playing.index + 1,
        id = %now_playing.track_id,
        "Now playing {}",
        now_playing.meta
    );
}

async fn run(args: Args) -> AnyhowResult<ExitCode> {
    let settings = session_settings(&args);
    settings.validate().add_context("Invalid options")?;

    let (playlist, failures) = Playlist::from_paths(&args.files, settings.play_mode);
    if playlist.is_empty() {
        return Err::<ExitCode, _>(PlayerError::NoPlayableFiles)
            .add_contextf(format!("{} file(s) could not be opened", failures.len()));
    }

    let gain = EngineGain {
        gain_db: settings.gain_db,
        reference: settings.gain_reference,
    };
    let player = SharedPlayer::new(Player::new(playlist, gain));
    let mut events = player.subscribe();
    if let Some(now_playing) = player.lock().now_playing() {
        announce(&now_playing);
    }

    let output_config = OutputConfig {
        device: settings.audio_device.clone(),
        buffer_ms: settings.buffer_ms,
    };
    let output = AudioOutput::new(output_config.clone())
        .map_err(PlayerError::from)
        .add_context("Opening audio output")?;

    let (producer, consumer) = ring_buffer(&output_config);
    let _stream = output
        .create_stream(consumer, player.output_link())
        .map_err(PlayerError::from)
        .add_context("Starting output stream")?;

    let producer = PlaybackProducer::new(player.clone(), producer);
    let running = producer.running();
    let producer_thread = producer
        .spawn()
        .map_err(PlayerError::from)
        .add_context("Starting playback thread")?;

    let controls =
        ControlQueue::spawn(Transport::new(player.clone())).add_context("Starting control queue")?;

    let mut lines = BufReader::new(stdin()).lines();
    let mut reading = true;

    let code = loop {
        select! {
            event = events.recv() => match event {
                Ok(PlayerEvent::Exhausted) => break ExitCode::SUCCESS,
                Ok(PlayerEvent::Fatal(reason)) => {
                    warn!(%reason, "Playback stopped");
                    break ExitCode::FAILURE;
                }
                Ok(PlayerEvent::MetadataChanged(Some(now_playing))) => announce(&now_playing),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed player events"),
                Err(RecvError::Closed) => break ExitCode::FAILURE,
            },
            line = lines.next_line(), if reading => match line {
                Ok(Some(line)) => match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break ExitCode::SUCCESS,
                    Ok(Some(Command::Control(request))) => {
                        if let Err(e) = controls.submit(request) {
                            warn!(error = %e, "Dropping command");
                        }
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Ignoring command"),
                },
                Ok(None) => reading = false,
                Err(e) => {
                    warn!(error = %e, "Stopped reading commands");
                    reading = false;
                }
            },
        }
    };

    running.store(false, Ordering::Release);
    controls.shutdown();
    if producer_thread.join().is_err() {
        warn!("Playback thread panicked");
    }
    info!("Goodbye");
    Ok(code)
}
