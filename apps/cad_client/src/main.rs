use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use cad_log::LogConfig;
use cad_runtime::terminal_input::{self, TerminalReaderHandle};
use cad_runtime::{BouncingDemo, Rasterizer, RunExit, Session, SessionConfig, TransportPreference, engine_factory_for};
use cad_schema::Validatable;
use clap::Parser;
use tokio::sync::Notify;
use tracing::{error, info, warn};

mod config;
mod raster;

use config::{ConfigOverrides, load_session_config};
use raster::{HeadlessRasterizer, SharedGrid, TerminalRasterizer};

const VERSION: &str = "0.1.0-alpha";

/// Grid size used when there is no terminal to measure
const HEADLESS_SIZE: (u16, u16) = (80, 24);

/// Cadence Client - Run a frame script in the terminal
#[derive(Parser, Debug)]
#[command(name = "cad_client")]
#[command(version = VERSION)]
#[command(about = "Cadence script runner", long_about = None)]
struct Args {
    /// Script to run (e.g. game.js). Runs the built-in demo when omitted
    #[arg(short, long, env = "CAD_SCRIPT")]
    script: Option<PathBuf>,

    /// Session config file (JSON)
    #[arg(short, long, env = "CAD_CONFIG")]
    config: Option<PathBuf>,

    /// Target frames per second, overrides the config file
    #[arg(long, env = "CAD_FPS")]
    fps: Option<u32>,

    /// Channel transport: auto, shared or message
    #[arg(short, long, env = "CAD_TRANSPORT")]
    transport: Option<TransportPreference>,

    /// Log level, overrides the config file
    #[arg(long, env = "CAD_LOG_LEVEL")]
    log_level: Option<String>,

    /// Stop after this many frames
    #[arg(short, long)]
    frames: Option<u64>,

    /// Write logs to this file as well
    #[arg(long, env = "CAD_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Render into memory and print the last frame as text
    #[arg(long)]
    headless: bool,

    /// Print the session config JSON Schema and exit
    #[arg(long)]
    print_schema: bool,
}

/// Where frames end up
enum Output {
    Terminal,
    Headless(SharedGrid),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if args.print_schema {
        match SessionConfig::schema_json() {
            Ok(schema) => println!("{}", schema),
            Err(e) => {
                eprintln!("Cannot generate schema: {}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if let Err(e) = run(args).await {
        error!("{}", e);
        eprintln!("cad_client: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let overrides = ConfigOverrides {
        target_fps: args.fps,
        transport: args.transport,
        log_level: args.log_level.clone(),
    };
    let config = load_session_config(args.config.as_deref(), &overrides)?;

    let interactive = !args.headless && atty::is(atty::Stream::Stdout) && terminal_input::is_terminal();

    // The terminal is the canvas, so console logs would tear it
    let mut log_config: LogConfig = LogConfig::new("cad_client::")
        .with_level(cad_log::parse_level(&config.log_level).unwrap_or(tracing::Level::INFO))
        .with_console(!interactive);
    if let Some(path) = &args.log_file {
        log_config = log_config.with_log_file(std::fs::File::create(path)?);
    }
    cad_log::init_logging(log_config)?;

    info!("========================================");
    info!("   CADENCE CLIENT v{}", VERSION);
    info!("========================================");

    let (width, height) = if interactive {
        crossterm::terminal::size()?
    } else {
        HEADLESS_SIZE
    };

    let engine = match &args.script {
        Some(path) => {
            info!("Loading script {}", path.display());
            engine_factory_for(path)?
        }
        None => {
            info!("No script given, running the built-in demo");
            BouncingDemo::factory(width as f32, height as f32)
        }
    };

    let (rasterizer, output): (Box<dyn Rasterizer>, Output) = if interactive {
        (Box::new(TerminalRasterizer::new(width, height)?), Output::Terminal)
    } else {
        let (rasterizer, grid) = HeadlessRasterizer::new(width, height);
        (Box::new(rasterizer), Output::Headless(grid))
    };

    let mut session = Session::create(config, engine, rasterizer);
    session.on_fatal_error(|fatal| error!("Fatal session error: {}", fatal));

    let mode = session.start().await?;
    info!(session = session.id(), "Session running over {:?} transport ({}x{})", mode, width, height);

    let mut reader: Option<TerminalReaderHandle> = if interactive {
        Some(terminal_input::spawn_terminal_event_reader(session.input_sender())?)
    } else {
        None
    };

    let interrupt = reader.as_ref().map(|r| r.interrupt());
    let result = session.run(args.frames, shutdown_signal(interrupt)).await;

    let outcome = session.stop().await;
    let stats = session.stats();
    let last_error = session.last_frame_error().cloned();
    drop(session);
    if let Some(reader) = reader.as_mut() {
        reader.stop();
    }

    match &result {
        Ok(RunExit::Interrupted) => info!("Interrupted"),
        Ok(exit) => info!("Frame loop ended: {:?}", exit),
        Err(_) => {}
    }
    info!(
        "Stop {:?}: {} frames ({} reused, {} late, {} errors, {} commands dropped), {:.1} fps",
        outcome,
        stats.frames_rendered,
        stats.frames_reused,
        stats.late_frames,
        stats.frame_errors,
        stats.dropped_commands,
        stats.fps
    );
    if let Some(frame_error) = last_error {
        warn!("Last frame error: {}", frame_error);
    }

    if let Output::Headless(grid) = output {
        let grid = grid.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        println!("{}", grid.to_text());
    }

    result?;
    Ok(())
}

/// Resolves on Ctrl+C, whether it arrives as a raw-mode key or a signal
async fn shutdown_signal(interrupt: Option<Arc<Notify>>) {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    match interrupt {
        Some(notify) => {
            tokio::select! {
                _ = notify.notified() => {}
                _ = ctrl_c => {}
            }
        }
        None => ctrl_c.await,
    }
}
