//! Headless canvas sync client.
//!
//! Connects one engine to an authority, logs every status and canvas
//! change, and turns stdin lines into intents.

mod command;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use canvas_sync_core::codec::encode_snapshot;
use canvas_sync_core::{CanvasState, ConfigError, EncodeError, EngineConfig, SyncEngine};
use clap::Parser;
use thiserror::Error;

use command::{Command, HELP};

#[derive(Debug, Parser)]
#[command(name = "canvas-sync-cli", version, about = "Headless canvas sync client")]
struct Args {
    /// Authority address, e.g. ws://localhost:3030/ws
    url: String,
    /// Engine configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cursor throttle window in milliseconds
    #[arg(long)]
    throttle_ms: Option<u64>,
    /// Do not reconnect after the connection drops
    #[arg(long)]
    no_reconnect: bool,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &Args) -> Result<EngineConfig, CliError> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => EngineConfig::default(),
    };
    if let Some(ms) = args.throttle_ms {
        config.throttle_window_ms = ms;
    }
    if args.no_reconnect {
        config.reconnect.enabled = false;
    }
    config.validate()?;
    Ok(config)
}

fn summarize(state: &CanvasState) -> String {
    format!(
        "{} cursor(s), {} text element(s)",
        state.cursors.len(),
        state.text_elements.len()
    )
}

fn run(args: Args) -> Result<(), CliError> {
    let config = load_config(&args)?;
    log::debug!("Engine config: {:?}", config);

    let engine = SyncEngine::websocket(config);
    engine.on_connection_change(|status| log::info!("Connection {}", status));
    engine.on_state_change(|state: &CanvasState| log::info!("Canvas updated: {}", summarize(state)));

    let driver = engine.spawn_driver()?;
    if let Err(e) = engine.connect(&args.url) {
        log::error!("{}", e);
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(stdout, "{}", e)?;
                continue;
            }
        };

        match command {
            Command::Cursor { x, y } => engine.send_cursor(x, y),
            Command::Text { id, x, y, text } => {
                let id = id.unwrap_or_else(SyncEngine::new_text_element_id);
                writeln!(stdout, "text element {}", id)?;
                engine.send_text_element(id, x, y, text);
            }
            Command::Connect { url } => {
                let url = url.as_deref().unwrap_or(&args.url);
                if let Err(e) = engine.connect(url) {
                    writeln!(stdout, "{}", e)?;
                }
            }
            Command::Disconnect => engine.disconnect(),
            Command::State => {
                let state = engine.current_state();
                writeln!(stdout, "{}", encode_snapshot(&state, None)?)?;
            }
            Command::Status => writeln!(stdout, "{}", engine.status())?,
            Command::Help => writeln!(stdout, "{}", HELP)?,
            Command::Quit => break,
        }
    }

    engine.disconnect();
    driver.stop();
    Ok(())
}
