//! Door terminal
//!
//! Runs one checkpoint session against the configured ticket store. Codes are read from
//! stdin, one per line, standing in for the camera decoder:
//!
//! - a non-empty line presents that code to the scanner and then takes it away
//! - an empty line is "Scan Next"
//! - `:q` ends the session
//!
//! Logs go to stderr so the result screen on stdout stays readable.

use anyhow::Context;
use checkpoint::acquisition::ChannelSource;
use checkpoint::presentation::TerminalDisplay;
use checkpoint::{store, CheckpointController, Config, OperatorCommand, ValidationEngine};
use gatecheck_core::environment::SystemClock;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const QUIT: &str = ":q";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,checkpoint=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    let ticket_store = store::connect(&config.store, Arc::new(SystemClock))
        .await
        .context("Failed to initialise ticket store")?;
    let engine = ValidationEngine::from_config(ticket_store, &config.validation);

    let (frames, source) = ChannelSource::channel();
    let controller = CheckpointController::start(
        source,
        config.scanner,
        engine,
        Arc::new(TerminalDisplay::stdout()),
        config.validation.operator.clone(),
    )
    .await
    .context("Failed to start the scanner")?;

    let (commands, command_rx) = mpsc::channel(8);
    let feed = frames.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let command = match lines.next_line().await {
                Ok(Some(line)) => match line.trim() {
                    QUIT => OperatorCommand::Quit,
                    "" => OperatorCommand::ScanNext,
                    code => {
                        if feed.send(Some(code.to_string())).is_err() || feed.send(None).is_err() {
                            break;
                        }
                        continue;
                    },
                },
                Ok(None) => OperatorCommand::Quit,
                Err(error) => {
                    tracing::warn!(%error, "Failed to read operator input");
                    OperatorCommand::Quit
                },
            };

            let quit = command == OperatorCommand::Quit;
            if commands.send(command).await.is_err() || quit {
                break;
            }
        }
    });

    let tally = controller.run(command_rx).await.context("Checkpoint session failed")?;
    drop(frames);

    println!(
        "Session closed: {} admitted, {} already used, {} rejected, {} system errors ({} scans)",
        tally.admitted,
        tally.duplicates,
        tally.rejected,
        tally.system_errors,
        tally.total()
    );
    Ok(())
}
