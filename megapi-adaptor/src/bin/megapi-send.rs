//! Forward hex-encoded frames from stdin to a MegaPi board.
//!
//! Usage: `megapi-send [CONFIG.toml]`
//!
//! Each non-empty input line is one frame, e.g. `ff 55 02 00 04`. Settings
//! come from the optional config file and `MEGAPI_*` environment variables.
//! Runs until end of input, SIGINT, or SIGTERM.

use anyhow::{Context, Result};
use std::{env, io::BufRead, path::PathBuf, thread};
use tokio::signal::unix::{self, SignalKind};
use tokio_util::sync::CancellationToken;

use megapi_adaptor::tracing::{self, prelude::*};
use megapi_adaptor::{Adaptor, AdaptorConfig, FrameSender, SerialTransport};

const DEFAULT_DEVICE: &str = "/dev/ttyAMA0";

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout();

    let config = match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => AdaptorConfig::load_from(&path)?,
        None => AdaptorConfig::new(DEFAULT_DEVICE),
    }
    .apply_env()?;

    let mut megapi = Adaptor::with_config(config, SerialTransport);
    megapi.connect().await?;
    let frames = megapi.sender().context("adaptor has no writer after connect")?;

    // Stdin is read on a plain thread so a pending read never holds up
    // runtime shutdown.
    let input_done = CancellationToken::new();
    {
        let input_done = input_done.clone();
        thread::spawn(move || {
            forward_stdin(frames);
            input_done.cancel();
        });
    }
    info!("Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = input_done.cancelled() => {},
    }

    trace!("Shutting down.");
    megapi.finalize().await?;
    for failure in megapi.take_write_failures() {
        warn!(%failure, "Frame not delivered.");
    }

    info!("Exiting.");
    Ok(())
}

fn forward_stdin(frames: FrameSender) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                error!(error = %e, "Failed to read stdin.");
                return;
            }
        };

        let text: String = line.split_whitespace().collect();
        if text.is_empty() {
            continue;
        }

        match hex::decode(&text) {
            Ok(frame) => {
                if frames.blocking_send(frame).is_err() {
                    debug!("Writer stopped, no longer reading input.");
                    return;
                }
            }
            Err(e) => warn!(line = %line.trim(), error = %e, "Skipping invalid hex."),
        }
    }
    debug!("End of input.");
}
