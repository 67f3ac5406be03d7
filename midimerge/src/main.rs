//! midimerge - merge MIDI byte streams into one destination

mod endpoint;
mod ports;
mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::Parser;
use midi_merge::Supervisor;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::endpoint::Endpoint;

#[derive(Debug, Parser)]
#[command(name = "midimerge")]
#[command(version, about = "Merge MIDI streams into one, eliding redundant status bytes")]
struct Cli {
    /// Sources followed by the destination: a path, `-` for stdin/stdout, or serial:PORT[@BAUD]
    #[arg(
        value_name = "ENDPOINT",
        num_args = 2..,
        required_unless_present = "list_ports"
    )]
    endpoints: Vec<Endpoint>,

    /// JSON file with merge settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Maximum number of streams, destination included
    #[arg(long, value_name = "N")]
    max_streams: Option<usize>,

    /// List serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "midimerge=info,midi_merge=info,midi_wire=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether every stream ended cleanly
async fn run(cli: Cli) -> Result<bool> {
    if cli.list_ports {
        for port in ports::list()? {
            println!("{}", port);
        }
        return Ok(true);
    }

    let config = settings::load(cli.config.as_deref(), cli.max_streams)?;

    let Some((destination, sources)) = cli.endpoints.split_last() else {
        bail!("no destination given");
    };
    config.validate_sources(sources.len())?;
    if sources.iter().filter(|s| **s == Endpoint::Stdio).count() > 1 {
        bail!("stdin can only be used as one source");
    }

    let mut inputs = Vec::with_capacity(sources.len());
    for source in sources {
        let input = source
            .open_source()
            .await
            .with_context(|| format!("opening source {}", source))?;
        inputs.push((source.to_string(), input));
    }
    let sink = destination
        .open_destination()
        .await
        .with_context(|| format!("opening destination {}", destination))?;

    let supervisor = Supervisor::with_config(inputs, sink, config)?;

    let cancel = supervisor.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping all streams");
            cancel.cancel();
        }
    });

    info!("Merging {} source(s) into {}", supervisor.stream_count(), destination);
    let summary = supervisor.run().await;

    for report in summary.failures() {
        if let Some(e) = report.error() {
            error!("Stream {} ({}) failed: {}", report.id, report.name, e);
        }
    }

    Ok(summary.is_success())
}
