//! Folio command line.
//!
//! Replays notebook edit scripts through the debounced sync queue against an
//! in-memory store and prints the remote calls it produced.
//!
//! Usage:
//!   # Replay a script with the default 3s debounce
//!   folio replay edits.json
//!
//!   # Shorter debounce, slow store, config from file
//!   folio replay edits.json --debounce-ms 500 --latency-ms 200 --config sync.ron
//!
//!   # Print the effective configuration
//!   folio config --config sync.ron

mod script;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use folio_sync::SyncConfig;

use crate::script::{Ending, Script};

/// Debounced notebook write-back, from the command line.
#[derive(Parser, Debug)]
#[command(name = "folio")]
#[command(about = "Replay Folio notebook edits through the sync queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay an edit script and print the resulting remote calls
    Replay {
        /// JSON edit script
        script: PathBuf,

        #[command(flatten)]
        sync: SyncArgs,

        /// Simulated latency of every remote call
        #[arg(long, default_value_t = 0)]
        latency_ms: u64,

        /// Drop pending edits at the end instead of flushing them
        #[arg(long)]
        abandon: bool,

        /// Print the final document as JSON
        #[arg(long)]
        dump: bool,
    },
    /// Print the effective sync configuration as RON
    Config {
        #[command(flatten)]
        sync: SyncArgs,
    },
}

#[derive(Args, Debug)]
struct SyncArgs {
    /// RON file with sync settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the debounce delay
    #[arg(long)]
    debounce_ms: Option<u64>,

    /// Override the per-request timeout
    #[arg(long)]
    timeout_ms: Option<u64>,
}

impl SyncArgs {
    fn resolve(&self) -> Result<SyncConfig> {
        let mut config = match &self.config {
            Some(path) => SyncConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => SyncConfig::default(),
        };
        if let Some(ms) = self.debounce_ms {
            config.debounce_ms = ms;
        }
        if let Some(ms) = self.timeout_ms {
            config.request_timeout_ms = Some(ms);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Replay {
            script,
            sync,
            latency_ms,
            abandon,
            dump,
        } => {
            let config = sync.resolve()?;
            let script = Script::load(&script)?;
            run_replay(script, config, Duration::from_millis(latency_ms), abandon, dump).await
        }
        Command::Config { sync } => {
            let config = sync.resolve()?;
            let text = ron::ser::to_string_pretty(&config, ron::ser::PrettyConfig::default())
                .context("serializing config")?;
            println!("{text}");
            Ok(())
        }
    }
}

async fn run_replay(
    script: Script,
    config: SyncConfig,
    latency: Duration,
    abandon: bool,
    dump: bool,
) -> Result<()> {
    tracing::info!(debounce_ms = config.debounce_ms, ?latency, "starting replay");

    let (store, queue) = script::harness(config, latency);
    let mut events = queue.subscribe();
    let watcher = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(key = %event.key(), state = ?event.state(), "sync event");
        }
    });

    let ending = if abandon { Ending::Abandon } else { Ending::Close };
    let outcome = script::replay(script, &store, queue, ending).await?;
    watcher.abort();

    for call in &outcome.calls {
        println!("{}", script::describe(call));
    }
    println!("notebook {:?}: {} ({} calls)", outcome.name, outcome.status.label(), outcome.calls.len());

    if dump {
        let json = serde_json::to_string_pretty(&outcome.blocks).context("serializing document")?;
        println!("{json}");
    }
    Ok(())
}
