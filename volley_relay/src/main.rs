// CLI entry point for the volley relay.
//
// Starts a standalone relay that players and spectators connect to. See
// `server.rs` for the networking architecture and `rooms.rs` for room state.
//
// Settings come from defaults, then an optional JSON file (`--config`), then
// command-line flags. Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use volley_relay::{RelayConfig, start_relay};

#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(about = "Relay volley inputs between players and spectators")]
struct Args {
    /// JSON file with relay settings; flags override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind.
    #[arg(long)]
    bind: Option<String>,

    /// Listen port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Spectators allowed per room.
    #[arg(long)]
    max_watchers: Option<usize>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let json = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                serde_json::from_str(&json).with_context(|| format!("parsing {}", path.display()))?
            }
            None => RelayConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max) = self.max_watchers {
            config.max_watchers_per_room = max;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Args::parse().into_config()?;
    let (handle, addr) = start_relay(config).context("failed to start relay")?;
    info!(%addr, "relay ready, stop with Ctrl+C");

    // The process exits on SIGINT/SIGTERM; until then the relay thread runs.
    handle.wait();
    Ok(())
}
