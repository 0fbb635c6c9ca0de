//! `lxdctl` entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Parse configuration**: load the TOML file named by `--config` or
//!    `LXDCTL_CONFIG`, then apply `--url`.
//! 2. **Wire observability**: install a `tracing-subscriber` layer (JSON or
//!    text, filtered by `RUST_LOG` or the configured directives). Every span
//!    and event emitted by the library crates flows through it.
//! 3. **Construct infrastructure**: build the [`transport::HttpTransport`] and
//!    inject it into an [`endpoints::Client`].
//! 4. **Dispatch** the selected subcommand.

mod commands;
mod config;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use endpoints::Client;
use tracing_subscriber::EnvFilter;
use transport::HttpTransport;

use crate::commands::Cli;
use crate::config::{CliConfig, LogConfig, LogFormat};

fn init_tracing(log: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&log.filter))
        .context("invalid log filter")?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match log.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    }
    .map_err(|err| anyhow!("cannot install tracing subscriber: {err}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref(), cli.url.as_deref())?;
    init_tracing(&config.log)?;

    let transport = HttpTransport::new(&config.transport).context("cannot set up transport")?;
    let client = Client::new(Arc::new(transport), config.engine)
        .context("cannot build endpoint table")?;

    commands::run(&client, cli.command, &mut std::io::stdout()).await
}
