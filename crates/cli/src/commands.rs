//! Subcommand definitions and their execution against a [`Client`].

use std::io::Write;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use endpoints::{Client, ExecRequest, ExecStreams};
use engine::Endpoint;
use serde_json::Value;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "lxdctl", version, about = "Manage resources on an LXD server")]
pub struct Cli {
    /// Configuration file (TOML).
    #[arg(long, env = "LXDCTL_CONFIG", global = true)]
    pub config: Option<std::path::PathBuf>,

    /// Server URL; overrides `transport.base_url` from the file.
    #[arg(long, global = true)]
    pub url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the server root.
    Info,
    /// List the keys of a collection.
    List {
        #[arg(value_enum)]
        collection: CollectionKind,
    },
    /// Print any endpoint by URL, e.g. `/1.0/instances/c1`.
    Show { url: String },
    /// Run a command in an instance; exits with the command's return code.
    Exec {
        instance: String,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    Start { instance: String },
    Stop { instance: String },
    /// Follow the server's log records.
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CollectionKind {
    Instances,
    Containers,
    Certificates,
    StoragePools,
    Projects,
}

/// Runs `command`, writing its report to `out`.
pub async fn run(client: &Client, command: Command, out: &mut dyn Write) -> anyhow::Result<ExitCode> {
    match command {
        Command::Info => {
            let api = client.api().await.context("cannot load the server root")?;
            print_json(out, &Value::Object(api.object().fields()))?;
        }
        Command::List { collection } => {
            for key in list(client, collection).await? {
                writeln!(out, "{key}")?;
            }
        }
        Command::Show { url } => match client.registry().get(&url).await? {
            Endpoint::Object(object) => print_json(out, &Value::Object(object.fields()))?,
            Endpoint::Collection(collection) => {
                for item in collection.urls() {
                    writeln!(out, "{item}")?;
                }
            }
        },
        Command::Exec { instance, command } => return exec(client, &instance, command).await,
        Command::Start { instance } => {
            client.instances().await?.get(&instance).await?.start().await?;
            info!(%instance, "started");
        }
        Command::Stop { instance } => {
            client.instances().await?.get(&instance).await?.stop().await?;
            info!(%instance, "stopped");
        }
        Command::Events => {
            let forwarded = client.events().await?.run().await?;
            info!(forwarded, "event stream closed");
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn list(client: &Client, kind: CollectionKind) -> anyhow::Result<Vec<String>> {
    Ok(match kind {
        CollectionKind::Instances => client.instances().await?.keys(),
        CollectionKind::Containers => client.containers().await?.keys(),
        CollectionKind::Certificates => client.certificates().await?.keys(),
        CollectionKind::StoragePools => client.storage_pools().await?.keys(),
        CollectionKind::Projects => client.projects().await?.keys(),
    })
}

async fn exec(client: &Client, instance: &str, command: Vec<String>) -> anyhow::Result<ExitCode> {
    let instance = client.instances().await?.get(instance).await?;
    let streams = ExecStreams::new()
        .stdout(|data| forward(&mut std::io::stdout(), &data))
        .stderr(|data| forward(&mut std::io::stderr(), &data));
    let output = instance
        .exec(&ExecRequest::new(command), streams)
        .await
        .with_context(|| format!("exec in '{}' failed", instance.name()))?;
    let code = output.return_code.unwrap_or(1);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn forward(target: &mut dyn Write, data: &[u8]) {
    // A closed terminal is not worth failing the remote command for.
    let _ = target.write_all(data).and_then(|()| target.flush());
}

fn print_json(out: &mut dyn Write, value: &Value) -> anyhow::Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}
