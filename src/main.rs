//! coordkv command-line client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use coordkv::config::Config;
use coordkv::constants;
use coordkv::kv::{BackendKind, KeyValue, KvStore};
use coordkv::logging;

#[derive(Parser)]
#[command(name = "coordkv", version, about = "Hierarchical key-value client for etcd")]
struct Cli {
    /// Config file (defaults to ./coordkv.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend driver, overriding the config file
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendKind>,

    /// Store endpoint; repeat for a cluster
    #[arg(short, long = "endpoint", global = true)]
    endpoints: Vec<String>,

    #[arg(long, global = true)]
    username: Option<String>,

    #[arg(long, global = true, env = "COORDKV_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read a single key
    Get { key: String },
    /// Read every key under a prefix
    List {
        prefix: String,
        /// Sort by key
        #[arg(long)]
        sort: bool,
    },
    /// Write a key
    Set {
        key: String,
        value: String,
        /// Seconds until expiry; 0 never expires
        #[arg(long, default_value_t = 0)]
        ttl: u64,
    },
    /// Delete a single key
    Delete { key: String },
    /// Delete every key under a prefix
    DeletePrefix { prefix: String },
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None if PathBuf::from(constants::CONFIG_FILE).exists() => Config::load()?,
        None => Config::default(),
    };

    if let Some(backend) = cli.backend {
        config.store.backend = backend;
    }
    if !cli.endpoints.is_empty() {
        config.store.endpoints.clone_from(&cli.endpoints);
    }
    if let Some(username) = &cli.username {
        config.store.username.clone_from(username);
    }
    if let Some(password) = &cli.password {
        config.store.password.clone_from(password);
    }
    Ok(config)
}

fn print_entries(entries: &[KeyValue], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(entries)?);
    } else {
        for kv in entries {
            println!("{kv}");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    logging::init(&config.logging);

    let validation = config.validate()?;
    for warning in &validation.warnings {
        tracing::warn!("{warning}");
    }

    let store = KvStore::connect(config.store.backend, config.store.connect_options())
        .await
        .context("Failed to open KV store")?;

    match &cli.command {
        Command::Get { key } => {
            let kv = store.get_val(key).await?;
            print_entries(std::slice::from_ref(&kv), cli.json)?;
        },
        Command::List { prefix, sort } => {
            let entries = store.get_list(prefix, *sort).await?;
            print_entries(&entries, cli.json)?;
        },
        Command::Set { key, value, ttl } => {
            store.set(key, value, *ttl).await?;
        },
        Command::Delete { key } => {
            store.delete(key).await?;
        },
        Command::DeletePrefix { prefix } => {
            let deleted = store.delete_list(prefix).await?;
            if cli.json {
                println!("{}", serde_json::json!({ "deleted": deleted }));
            } else {
                println!("deleted {deleted}");
            }
        },
    }

    store.close().await;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}
