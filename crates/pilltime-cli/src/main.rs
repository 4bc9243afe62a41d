//! Pill Time offline cache host.
//!
//! Drives the offline cache worker from the command line: install the asset
//! list, activate (dropping old cache versions), and fetch URLs cache-first.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pilltime_core::{Method, Notification, Request, ServiceWorker, WorkerConfig, WorkerHost};

/// Log file name inside `--log-dir`
const LOG_FILE: &str = "pilltime.log";

#[derive(Parser, Debug)]
#[command(name = "pilltime")]
#[command(about = "Offline cache host for the Pill Time reminder app")]
#[command(version)]
struct Args {
    /// Path to config file (default: $XDG_CONFIG_HOME/pill-time/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write logs to a file in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and store the asset list without activating
    Install,
    /// Install, then activate: delete old cache versions
    Start,
    /// Fetch a URL through the active cache, writing the body to stdout
    Fetch {
        url: String,
        #[arg(short = 'X', long, default_value = "GET")]
        method: String,
    },
    /// List cache stores
    Caches,
    /// List entries in a cache store (default: the current one)
    Entries {
        #[arg(long)]
        cache: Option<String>,
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Simulate a click on a reminder notification
    Click {
        #[arg(long, default_value = "reminder")]
        tag: String,
        #[arg(long, default_value = "Time for your pill")]
        title: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig> {
    match path {
        Some(path) => {
            let mut config = WorkerConfig::load_from(path)?;
            config.apply_env();
            Ok(config)
        }
        None => WorkerConfig::load(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let _guard = init_tracing(args.log_dir.as_deref());

    let config = load_config(args.config.as_deref())?;
    info!(cache = %config.cache_name, scope = %config.scope, "Pill Time cache host starting");

    match args.command {
        Command::Install => install(&config).await,
        Command::Start => start(&config).await,
        Command::Fetch { url, method } => fetch(&config, &url, &method).await,
        Command::Caches => list_caches(&config).await,
        Command::Entries { cache, json } => list_entries(&config, cache.as_deref(), json).await,
        Command::Click { tag, title } => click(&config, tag, title).await,
    }
}

async fn install(config: &WorkerConfig) -> Result<()> {
    let host = WorkerHost::spawn(ServiceWorker::from_config(config)?);
    let report = host.install().await?;
    for url in &report.cached {
        println!("cached  {}", url);
    }
    for (url, reason) in &report.failed {
        println!("skipped {} ({})", url, reason);
    }
    Ok(())
}

async fn start(config: &WorkerConfig) -> Result<()> {
    let host = WorkerHost::spawn(ServiceWorker::from_config(config)?);
    let (installed, activated) = host.start().await?;
    println!(
        "{}: {} assets cached, {} skipped",
        config.cache_name,
        installed.cached.len(),
        installed.failed.len()
    );
    if let Some(activated) = activated {
        for name in &activated.deleted {
            println!("deleted {}", name);
        }
    }
    Ok(())
}

async fn fetch(config: &WorkerConfig, url: &str, method: &str) -> Result<()> {
    let method =
        Method::parse(method).ok_or_else(|| anyhow::anyhow!("Unknown method: {}", method))?;

    let worker = ServiceWorker::from_config(config)?;
    worker
        .resume()
        .await
        .context("Run `pilltime start` first")?;
    let host = WorkerHost::spawn(worker);

    let response = host.fetch(Request::new(method, url)).await?;
    eprintln!("{} {} ({:?})", response.status, response.status_text, response.kind);
    for (name, value) in &response.headers {
        eprintln!("{}: {}", name, value);
    }

    let mut stdout = io::stdout().lock();
    stdout.write_all(&response.body)?;
    stdout.flush()?;
    Ok(())
}

async fn list_caches(config: &WorkerConfig) -> Result<()> {
    let worker = ServiceWorker::from_config(config)?;
    for name in worker.storage().keys().await? {
        let marker = if name == config.cache_name { "*" } else { " " };
        println!("{} {}", marker, name);
    }
    Ok(())
}

async fn list_entries(config: &WorkerConfig, cache: Option<&str>, json: bool) -> Result<()> {
    let worker = ServiceWorker::from_config(config)?;
    let name = cache.unwrap_or(&config.cache_name);
    if !worker.storage().has(name).await? {
        anyhow::bail!("No cache named {}", name);
    }

    let entries = worker.storage().open(name).await?.entries().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{:<6} {:<4} {:>8}  {}",
            entry.request.method,
            entry.response.status,
            entry.age_display(),
            entry.request.url
        );
    }
    Ok(())
}

async fn click(config: &WorkerConfig, tag: String, title: String) -> Result<()> {
    let host = WorkerHost::spawn(ServiceWorker::from_config(config)?);
    let outcome = host
        .notification_click(Notification::new(tag, title))
        .await?;
    println!(
        "{} window {} at {}",
        if outcome.opened { "opened" } else { "focused" },
        outcome.window.id,
        outcome.window.url
    );
    Ok(())
}
