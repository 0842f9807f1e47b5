//! LinkedCV - build and offline-cache tooling for the LinkedCV portfolio site.
//!
//! Stamps the deployment version into the site sources, drives the offline
//! cache worker against a live origin, and runs the contact relay and
//! translation lookups from the shell.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use linkedcv_core::cache::{
    CacheStorage, DiskStorage, FetchOutcome, HttpNetwork, Method, Request, ResponseSource,
    ServiceWorker,
};
use linkedcv_core::contact::{ContactRelay, ResendTransport};
use linkedcv_core::i18n::{Locale, Translations};
use linkedcv_core::version::VersionToken;
use linkedcv_core::Config;

/// Log file name prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "linkedcv.log";

#[derive(Parser)]
#[command(name = "linkedcv", version, about = "Build and offline-cache tooling for the LinkedCV site")]
struct Cli {
    /// Config file (defaults to ~/.config/linkedcv/config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to a daily rotated file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stamp the build version into the site sources
    Inject {
        /// Site root containing the target files
        #[arg(long, default_value = ".")]
        root: PathBuf,
        /// Revision id; defaults to the platform's revision variable
        #[arg(long)]
        revision: Option<String>,
    },
    /// Install and activate the worker for a version, precaching from the origin
    Sync {
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        version: String,
    },
    /// Serve a path through the installed worker and print the body
    Fetch {
        #[arg(long)]
        origin: Option<String>,
        #[arg(long)]
        version: String,
        #[arg(long, default_value = "GET")]
        method: String,
        path: String,
    },
    /// List stored cache generations
    Generations,
    /// Run the contact relay on a request body read from stdin
    Relay {
        #[arg(long, default_value = "POST")]
        method: String,
    },
    /// Look up a translated string
    Translate {
        #[arg(long, default_value = "lang")]
        lang_dir: PathBuf,
        #[arg(long)]
        lang: Option<String>,
        key: String,
    },
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
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

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Command::Inject { root, revision } => inject(&config, &root, revision.as_deref()),
        Command::Sync { origin, version } => sync(&config, origin, &version).await,
        Command::Fetch {
            origin,
            version,
            method,
            path,
        } => fetch(&config, origin, &version, &method, &path).await,
        Command::Generations => generations(&config).await,
        Command::Relay { method } => relay(&config, &method).await,
        Command::Translate {
            lang_dir,
            lang,
            key,
        } => translate(&lang_dir, lang.as_deref(), &key),
    }
}

fn inject(config: &Config, root: &Path, revision: Option<&str>) -> Result<()> {
    let token = match revision {
        Some(rev) if !rev.trim().is_empty() => VersionToken::from_revision(rev.trim()),
        _ => VersionToken::from_env(&config.revision_var),
    };
    eprintln!("[build] version: {}", token);

    let report = config
        .injector(root)
        .run(&token)
        .context("Version injection failed")?;
    for (file, count) in &report.files {
        eprintln!("[build] ✓ {} ({} replaced)", file.display(), count);
    }

    println!("{}", token);
    Ok(())
}

fn storage(config: &Config) -> Result<Arc<DiskStorage>> {
    let dir = config.cache_dir()?;
    Ok(Arc::new(DiskStorage::new(dir.clone()).with_context(|| {
        format!("Failed to open cache directory {}", dir.display())
    })?))
}

fn network(config: &Config, origin: Option<String>) -> Result<Arc<HttpNetwork>> {
    let origin = origin
        .or_else(|| config.origin.clone())
        .ok_or_else(|| anyhow::anyhow!("No origin given; pass --origin or set it in the config"))?;
    Ok(Arc::new(HttpNetwork::new(&origin)?))
}

async fn sync(config: &Config, origin: Option<String>, version: &str) -> Result<()> {
    let worker_config = config.worker_config(VersionToken::from_revision(version))?;
    let worker = ServiceWorker::new(worker_config, storage(config)?, network(config, origin)?);

    let installed = worker.install().await.context("Install failed")?;
    eprintln!(
        "Installed {} ({} assets precached)",
        installed.cache_name, installed.precached
    );

    let activated = worker.activate().await.context("Activation failed")?;
    for name in &activated.deleted {
        eprintln!("Removed stale generation {}", name);
    }
    info!(cache = %activated.cache_name, "Worker active");
    println!("{}", activated.cache_name);
    Ok(())
}

async fn fetch(
    config: &Config,
    origin: Option<String>,
    version: &str,
    method: &str,
    path: &str,
) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid method: {}", method))?;
    let worker_config = config.worker_config(VersionToken::from_revision(version))?;
    let worker =
        ServiceWorker::resume(worker_config, storage(config)?, network(config, origin)?).await?;

    let request = Request::new(method, path);
    let outcome = worker.fetch(&request).await?;
    // Let a network response land in the cache before the process exits
    worker.flush_writes().await;

    match outcome {
        FetchOutcome::Passthrough => {
            eprintln!(
                "{} {} not intercepted: only GET requests are served from the cache",
                request.method, path
            );
        }
        FetchOutcome::Responded { response, source } => {
            let source = match source {
                ResponseSource::Cache => "cache",
                ResponseSource::Network => "network",
            };
            eprintln!("{} {} ({})", response.status, path, source);
            io::stdout().write_all(&response.body)?;
        }
    }
    Ok(())
}

async fn generations(config: &Config) -> Result<()> {
    let storage = storage(config)?;
    let names = storage.keys().await?;
    if names.is_empty() {
        eprintln!("No cache generations in {}", storage.cache_dir().display());
        return Ok(());
    }

    for name in names {
        let entries = storage.entries(&name).await?;
        let newest = entries
            .values()
            .max_by_key(|cached| cached.cached_at)
            .map(|cached| cached.stored_at_display())
            .unwrap_or_else(|| "never".to_string());
        println!("{}\t{} entries\tupdated {}", name, entries.len(), newest);
    }
    Ok(())
}

async fn relay(config: &Config, method: &str) -> Result<()> {
    let method: Method = method
        .to_uppercase()
        .parse()
        .with_context(|| format!("Invalid method: {}", method))?;

    let mut body = Vec::new();
    io::stdin()
        .read_to_end(&mut body)
        .context("Failed to read request body from stdin")?;

    let transport = Arc::new(ResendTransport::new(config.relay.endpoint.clone())?);
    let relay = ContactRelay::new(
        config.relay.clone(),
        config.relay.api_key_from_env(),
        transport,
    );

    let response = relay.handle(&method, &body).await;
    eprintln!("{}", response.status);
    if let Some(json) = response.body_json() {
        println!("{}", json);
    }
    Ok(())
}

fn translate(lang_dir: &Path, lang: Option<&str>, key: &str) -> Result<()> {
    let locale = match lang {
        Some(code) => code.parse()?,
        None => Locale::FALLBACK,
    };
    let translations = Translations::load_dir(lang_dir, locale)?;
    println!("{}", translations.text(key));
    Ok(())
}
