//! profbeacon - CLI for the profile scrub-and-upload pipeline
//!
//! This tool provides commands for:
//! - Showing configuration and stored client state
//! - Scrubbing URLs out of a profile file
//! - Packing a profile into an upload-ready compressed body
//! - Uploading profiles to the collection endpoint
//!
//! Uses XDG Base Directory specification for file locations:
//! - State: $XDG_DATA_HOME/profbeacon/state.db (~/.local/share/profbeacon/state.db)
//! - Config: $XDG_CONFIG_HOME/profbeacon/config.toml (~/.config/profbeacon/config.toml)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use profbeacon_core::queue::digest_hex;
use profbeacon_core::storage::{KEY_CLIENT_ID, KEY_ENABLED};
use profbeacon_core::{
    compress, Collector, CollectorClient, Config, ContentEncoding, Purger, SqliteStorage, Storage,
    UploadQueue, Whitelist,
};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "profbeacon")]
#[command(about = "Scrub, compress and upload performance profiles")]
#[command(version)]
struct Args {
    /// Write a log file to the XDG state directory
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and stored client state
    Status,

    /// Replace non-whitelisted URLs in a profile with pseudonyms
    Purge {
        /// Profile JSON file
        file: PathBuf,

        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Purge and compress a profile into an upload body
    Pack {
        /// Profile JSON file
        file: PathBuf,

        /// Compressed output file
        #[arg(short, long)]
        output: PathBuf,

        /// Body encoding (default: from config)
        #[arg(short, long)]
        encoding: Option<Encoding>,
    },

    /// Purge, compress and upload profiles, retrying until delivered
    Upload {
        /// Profile JSON files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Encoding {
    Deflate,
    Gzip,
}

impl From<Encoding> for ContentEncoding {
    fn from(encoding: Encoding) -> Self {
        match encoding {
            Encoding::Deflate => ContentEncoding::Deflate,
            Encoding::Gzip => ContentEncoding::Gzip,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging if verbose
    let _log_guard = if args.verbose {
        Some(profbeacon_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config).await,
        Command::Purge { file, output } => cmd_purge(&config, &file, output.as_deref()),
        Command::Pack {
            file,
            output,
            encoding,
        } => {
            let encoding = encoding.map(Into::into).unwrap_or(config.upload.encoding);
            cmd_pack(&config, &file, &output, encoding).await
        }
        Command::Upload { files } => cmd_upload(&config, &files).await,
    }
}

fn purger(config: &Config) -> Purger {
    Purger::new(Whitelist::with_extra(
        config.privacy.extra_whitelist.iter().cloned(),
    ))
}

fn read_profile(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", path.display()))
}

async fn cmd_status(config: &Config) -> Result<()> {
    println!("profbeacon Configuration");
    println!("========================");
    println!();

    let sampling = &config.sampling;
    println!("Server URL:      {}", config.upload.server_url);
    println!("Encoding:        {}", config.upload.encoding);
    println!("Upload Delay:    {}s", config.upload.delay_secs);
    println!("Min Interval:    {}s", sampling.min_interval_secs);
    println!("Max Capture:     {}s", sampling.max_capture_secs);
    println!("Read-out Limit:  {}s", sampling.retrieval_timeout_secs);
    println!(
        "Whitelist:       {} hosts",
        Whitelist::with_extra(config.privacy.extra_whitelist.iter().cloned()).len()
    );

    println!();
    let db_path = Config::state_db_path();
    if !db_path.exists() {
        println!("State:           not initialized ({})", db_path.display());
        println!("Enabled:         {} (default)", sampling.enabled);
        return Ok(());
    }

    let storage = SqliteStorage::open(&db_path).context("failed to open state database")?;
    let client_id = storage.get(KEY_CLIENT_ID).await?;
    let enabled = storage.get(KEY_ENABLED).await?;

    println!("State:           {}", db_path.display());
    println!(
        "Client ID:       {}",
        client_id.as_deref().unwrap_or("<not registered>")
    );
    match enabled {
        Some(value) => println!("Enabled:         {}", value),
        None => println!("Enabled:         {} (default)", sampling.enabled),
    }

    Ok(())
}

fn cmd_purge(config: &Config, file: &Path, output: Option<&Path>) -> Result<()> {
    let profile = read_profile(file)?;
    let mut purger = purger(config);
    let purged = purger.purge(profile);
    tracing::info!(file = %file.display(), urls = purger.cache_len(), "Purged profile");

    let json = serde_json::to_string(&purged)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

async fn cmd_pack(
    config: &Config,
    file: &Path,
    output: &Path,
    encoding: ContentEncoding,
) -> Result<()> {
    let profile = read_profile(file)?;
    let purged = purger(config).purge(profile);
    let beacon = compress::join(compress::spawn(purged, encoding))
        .await
        .context("failed to compress profile")?;

    std::fs::write(output, &beacon.bytes)
        .with_context(|| format!("failed to write {}", output.display()))?;

    println!("Wrote:       {}", output.display());
    println!("Encoding:    {}", beacon.encoding);
    println!("Raw Size:    {} bytes", beacon.raw_len);
    println!("Compressed:  {} bytes", beacon.bytes.len());
    println!("SHA-256:     {}", digest_hex(&beacon.bytes));
    Ok(())
}

async fn cmd_upload(config: &Config, files: &[PathBuf]) -> Result<()> {
    let collector = CollectorClient::new(&config.upload).context("failed to create collector client")?;
    let storage = SqliteStorage::open(&Config::state_db_path()).context("failed to open state database")?;

    let client_id = match storage.get(KEY_CLIENT_ID).await? {
        Some(id) if !id.is_empty() => id,
        _ => {
            let id = collector
                .register()
                .await
                .context("failed to register with the collection endpoint")?;
            storage.set(KEY_CLIENT_ID, &id).await?;
            println!("Registered as {}", id);
            id
        }
    };

    let mut purger = purger(config);
    let mut queue = UploadQueue::new();
    for file in files {
        let purged = purger.purge(read_profile(file)?);
        let beacon = compress::join(compress::spawn(purged, config.upload.encoding))
            .await
            .with_context(|| format!("failed to compress {}", file.display()))?;
        queue.push(beacon);
    }

    let collector: Arc<dyn Collector> = Arc::new(collector);
    let delay = config.upload.delay();
    println!("Uploading {} profile(s) to {}", queue.len(), config.upload.server_url);

    while let Some(attempt) = queue.begin_attempt() {
        let outcome = tokio::select! {
            outcome = attempt.run(&*collector, &client_id) => outcome,
            _ = tokio::signal::ctrl_c() => {
                println!("Interrupted; {} profile(s) not delivered", queue.len());
                return Ok(());
            }
        };

        match &outcome {
            Ok(()) => println!("Delivered profile {} ({} bytes)", attempt.entry_id, attempt.len()),
            Err(e) => {
                tracing::warn!(entry_id = attempt.entry_id, error = %e, "Upload failed");
                eprintln!("Upload failed: {}; retrying in {}s", e, delay.as_secs());
            }
        }
        let delivered = queue.finish_attempt(attempt.entry_id, outcome.is_ok());

        if !delivered && !queue.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = tokio::signal::ctrl_c() => {
                    println!("Interrupted; {} profile(s) not delivered", queue.len());
                    return Ok(());
                }
            }
        }
    }

    let stats = queue.stats();
    println!(
        "Done: {} delivered, {} failed attempt(s)",
        stats.delivered, stats.failures
    );
    Ok(())
}
