use anyhow::Context;
use bytes::Bytes;
use clap::{ArgAction, Parser, Subcommand};
use depot::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "depot")]
#[command(about = "Inspect the download hash cache and run file operations against storage locations")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Application cache directory. Hashes are tracked under `<cache-dir>/downloadCache`.
    #[arg(long, env = "DEPOT_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// More output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the SHA-256 digest of cached files
    Digest {
        /// Paths relative to the download cache
        #[arg(required = true)]
        paths: Vec<String>,
    },
    /// Show how many files the hash cache tracks
    Stats,
    /// List a directory at a storage location
    Ls {
        /// Local path, `ftp://...` or `sftp://...`
        location: String,
        #[arg(default_value = "")]
        path: String,
    },
    /// Upload a local file to a storage location
    Put {
        location: String,
        file: PathBuf,
        remote: String,
    },
    /// Download a file from a storage location
    Get {
        location: String,
        remote: String,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Remove a file or directory recursively
    Rm { location: String, path: String },
    /// Create a directory and its parents
    Mkdir { location: String, path: String },
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn integrity_config(cache_dir: Option<PathBuf>) -> anyhow::Result<IntegrityConfig> {
    let cache_dir = match cache_dir {
        Some(dir) => dir,
        None => dirs::cache_dir()
            .context("no cache directory on this platform, pass --cache-dir")?
            .join("depot"),
    };
    Ok(IntegrityConfig::from_cache_dir(cache_dir))
}

async fn blocking<T, F>(f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Digest { paths } => {
            let config = integrity_config(cli.cache_dir)?;
            blocking(move || {
                let cache = IntegrityCache::open(config);
                for path in &paths {
                    let digest = cache
                        .digest(path)
                        .with_context(|| format!("failed to hash {path}"))?;
                    println!("{digest}  {path}");
                }
                let stats = cache.stats();
                tracing::debug!(hits = stats.hits, misses = stats.misses, "digest done");
                cache.close()?;
                Ok(())
            })
            .await?;
        }
        Commands::Stats => {
            let config = integrity_config(cli.cache_dir)?;
            let cache = IntegrityCache::open(config);
            println!("root:    {}", cache.root().display());
            println!("sidecar: {}", cache.sidecar_path().display());
            println!("records: {}", cache.len());
        }
        Commands::Ls { location, path } => {
            let entries = blocking(move || Ok(open_location(&location)?.read_dir(&path)?)).await?;
            for entry in entries {
                let suffix = if entry.is_dir { "/" } else { "" };
                println!("{}{suffix}", entry.name);
            }
        }
        Commands::Put {
            location,
            file,
            remote,
        } => {
            let total = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("failed to stat {}", file.display()))?
                .len();

            let bar = ProgressBar::new(total);
            bar.set_style(ProgressStyle::with_template(
                "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%) {msg}",
            )?);
            bar.set_message(remote.clone());

            let (tx, mut rx) = mpsc::channel(64);
            let upload = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
                let storage = open_location(&location)?;
                let mut source = std::fs::File::open(&file)
                    .with_context(|| format!("failed to open {}", file.display()))?;
                let inner = storage.open(&remote, WriteMode::Truncate)?;
                let mut writer = Box::new(ProgressWriter::new(inner, total, Some(tx)));
                std::io::copy(&mut source, &mut writer)?;
                writer.finish()?;
                Ok(())
            });

            while let Some(sample) = rx.recv().await {
                bar.set_position(sample.completed);
            }
            upload.await??;
            bar.finish();
            println!("✅ Upload successful");
        }
        Commands::Get {
            location,
            remote,
            output,
        } => {
            let data: Bytes = blocking(move || Ok(open_location(&location)?.read(&remote)?)).await?;
            if let Some(parent) = output.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&output, &data).await?;
            println!("✅ Saved {} bytes to {output:?}", data.len());
        }
        Commands::Rm { location, path } => {
            blocking(move || Ok(open_location(&location)?.remove(&path)?)).await?;
        }
        Commands::Mkdir { location, path } => {
            blocking(move || Ok(open_location(&location)?.mkdir(&path)?)).await?;
        }
    }

    Ok(())
}
