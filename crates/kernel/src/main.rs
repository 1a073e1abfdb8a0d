//! Intake
//!
//! Command-line front end for the ingestion kernel.

mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use intake_kernel::{Config, FileService};

/// Sandboxed upload ingestion and storage.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a single file.
    Upload {
        /// File to ingest.
        file: PathBuf,

        /// Destination folder under the storage root.
        #[arg(long, default_value = "")]
        folder: String,

        /// Declared filename (defaults to the file's own name).
        #[arg(long)]
        name: Option<String>,
    },

    /// Ingest several files into one folder, in order.
    Batch {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Destination folder under the storage root.
        #[arg(long, default_value = "")]
        folder: String,
    },

    /// Securely erase a stored file.
    Delete { path: String },

    /// Print a stored file's bytes, or write them to `--output`.
    Read {
        path: String,

        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print the public URL for a stored path.
    Url { path: String },

    /// Report whether a stored file exists.
    Exists { path: String },

    /// Print a stored file's size in bytes.
    Size { path: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    init_tracing();

    let args = Args::parse();

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        root = %config.uploads_dir.display(),
        max_upload_size = config.max_upload_size,
        workers = config.upload_workers,
        "Configuration loaded"
    );

    let service = FileService::new(&config).context("failed to open storage root")?;

    match args.command {
        Command::Upload { file, folder, name } => {
            cli::cmd_upload(&service, &file, &folder, name.as_deref()).await
        }
        Command::Batch { files, folder } => cli::cmd_batch(&service, &files, &folder).await,
        Command::Delete { path } => cli::cmd_delete(&service, &path).await,
        Command::Read { path, output } => cli::cmd_read(&service, &path, output.as_deref()).await,
        Command::Url { path } => {
            println!("{}", service.url_for(&path));
            Ok(())
        }
        Command::Exists { path } => {
            println!("{}", service.exists(&path).await);
            Ok(())
        }
        Command::Size { path } => {
            println!("{}", service.size_of(&path).await);
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
