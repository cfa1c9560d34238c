use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ocs_types::StorageMode;

#[derive(Parser)]
#[command(
    name = "ocs",
    about = "Off-chain storage gateway: store and fetch blobs and documents",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Gateway configuration file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Connection string for the `default` endpoint, overriding the config
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a file under a name
    Upload(UploadArgs),
    /// Fetch a stored object
    Download(DownloadArgs),
    /// Insert a JSON document verbatim
    Insert(InsertArgs),
    /// Show the stored name and length of an object
    Stat(StatArgs),
}

#[derive(Args)]
pub struct UploadArgs {
    #[arg(long)]
    pub namespace: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "inline-document-store")]
    pub mode: StorageMode,
    /// File to upload
    pub file: PathBuf,
}

#[derive(Args)]
pub struct DownloadArgs {
    #[arg(long)]
    pub namespace: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "inline-document-store")]
    pub mode: StorageMode,
    /// Write here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct InsertArgs {
    #[arg(long)]
    pub namespace: String,
    /// File holding one JSON object
    pub json_file: PathBuf,
}

#[derive(Args)]
pub struct StatArgs {
    #[arg(long)]
    pub namespace: String,
    #[arg(long)]
    pub name: String,
    #[arg(long, default_value = "inline-document-store")]
    pub mode: StorageMode,
}
