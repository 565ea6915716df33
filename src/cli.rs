use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::orchestrator::DEFAULT_PIPELINE_TIMEOUT_SECS;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the push-subscription HTTP server.
    Serve(ServeArgs),
    /// Process one stored PDF directly, without a push envelope.
    Process(ProcessArgs),
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "0.0.0.0:8080")]
    pub addr: SocketAddr,

    /// Scratch directory for downloaded PDFs and pipeline output.
    #[arg(long, default_value = "work")]
    pub work_dir: PathBuf,

    /// Publish artifacts to this bucket instead of the event's bucket.
    #[arg(long)]
    pub output_bucket: Option<String>,

    /// Upper bound for one OCR pipeline run.
    #[arg(long, default_value_t = DEFAULT_PIPELINE_TIMEOUT_SECS)]
    pub pipeline_timeout_secs: u64,
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Bucket holding the input PDF.
    #[arg(long)]
    pub bucket: String,

    /// Object path: `{workspace_id}/{project_id}/.../{file}.pdf`.
    #[arg(long)]
    pub object: String,

    /// Restrict classification to these taxonomy ids.
    #[arg(long, value_delimiter = ',')]
    pub risk_type_ids: Vec<i64>,

    #[arg(long, default_value = "work")]
    pub work_dir: PathBuf,

    /// Publish artifacts to this bucket instead of `--bucket`.
    #[arg(long)]
    pub output_bucket: Option<String>,

    #[arg(long, default_value_t = DEFAULT_PIPELINE_TIMEOUT_SECS)]
    pub pipeline_timeout_secs: u64,
}
