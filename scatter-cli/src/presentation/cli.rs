use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "scatter: chunked, encrypted, multi-backend file backup", long_about = None)]
pub struct Cli {
    /// JSON config file; built-in defaults when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging (overridden by SCATTER_LOG)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Split, encrypt, and upload a file across the configured backends
    Backup { path: PathBuf },

    /// Fetch, verify, and reassemble a backed-up file
    Restore { file_id: String, output: PathBuf },

    /// Show one file record and its chunk table
    Status {
        file_id: String,
        #[arg(long)]
        json: bool,
    },

    /// List every file record
    List {
        #[arg(long)]
        json: bool,
    },
}
