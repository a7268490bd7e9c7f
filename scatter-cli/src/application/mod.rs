pub mod handlers;

use crate::presentation::cli::{Cli, Commands};
use scatter_core::error::Result;

/// Dispatch a parsed command; returns the process exit code on success.
pub fn run(cli: Cli) -> Result<i32> {
    let cfg = handlers::load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Backup { path } => handlers::handle_backup(&cfg, path),
        Commands::Restore { file_id, output } => handlers::handle_restore(&cfg, file_id, output),
        Commands::Status { file_id, json } => handlers::handle_status(&cfg, file_id, json),
        Commands::List { json } => handlers::handle_list(&cfg, json),
    }
}
