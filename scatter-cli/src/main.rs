mod application;
mod presentation;

use clap::Parser;
use scatter_core::ScatterError;
use tracing_subscriber::EnvFilter;

use presentation::cli::Cli;

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("SCATTER_LOG").unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("scatter=debug")
        } else {
            EnvFilter::new("scatter=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(err: &ScatterError) {
    eprintln!("error: {err}");
    if let ScatterError::ChunksFailed { failures, .. } = err {
        for f in failures {
            eprintln!("  {f}");
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match application::run(cli) {
        Ok(code) => code,
        Err(e) => {
            report(&e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}
