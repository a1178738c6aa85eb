use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gwho::cli::Cli;
use gwho::error::GwhoError;
use gwho::git::CancelToken;

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "gwho=debug" } else { "warn" }));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbose);

    let token = CancelToken::new();
    {
        let token = token.clone();
        let _ = ctrlc::set_handler(move || token.cancel());
    }

    match cli.execute(&token) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if matches!(err.downcast_ref::<GwhoError>(), Some(GwhoError::Cancelled)) {
                // SIGINT: conventional exit, no message.
                return ExitCode::from(130);
            }
            eprintln!("gwho: {err:#}");
            ExitCode::from(1)
        }
    }
}
