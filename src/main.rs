mod app;
mod cli;
mod input;

use std::process::ExitCode;

use app::App;
use clap::Parser;
use cli::Cli;
use colored::Colorize;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let app = App::new(cli);
    match app.run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{} {e}", "[!]".bold().red());
            ExitCode::from(e.exit_code())
        }
    }
}
