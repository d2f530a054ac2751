mod cli;
mod client;

use clap::Parser;
use cli::{Cli, Command};
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries clipboard payloads; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Command::Service => {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    eprintln!("clipbridge service: failed to start runtime: {e}");
                    std::process::exit(1);
                }
            };
            if let Err(e) = runtime.block_on(clipbridge::service::run(cli.socket.clone())) {
                tracing::error!(error = %e, "clipboard service failed");
                eprintln!("clipbridge service: {e}");
                std::process::exit(1);
            }
        }
        Command::Clipboard(command) => {
            if let Err(e) = client::run(&cli, command.clone()) {
                tracing::error!(error = %e, "clipboard command failed");
                eprintln!("clipbridge: {e}");
                std::process::exit(1);
            }
        }
    }
}
