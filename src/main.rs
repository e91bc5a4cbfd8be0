//! wordserve: a word-list chunk server with pluggable request scheduling.
//!
//! Subcommands:
//! - `server`: serve the word list over TCP with the configured
//!   scheduling discipline (global FCFS or per-connection round-robin)
//! - `client`: download the word list in bounded chunks, optionally
//!   pipelining several requests at once, and report the elapsed time

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wordserve::config::{CliArgs, CliCommand, ClientConfig, ServerConfig};
use wordserve::{client, server};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = CliArgs::parse();

    match cli.command {
        CliCommand::Server(args) => {
            let config = ServerConfig::resolve(args)?;
            init_tracing(&config.log_level);

            info!(
                listen = %config.listen,
                words = %config.words.display(),
                mode = ?config.mode,
                "Starting wordserve server"
            );

            server::run(config)?;
            Ok(())
        }
        CliCommand::Client(args) => {
            let config = ClientConfig::resolve(args)?;
            init_tracing(&config.log_level);

            match client::run(&config) {
                Ok(download) => {
                    // The one line of timing telemetry callers scrape
                    println!("ELAPSED_MS:{:.3}", download.elapsed_ms());
                    if !config.quiet {
                        for (word, count) in download.tally() {
                            println!("{word}, {count}");
                        }
                    }
                    Ok(())
                }
                Err(e) => {
                    eprintln!("wordserve client: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Initialize logging; logs go to stderr so stdout stays machine-readable.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
