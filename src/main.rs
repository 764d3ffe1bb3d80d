//! feedgen CLI entry point
//!
//! Parses the command line, runs the command and prints failures with the
//! suggestions from [`user_friendly_error`].

use anyhow::Result;
use clap::Parser;
use feedgen::cli;
use feedgen::core::user_friendly_error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::Cli::parse();

    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    match cli.execute().await {
        Ok(()) => Ok(()),
        Err(e) => {
            user_friendly_error(e).display();
            std::process::exit(1);
        }
    }
}
