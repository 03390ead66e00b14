//! Configuration sourced from the CLI.

use std::path::PathBuf;

use clap::Parser;

/// levee: a configurable, policy-driven HTTP rate-limiting proxy.
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Cli {
    /// Path to the configuration document.
    pub config: PathBuf,

    /// Parse the configuration document and exit without starting the proxy.
    #[arg(long)]
    pub validate: bool,
}
