//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Queue downloads and watch them finish.
///
/// URLs are taken from the arguments, or one per line from stdin. Starting the
/// same URL twice restarts it; files already present in the output directory
/// are reported as completed without downloading.
#[derive(Parser, Debug)]
#[command(name = "download-manager")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    pub urls: Vec<String>,

    /// Directory downloads are placed in
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum simultaneous connections per remote host (1-16)
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=16))]
    pub max_connections_per_host: Option<u8>,

    /// Forbid transfers over metered (cellular) networks
    #[arg(long)]
    pub no_cellular: bool,

    /// Use the foreground session for hand-offs made while backgrounded
    #[arg(long)]
    pub avoid_discretionary: bool,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Config file (default: $XDG_CONFIG_HOME/download-manager/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Print the final state of every file as JSON lines
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("invalid header '{raw}': expected `Name: value`"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("invalid header '{raw}': empty name"));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
