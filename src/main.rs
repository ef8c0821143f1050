//! CLI entry point for the download-manager tool.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use download_manager_core::file::normalize_url;
use download_manager_core::{
    DownloadFileStatus, DownloadManager, Headers, HttpBackend, LocalFileStore, ManagerConfig,
    SharedLifecycle, event_channel,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod progress;

use cli::Args;

/// Staging directory for in-flight bodies, relative to the output directory.
const STAGING_DIR: &str = ".download-manager";

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let urls = dedupe(read_urls(&args)?);
    if urls.is_empty() {
        info!("No input provided. Pipe URLs via stdin or pass as arguments.");
        info!("Example: echo 'https://example.com/file.zip' | download-manager -o downloads");
        return Ok(ExitCode::SUCCESS);
    }

    let config = resolve_config(&args)?;
    let output_dir = config
        .download_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let staging_dir = output_dir.join(STAGING_DIR);

    let (sink, events) = event_channel();
    let backend = HttpBackend::new(config.backend.clone(), &staging_dir, sink)
        .context("Failed to initialize HTTP backend")?;
    let manager = DownloadManager::builder(Arc::new(backend))
        .file_store(Arc::new(LocalFileStore::new()))
        .lifecycle(Arc::new(SharedLifecycle::default()))
        .config(config)
        .build(events)
        .await
        .context("Failed to build download manager")?;

    let headers: Headers = args.headers.iter().cloned().collect();
    let mut files = Vec::with_capacity(urls.len());
    for url in &urls {
        match manager.create_download_file(url, headers.clone()) {
            Ok(file) => files.push(file),
            Err(e) => warn!(url = %url, error = %e, "Skipped invalid URL"),
        }
    }

    let stop = CancellationToken::new();
    let use_spinner = !args.quiet && !args.json && io::stderr().is_terminal();
    let spinner = progress::spawn_progress_ui(
        use_spinner,
        Arc::clone(&manager),
        files.len(),
        stop.clone(),
    );

    for file in &files {
        manager.start(file, !args.no_cellular).await?;
    }
    manager.wait_idle().await;

    stop.cancel();
    if let Some(handle) = spinner {
        let _ = handle.await;
    }
    let _ = tokio::fs::remove_dir(&staging_dir).await;

    let mut completed = 0usize;
    let mut failed = urls.len() - files.len();
    for file in &files {
        let snapshot = file.snapshot();
        if args.json {
            println!("{}", serde_json::to_string(&snapshot)?);
        }
        if snapshot.status == DownloadFileStatus::Completed {
            completed += 1;
            info!(
                url = %snapshot.url,
                path = ?snapshot.destination_path,
                "Completed"
            );
        } else {
            failed += 1;
            warn!(
                url = %snapshot.url,
                status = %snapshot.status,
                details = snapshot.status_details.as_deref().unwrap_or(""),
                "Not completed"
            );
        }
    }

    info!(completed, failed, total = urls.len(), "Download complete");

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Reads URLs from positional args or, when stdin is piped, one per line.
fn read_urls(args: &Args) -> Result<Vec<String>> {
    if !args.urls.is_empty() {
        return Ok(args.urls.clone());
    }
    if io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read URLs from stdin")?;
    Ok(buffer
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect())
}

/// Drops URLs that normalize to one already seen, keeping the first
/// occurrence. Starting a URL twice would supersede the first request.
fn dedupe(urls: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    urls.into_iter()
        .filter(|url| seen.insert(normalize_url(url).unwrap_or_else(|_| url.clone())))
        .collect()
}

/// File config first, then CLI flags on top.
fn resolve_config(args: &Args) -> Result<ManagerConfig> {
    let mut config = ManagerConfig::default();
    if let Some(file_config) = app_config::load_file_config(args.config.as_deref())? {
        file_config.apply_to(&mut config);
    }

    if let Some(dir) = &args.output_dir {
        config.download_dir = Some(dir.clone());
    }
    if config.download_dir.is_none() {
        config.download_dir = Some(PathBuf::from("."));
    }
    if let Some(max) = args.max_connections_per_host {
        config.backend.max_connections_per_host = usize::from(max);
    }
    if args.no_cellular {
        config.backend.allows_cellular_access = false;
    }
    if args.avoid_discretionary {
        config.avoid_discretionary_in_background = true;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedupe_keeps_first_occurrence() {
        let urls = dedupe(vec![
            "http://x/a".to_string(),
            "http://x/b".to_string(),
            "http://x/a".to_string(),
        ]);
        assert_eq!(urls, vec!["http://x/a", "http://x/b"]);
    }

    #[test]
    fn test_dedupe_compares_normalized_urls() {
        let urls = dedupe(vec![
            "http://x/a b".to_string(),
            "http://x/a%20b".to_string(),
            " http://x/a b ".to_string(),
            "not a url".to_string(),
            "not a url".to_string(),
        ]);
        assert_eq!(urls, vec!["http://x/a b", "not a url"]);
    }

    #[test]
    fn test_resolve_config_flags_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "max_connections_per_host = 3\n").unwrap();

        let args = Args::try_parse_from([
            "download-manager",
            "--config",
            config_path.to_str().unwrap(),
            "--max-connections-per-host",
            "5",
            "--no-cellular",
            "-o",
            "/tmp/out",
        ])
        .unwrap();
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.backend.max_connections_per_host, 5);
        assert!(!config.backend.allows_cellular_access);
        assert_eq!(config.download_dir, Some(PathBuf::from("/tmp/out")));
    }
}
