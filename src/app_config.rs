//! Application configuration loading for CLI defaults.
//!
//! The config file is a flat list of `key = value` lines; strings are
//! double-quoted and `#` starts a comment.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use download_manager_core::{ManagerConfig, NotificationVisibility};

/// File configuration for download-manager defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory for downloads.
    pub output_dir: Option<PathBuf>,
    pub max_connections_per_host: Option<usize>,
    pub allows_cellular_access: Option<bool>,
    pub avoid_discretionary_in_background: Option<bool>,
    pub notification_visibility: Option<NotificationVisibility>,
    pub visible_in_downloads_ui: Option<bool>,
    pub watcher_poll_interval_ms: Option<u64>,
    pub connect_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
}

impl FileConfig {
    /// Overlays the values present in the file onto `config`.
    pub fn apply_to(&self, config: &mut ManagerConfig) {
        if let Some(dir) = &self.output_dir {
            config.download_dir = Some(dir.clone());
        }
        if let Some(value) = self.avoid_discretionary_in_background {
            config.avoid_discretionary_in_background = value;
        }
        let backend = &mut config.backend;
        if let Some(value) = self.max_connections_per_host {
            backend.max_connections_per_host = value;
        }
        if let Some(value) = self.allows_cellular_access {
            backend.allows_cellular_access = value;
        }
        if let Some(value) = self.notification_visibility {
            backend.notification_visibility = value;
        }
        if let Some(value) = self.visible_in_downloads_ui {
            backend.visible_in_downloads_ui = value;
        }
        if let Some(value) = self.watcher_poll_interval_ms {
            backend.watcher_poll_interval = Duration::from_millis(value);
        }
        if let Some(value) = self.connect_timeout_secs {
            backend.connect_timeout_secs = value;
        }
        if let Some(value) = self.read_timeout_secs {
            backend.read_timeout_secs = value;
        }
    }
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/download-manager/config.toml`
/// 2. `$HOME/.config/download-manager/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("download-manager")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("download-manager")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config at `explicit`, or at the default path if present.
///
/// An explicit path must exist; a missing default file yields `None`.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let line_no = line_index + 1;

        match key {
            "output_dir" => {
                let parsed = parse_string_literal(value)
                    .with_context(|| format!("Invalid `output_dir` value on line {line_no}"))?;
                cfg.output_dir = Some(PathBuf::from(parsed));
            }
            "max_connections_per_host" => {
                let parsed = parse_integer_u64(value).with_context(|| {
                    format!("Invalid `max_connections_per_host` value on line {line_no}")
                })?;
                cfg.max_connections_per_host = Some(
                    usize::try_from(parsed)
                        .map_err(|_| anyhow::anyhow!("Integer value out of range for usize"))?,
                );
            }
            "allows_cellular_access" => {
                cfg.allows_cellular_access = Some(parse_boolean(value).with_context(|| {
                    format!("Invalid `allows_cellular_access` value on line {line_no}")
                })?);
            }
            "avoid_discretionary_in_background" => {
                cfg.avoid_discretionary_in_background =
                    Some(parse_boolean(value).with_context(|| {
                        format!(
                            "Invalid `avoid_discretionary_in_background` value on line {line_no}"
                        )
                    })?);
            }
            "notification_visibility" => {
                let parsed = parse_string_literal(value).with_context(|| {
                    format!("Invalid `notification_visibility` value on line {line_no}")
                })?;
                let visibility = parsed
                    .parse::<NotificationVisibility>()
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| {
                        format!("Invalid `notification_visibility` value on line {line_no}")
                    })?;
                cfg.notification_visibility = Some(visibility);
            }
            "visible_in_downloads_ui" => {
                cfg.visible_in_downloads_ui = Some(parse_boolean(value).with_context(|| {
                    format!("Invalid `visible_in_downloads_ui` value on line {line_no}")
                })?);
            }
            "watcher_poll_interval_ms" => {
                cfg.watcher_poll_interval_ms = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `watcher_poll_interval_ms` value on line {line_no}")
                })?);
            }
            "connect_timeout_secs" => {
                cfg.connect_timeout_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `connect_timeout_secs` value on line {line_no}")
                })?);
            }
            "read_timeout_secs" => {
                cfg.read_timeout_secs = Some(parse_integer_u64(value).with_context(|| {
                    format!("Invalid `read_timeout_secs` value on line {line_no}")
                })?);
            }
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => bail!("Expected 'true' or 'false'"),
    }
}
