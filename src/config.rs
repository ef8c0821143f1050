//! Manager and backend configuration.
//!
//! Both structs carry defaults matching the platform engines and are validated
//! once, when the manager is built.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of simultaneous connections to one remote host.
pub const DEFAULT_MAX_CONNECTIONS_PER_HOST: usize = 1;

/// Upper bound for `max_connections_per_host`.
pub const MAX_CONNECTIONS_PER_HOST_LIMIT: usize = 16;

/// Default interval between polling-watcher passes.
pub const DEFAULT_WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(1000);

const MIN_WATCHER_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MAX_WATCHER_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value} (expected {expected})")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// How the polling service shows its own notification for a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationVisibility {
    /// Shown while the transfer runs.
    #[default]
    Visible,
    /// Shown while running and after completion.
    VisibleNotifyCompleted,
    Hidden,
    /// Shown only after completion.
    VisibleNotifyOnlyCompletion,
}

impl NotificationVisibility {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::VisibleNotifyCompleted => "visible_notify_completed",
            Self::Hidden => "hidden",
            Self::VisibleNotifyOnlyCompletion => "visible_notify_only_completion",
        }
    }
}

impl fmt::Display for NotificationVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationVisibility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visible" => Ok(Self::Visible),
            "visible_notify_completed" => Ok(Self::VisibleNotifyCompleted),
            "hidden" => Ok(Self::Hidden),
            "visible_notify_only_completion" => Ok(Self::VisibleNotifyOnlyCompletion),
            _ => Err(format!("invalid notification visibility: {s}")),
        }
    }
}

/// Knobs passed through to the native backend unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub max_connections_per_host: usize,
    pub allows_cellular_access: bool,
    pub notification_visibility: NotificationVisibility,
    /// Whether polling-service transfers appear in the system downloads UI.
    pub visible_in_downloads_ui: bool,
    #[serde(with = "millis")]
    pub watcher_poll_interval: Duration,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            max_connections_per_host: DEFAULT_MAX_CONNECTIONS_PER_HOST,
            allows_cellular_access: true,
            notification_visibility: NotificationVisibility::default(),
            visible_in_downloads_ui: true,
            watcher_poll_interval: DEFAULT_WATCHER_POLL_INTERVAL,
            connect_timeout_secs: crate::backend::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: crate::backend::READ_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first out-of-range field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_CONNECTIONS_PER_HOST_LIMIT).contains(&self.max_connections_per_host) {
            return Err(ConfigError::InvalidValue {
                key: "max_connections_per_host",
                value: self.max_connections_per_host.to_string(),
                expected: "1..=16",
            });
        }
        if !(MIN_WATCHER_POLL_INTERVAL..=MAX_WATCHER_POLL_INTERVAL)
            .contains(&self.watcher_poll_interval)
        {
            return Err(ConfigError::InvalidValue {
                key: "watcher_poll_interval",
                value: format!("{}ms", self.watcher_poll_interval.as_millis()),
                expected: "50ms..=60s",
            });
        }
        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout",
                value: "0".to_string(),
                expected: "a positive number of seconds",
            });
        }
        Ok(())
    }
}

/// Manager-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Directory used for final placement when no destination hook is set.
    pub download_dir: Option<PathBuf>,
    /// Use the foreground session for hand-offs made while the app is backgrounded.
    pub avoid_discretionary_in_background: bool,
    pub backend: BackendConfig,
}

impl ManagerConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the backend section is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.backend.validate()
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend.max_connections_per_host, 1);
        assert_eq!(config.backend.watcher_poll_interval, Duration::from_secs(1));
        assert!(config.backend.allows_cellular_access);
        assert!(!config.avoid_discretionary_in_background);
    }

    #[test]
    fn test_rejects_zero_connections() {
        let config = BackendConfig {
            max_connections_per_host: 0,
            ..BackendConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_connections_per_host"));
    }

    #[test]
    fn test_rejects_too_many_connections() {
        let config = BackendConfig {
            max_connections_per_host: 17,
            ..BackendConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_tiny_poll_interval() {
        let config = BackendConfig {
            watcher_poll_interval: Duration::from_millis(10),
            ..BackendConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("10ms"), "got: {err}");
    }

    #[test]
    fn test_serde_uses_millis_for_interval() {
        let json = serde_json::to_value(BackendConfig::default()).unwrap();
        assert_eq!(json["watcher_poll_interval"], 1000);

        let parsed: BackendConfig =
            serde_json::from_str(r#"{"watcher_poll_interval": 250}"#).unwrap();
        assert_eq!(parsed.watcher_poll_interval, Duration::from_millis(250));
        assert_eq!(parsed.max_connections_per_host, 1);
    }

    #[test]
    fn test_notification_visibility_parse() {
        assert_eq!(
            "hidden".parse::<NotificationVisibility>().unwrap(),
            NotificationVisibility::Hidden
        );
        assert!("loud".parse::<NotificationVisibility>().is_err());
    }
}
