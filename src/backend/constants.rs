//! Constants for the backends (timeouts, staging).

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Suffix of in-flight staging files.
pub(crate) const PARTIAL_SUFFIX: &str = "part";
