//! Gate for tests that need a localhost wiremock server.
//!
//! Sandboxes without loopback networking cannot bind a socket. Such tests are
//! skipped there, unless `DOWNLOAD_MANAGER_REQUIRE_SOCKET_TESTS` is truthy, in
//! which case they fail instead.

use std::net::TcpListener;
use std::panic::Location;

use wiremock::MockServer;

const REQUIRE_ENV: &str = "DOWNLOAD_MANAGER_REQUIRE_SOCKET_TESTS";

fn sockets_required() -> bool {
    std::env::var(REQUIRE_ENV)
        .is_ok_and(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

fn loopback_available() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// Starts a mock server, or returns `None` when the test should be skipped.
#[track_caller]
pub fn start_mock_server_or_skip() -> impl Future<Output = Option<MockServer>> {
    let caller = Location::caller();
    async move {
        if loopback_available() {
            return Some(MockServer::start().await);
        }
        let message = format!(
            "{}:{}: cannot bind 127.0.0.1, wiremock server unavailable",
            caller.file(),
            caller.line()
        );
        assert!(!sockets_required(), "{message} ({REQUIRE_ENV} is set)");
        eprintln!("{message}; skipping (set {REQUIRE_ENV}=1 to fail instead)");
        None
    }
}
