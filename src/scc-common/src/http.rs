//! HTTP client factory for all SCC network access.
//!
//! Every client carries the same User-Agent and conservative timeouts; DNS
//! re-resolution is allowed by bounding the connection pool idle time.

use std::time::Duration;

use reqwest::Client;

/// User-Agent string for all HTTP requests.
pub const USER_AGENT: &str = concat!("scc/", env!("CARGO_PKG_VERSION"));

/// Default timeout for config and manifest fetches.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Extended timeout for artifact downloads (tarballs, plugin archives).
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Connection pool idle timeout so DNS changes are picked up.
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for config and manifest fetches (30s timeout).
pub fn create_default_client() -> Result<Client, String> {
    create_client_with_timeout(DEFAULT_TIMEOUT)
}

/// Client for artifact downloads (120s timeout).
pub fn create_download_client() -> Result<Client, String> {
    create_client_with_timeout(DOWNLOAD_TIMEOUT)
}

/// Client with a custom timeout.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client, String> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}
