//! Relay server configuration.
//!
//! Everything that used to be a process-wide singleton in ad-hoc relay
//! setups (one port, one log file path) is explicit configuration passed
//! to [`RelayServer::bind`](crate::relay::RelayServer::bind).

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default listen port for the relay endpoint.
pub const DEFAULT_PORT: u16 = 19988;

/// Default bind address (localhost only).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default deadline for a pending call (30s).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// RelayConfig
// ============================================================================

/// Configuration for a [`RelayServer`](crate::relay::RelayServer).
///
/// # Example
///
/// ```ignore
/// let config = RelayConfig::default()
///     .with_port(0) // random port
///     .with_default_timeout(Duration::from_secs(10));
/// let server = RelayServer::bind(config).await?;
/// ```
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Bind address for the WebSocket listener.
    pub host: IpAddr,

    /// Listen port (0 for a random available port).
    pub port: u16,

    /// Diagnostic log file path; `None` disables the file sink.
    pub log_file_path: Option<PathBuf>,

    /// Deadline applied to every pending call.
    pub default_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            log_file_path: None,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RelayConfig {
    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the listen port (0 for random).
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables the diagnostic file sink at `path`.
    #[inline]
    #[must_use]
    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file_path = Some(path.into());
        self
    }

    /// Sets the pending-call deadline.
    #[inline]
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
