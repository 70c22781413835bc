//! Per-connection endpoint tokens.
//!
//! Every client connects on its own relay path so that two clients'
//! WebSocket handshakes can never be misrouted into each other. Tokens
//! combine a random base-36 component with the current epoch millis:
//! `ws://<host>:<port>/cdp/<random>_<epoch-ms>`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use uuid::Uuid;

// ============================================================================
// Constants
// ============================================================================

/// Path prefix for client endpoints.
pub const CDP_PATH_PREFIX: &str = "/cdp/";

/// Handshake path for the browser agent.
pub const EXTENSION_PATH: &str = "/extension";

/// Length of the random token component.
const RANDOM_LEN: usize = 13;

// ============================================================================
// EndpointToken
// ============================================================================

/// A collision-resistant per-connection endpoint identifier.
///
/// Pure function of the clock plus an entropy source; no persisted
/// state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointToken(String);

impl EndpointToken {
    /// Allocates a fresh token: `<base36-random>_<epoch-ms>`.
    #[must_use]
    pub fn allocate() -> Self {
        let entropy = Uuid::new_v4().as_u128();
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Self(format!("{}_{}", base36(entropy, RANDOM_LEN), epoch_ms))
    }

    /// Extracts the token from a client handshake path.
    ///
    /// Returns `None` for paths outside the `/cdp/` namespace or with an
    /// empty token.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        let token = path.strip_prefix(CDP_PATH_PREFIX)?;
        let token = token.split('?').next().unwrap_or(token);
        if token.is_empty() {
            return None;
        }
        Some(Self(token.to_string()))
    }

    /// Returns the token string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// URL construction
// ============================================================================

/// Builds a full client endpoint URL with a freshly allocated token.
///
/// Format: `ws://<host>:<port>/cdp/<random>_<epoch-ms>`.
#[must_use]
pub fn cdp_url(host: &str, port: u16) -> String {
    format!("ws://{host}:{port}{CDP_PATH_PREFIX}{}", EndpointToken::allocate())
}

/// Encodes the low bits of `value` as `len` base-36 digits.
fn base36(mut value: u128, len: usize) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    let mut out = vec![b'0'; len];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    // Safe: every byte comes from DIGITS.
    String::from_utf8(out).expect("base36 digits are ASCII")
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_format() {
        let token = EndpointToken::allocate();
        let (random, epoch) = token.as_str().split_once('_').expect("separator");

        assert_eq!(random.len(), RANDOM_LEN);
        assert!(random.chars().all(|c| c.is_ascii_alphanumeric()));
        assert!(epoch.parse::<u128>().expect("epoch millis") > 0);
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = EndpointToken::allocate();
        let b = EndpointToken::allocate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_path() {
        let token = EndpointToken::from_path("/cdp/abc123_1700000000000").expect("token");
        assert_eq!(token.as_str(), "abc123_1700000000000");

        assert!(EndpointToken::from_path("/cdp/").is_none());
        assert!(EndpointToken::from_path("/extension").is_none());
        assert!(EndpointToken::from_path("/other/abc").is_none());
    }

    #[test]
    fn test_from_path_strips_query() {
        let token = EndpointToken::from_path("/cdp/abc?debug=1").expect("token");
        assert_eq!(token.as_str(), "abc");
    }

    #[test]
    fn test_cdp_url_format() {
        let url = cdp_url("127.0.0.1", 19988);
        assert!(url.starts_with("ws://127.0.0.1:19988/cdp/"));
        assert!(url.contains('_'));
    }

    #[test]
    fn test_base36_known_values() {
        assert_eq!(base36(0, 3), "000");
        assert_eq!(base36(35, 2), "0z");
        assert_eq!(base36(36, 2), "10");
    }
}
