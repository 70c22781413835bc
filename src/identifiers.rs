//! Type-safe identifiers for relay entities.
//!
//! Newtype wrappers prevent mixing incompatible ids at compile time.
//! Two integer id spaces exist and must never be confused:
//!
//! - [`CommandId`] — chosen by a client, unique only within that client's
//!   connection while the call is pending.
//! - [`WireId`] — allocated by the relay for the extension leg, unique
//!   process-wide, so commands from different clients never collide at
//!   the agent.
//!
//! | Type | Scope | Source |
//! |------|-------|--------|
//! | [`CommandId`] | per client connection | client wire frame |
//! | [`WireId`] | process | relay, monotonic |
//! | [`ConnectionId`] | process | relay, monotonic |
//! | [`SessionId`] | browser | agent (CDP session string) |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

// ============================================================================
// CommandId
// ============================================================================

/// Client-chosen command id, scoped to one client connection.
///
/// Reusing a value while its call is still pending on the same
/// connection is a protocol violation; the same value on two different
/// connections is fine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(i64);

impl CommandId {
    /// Creates a command id from the raw wire integer.
    #[inline]
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw wire integer.
    #[inline]
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// WireId
// ============================================================================

/// Relay-allocated id used on the extension leg.
///
/// Monotonic per process; never reused while any call is pending, which
/// keeps response correlation unambiguous even when several clients use
/// the same [`CommandId`] concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WireId(u64);

static NEXT_WIRE_ID: AtomicU64 = AtomicU64::new(1);

impl WireId {
    /// Allocates the next wire id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_WIRE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates a wire id from a raw value.
    ///
    /// Intended for parsing agent responses, not for allocation.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ConnectionId
// ============================================================================

/// Identifies one client WebSocket connection for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocates the next connection id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

// ============================================================================
// SessionId
// ============================================================================

/// CDP session identifier: a logical browser target/tab.
///
/// Distinct from a client's WebSocket connection; several connections
/// may be associated with the same session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Creates a session id from the wire string.
    #[inline]
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the wire string.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_id_roundtrip() {
        let id = CommandId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(id.to_string(), "42");

        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, "42");
        let back: CommandId = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, id);
    }

    #[test]
    fn test_wire_id_monotonic() {
        let a = WireId::next();
        let b = WireId::next();
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_connection_id_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("conn-"));
    }

    #[test]
    fn test_session_id_transparent_serde() {
        let session = SessionId::from("ABC123");
        let json = serde_json::to_string(&session).expect("serialize");
        assert_eq!(json, r#""ABC123""#);
        let back: SessionId = serde_json::from_str(&json).expect("parse");
        assert_eq!(back, session);
    }
}
