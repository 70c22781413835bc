//! Error types for the CDP relay.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use cdp_relay::{Result, Error};
//!
//! fn example(channel: &ExtensionChannel, frame: String) -> Result<()> {
//!     channel.send(frame)?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Codec | [`Error::MalformedMessage`] |
//! | Registry | [`Error::DuplicateId`], [`Error::RequestTimeout`] |
//! | Channel | [`Error::ExtensionNotConnected`], [`Error::ChannelClosed`] |
//! | Server | [`Error::Connection`], [`Error::ConnectionTimeout`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{CommandId, ConnectionId};

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Per-command
/// failures are scoped to the originating client connection and never
/// tear down the server process.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Codec Errors
    // ========================================================================
    /// Frame could not be classified as command, response, event or log.
    ///
    /// The frame is dropped and logged; the connection stays alive.
    #[error("Malformed message: {reason}")]
    MalformedMessage {
        /// Why classification failed.
        reason: String,
    },

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// A command id was reused while still pending on the same connection.
    ///
    /// The duplicate registration is rejected; the original pending call
    /// is left intact. Signals a client bug.
    #[error("Duplicate command id {id} on connection {connection}")]
    DuplicateId {
        /// Connection that reused the id.
        connection: ConnectionId,
        /// The reused command id.
        id: CommandId,
    },

    /// A pending call exceeded its deadline.
    ///
    /// Only that call is rejected; other pending calls are unaffected.
    #[error("Command {id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The client-scoped command id that timed out.
        id: CommandId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Channel Errors
    // ========================================================================
    /// No browser agent is attached to the extension channel.
    ///
    /// The triggering command fails immediately; nothing is buffered.
    #[error("ExtensionNotConnected")]
    ExtensionNotConnected,

    /// The browser agent disconnected mid-flight.
    ///
    /// Cancels every pending call on the channel with this reason.
    #[error("ChannelClosed")]
    ChannelClosed,

    // ========================================================================
    // Server Errors
    // ========================================================================
    /// WebSocket handshake or transport setup failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Timed out waiting for a peer to connect.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a malformed message error.
    #[inline]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Creates a duplicate id error.
    #[inline]
    pub fn duplicate_id(connection: ConnectionId, id: CommandId) -> Self {
        Self::DuplicateId { connection, id }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(id: CommandId, timeout_ms: u64) -> Self {
        Self::RequestTimeout { id, timeout_ms }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::RequestTimeout { .. } | Self::ConnectionTimeout { .. }
        )
    }

    /// Returns `true` if this is a channel-level error.
    ///
    /// Channel-level errors cascade to pending calls, never to
    /// established client connections.
    #[inline]
    #[must_use]
    pub fn is_channel_error(&self) -> bool {
        matches!(self, Self::ExtensionNotConnected | Self::ChannelClosed)
    }

    /// Returns the wire error string carried by the error response the
    /// client receives for this failure.
    #[inline]
    #[must_use]
    pub fn wire_reason(&self) -> String {
        match self {
            Self::ExtensionNotConnected => "ExtensionNotConnected".to_string(),
            Self::ChannelClosed => "ChannelClosed".to_string(),
            Self::RequestTimeout { timeout_ms, .. } => {
                format!("Timeout: no response within {timeout_ms}ms")
            }
            Self::DuplicateId { id, .. } => format!("DuplicateId: id {id} already pending"),
            other => other.to_string(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
