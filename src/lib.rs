//! CDP relay server.
//!
//! This library bridges controlling clients (test drivers, automation
//! libraries) and a browser tab that is remotely attached through a
//! bidirectional extension channel. It exposes a CDP-compatible
//! WebSocket endpoint to clients, forwards their commands to the
//! browser-side agent, correlates the asynchronous responses, and fans
//! events and log lines back out.
//!
//! # Architecture
//!
//! - **Clients** connect on per-connection paths (`/cdp/<token>`); their
//!   command ids are scoped to their own connection.
//! - **The agent** connects on `/extension`; exactly one agent is
//!   attached at a time, and a reconnect is a fresh attachment, never a
//!   resume.
//! - **Correlation** happens on relay-allocated wire ids, so concurrent
//!   clients using the same command id never collide.
//!
//! # Quick Start
//!
//! ```no_run
//! use cdp_relay::{RelayConfig, RelayServer, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = RelayServer::bind(RelayConfig::default()).await?;
//!
//!     println!("agent attaches at   {}", server.extension_url());
//!     println!("clients connect to  {}", server.cdp_url());
//!
//!     tokio::signal::ctrl_c().await?;
//!     server.shutdown();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | Relay configuration |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe id wrappers |
//! | [`logging`] | Diagnostic file sink |
//! | [`protocol`] | Wire message types and codec |
//! | [`relay`] | Channel, registry and server |

// ============================================================================
// Modules
// ============================================================================

/// Relay configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers for relay entities.
///
/// Newtype wrappers prevent mixing incompatible ids at compile time.
pub mod identifiers;

/// Diagnostic file log sink.
pub mod logging;

/// Wire message types and the relay codec.
pub mod protocol;

/// The relay transport layer.
pub mod relay;

// ============================================================================
// Re-exports
// ============================================================================

// Configuration
pub use config::RelayConfig;

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CommandId, ConnectionId, SessionId, WireId};

// Logging
pub use logging::FileLogSink;

// Protocol types
pub use protocol::{
    ClientCommand, CommandResponse, EventEnvelope, ExtensionMessage, ForwardCommand, LogLevel,
    LogLine,
};

// Relay types
pub use relay::{EndpointToken, ExtensionChannel, PendingCallRegistry, RelayServer, cdp_url};
