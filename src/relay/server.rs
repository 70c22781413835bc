//! The relay server: client-facing WebSocket endpoint.
//!
//! One listener serves both sides of the bridge, routed by handshake
//! path:
//!
//! ```text
//! ┌──────────────┐                      ┌──────────────┐
//! │ Client A     │── ws /cdp/<token> ──►│              │
//! ├──────────────┤                      │  RelayServer │── ws /extension ──► Agent
//! │ Client B     │── ws /cdp/<token> ──►│              │
//! └──────────────┘                      └──────────────┘
//! ```
//!
//! Commands from clients are re-keyed onto relay-allocated wire ids,
//! forwarded over the extension channel, and their responses relayed
//! back to the originating connection only. Events fan out to the
//! connections associated with their session, or to everyone when they
//! carry no session. All mutation of the shared channel happens on the
//! send path or the single mailbox consumer loop, so ordering discipline
//! substitutes for locking.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response as HandshakeResponse,
};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::identifiers::{CommandId, ConnectionId, SessionId};
use crate::logging::FileLogSink;
use crate::protocol::{
    ClientCommand, CommandResponse, EventEnvelope, ExtensionMessage, ForwardCommand, LogLevel,
    LogLine,
};
use crate::relay::channel::{ChannelMessage, ExtensionChannel};
use crate::relay::endpoint::{self, EXTENSION_PATH, EndpointToken};
use crate::relay::pending::{CallKey, PendingCallRegistry};

// ============================================================================
// Constants
// ============================================================================

/// Poll interval for the accept loop's shutdown check.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between pending-call expiry sweeps.
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

// ============================================================================
// Routing
// ============================================================================

/// Where a handshake path leads.
enum Route {
    /// The browser agent attaching on [`EXTENSION_PATH`].
    Extension,
    /// A controlling client on `/cdp/<token>`.
    Client(EndpointToken),
}

// ============================================================================
// ClientRegistry
// ============================================================================

/// One connected client.
struct ClientHandle {
    /// Frames queued for this client's writer task.
    sender: mpsc::UnboundedSender<String>,
    /// Sessions this connection is associated with.
    sessions: FxHashSet<SessionId>,
}

/// Connected clients, shared between the accept path and the fanout
/// path.
#[derive(Default)]
struct ClientRegistry {
    inner: RwLock<FxHashMap<ConnectionId, ClientHandle>>,
}

impl ClientRegistry {
    fn insert(&self, connection: ConnectionId, handle: ClientHandle) {
        self.inner.write().insert(connection, handle);
    }

    fn remove(&self, connection: ConnectionId) -> Option<ClientHandle> {
        self.inner.write().remove(&connection)
    }

    fn count(&self) -> usize {
        self.inner.read().len()
    }

    /// Queues a frame for one client; dropped silently if the client is
    /// gone.
    fn send_to(&self, connection: ConnectionId, frame: String) {
        let clients = self.inner.read();
        if let Some(handle) = clients.get(&connection) {
            let _ = handle.sender.send(frame);
        }
    }

    /// Marks `connection` as associated with `session`.
    fn associate(&self, connection: ConnectionId, session: SessionId) {
        let mut clients = self.inner.write();
        if let Some(handle) = clients.get_mut(&connection)
            && handle.sessions.insert(session.clone())
        {
            debug!(%connection, %session, "Connection associated with session");
        }
    }

    /// Delivers an event frame: session-scoped or broadcast.
    ///
    /// Returns the number of clients the frame was queued for.
    fn deliver_event(&self, session: Option<&SessionId>, frame: &str) -> usize {
        let clients = self.inner.read();
        let mut delivered = 0;

        for handle in clients.values() {
            let in_scope = match session {
                Some(session) => handle.sessions.contains(session),
                None => true,
            };
            if in_scope {
                let _ = handle.sender.send(frame.to_string());
                delivered += 1;
            }
        }
        delivered
    }

    fn clear(&self) {
        self.inner.write().clear();
    }
}

// ============================================================================
// RelayServer
// ============================================================================

/// A running relay server.
///
/// # Example
///
/// ```ignore
/// let server = RelayServer::bind(RelayConfig::default().with_port(0)).await?;
/// println!("clients connect to {}", server.cdp_url());
/// println!("agent connects to {}", server.extension_url());
/// ```
pub struct RelayServer {
    config: RelayConfig,
    port: u16,
    channel: Arc<ExtensionChannel>,
    registry: Arc<PendingCallRegistry>,
    clients: Arc<ClientRegistry>,
    sink: Option<Arc<FileLogSink>>,
    shutdown: AtomicBool,
}

// ============================================================================
// RelayServer - Constructor
// ============================================================================

impl RelayServer {
    /// Binds the listener and starts the relay's background tasks:
    /// accept loop, extension mailbox consumer, and expiry sweeper.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if binding or log-sink creation fails
    pub async fn bind(config: RelayConfig) -> Result<Arc<Self>> {
        let sink = match &config.log_file_path {
            Some(path) => Some(Arc::new(FileLogSink::create(path)?)),
            None => None,
        };

        let addr = SocketAddr::new(config.host, config.port);
        let listener = TcpListener::bind(addr).await?;
        let port = listener.local_addr()?.port();

        let (channel, mailbox) = ExtensionChannel::new();

        let server = Arc::new(Self {
            config,
            port,
            channel,
            registry: Arc::new(PendingCallRegistry::new()),
            clients: Arc::new(ClientRegistry::default()),
            sink,
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));
        tokio::spawn(Arc::clone(&server).extension_loop(mailbox));
        tokio::spawn(Arc::clone(&server).expiry_loop());

        info!(port, "Relay server started");
        server.sink_line(&format!("relay server listening on port {port}"));

        Ok(server)
    }
}

// ============================================================================
// RelayServer - Public API
// ============================================================================

impl RelayServer {
    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns a fresh client endpoint URL.
    ///
    /// Each call allocates a new token, so every logical client gets its
    /// own path.
    #[must_use]
    pub fn cdp_url(&self) -> String {
        endpoint::cdp_url(&self.config.host.to_string(), self.port)
    }

    /// Returns the agent attach URL.
    #[must_use]
    pub fn extension_url(&self) -> String {
        format!("ws://{}:{}{EXTENSION_PATH}", self.config.host, self.port)
    }

    /// Returns `true` if a browser agent is currently attached.
    #[inline]
    #[must_use]
    pub fn is_agent_attached(&self) -> bool {
        self.channel.is_attached()
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.count()
    }

    /// Returns the number of in-flight commands.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.registry.pending_count()
    }

    /// Stops the server: detaches the agent, cancels every pending call,
    /// and disconnects all clients.
    pub fn shutdown(&self) {
        info!("Relay server shutting down");
        self.shutdown.store(true, Ordering::SeqCst);
        self.channel.shutdown();
        self.registry.cancel_all();
        self.clients.clear();
        self.sink_line("relay server shut down");
    }
}

// ============================================================================
// RelayServer - Accept Loop
// ============================================================================

impl RelayServer {
    /// Accepts TCP connections until shutdown.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Accept failed");
                }
                Err(_) => {
                    // Timeout, re-check shutdown flag.
                    continue;
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one TCP connection and routes it by handshake path.
    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
    ) -> Result<()> {
        let mut route: Option<Route> = None;

        let callback = |request: &Request, response: HandshakeResponse| {
            let path = request.uri().path();
            if path == EXTENSION_PATH {
                route = Some(Route::Extension);
                Ok(response)
            } else if let Some(token) = EndpointToken::from_path(path) {
                route = Some(Route::Client(token));
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(Some("unknown relay path".to_string()));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        match route {
            Some(Route::Extension) => {
                let generation = self.channel.attach(ws_stream);
                info!(?addr, generation, "Agent attached");
                self.sink_line(&format!("agent attached (generation {generation})"));
                Ok(())
            }
            Some(Route::Client(token)) => {
                self.serve_client(ws_stream, token, addr).await;
                Ok(())
            }
            None => Err(Error::connection("handshake completed without a route")),
        }
    }
}

// ============================================================================
// RelayServer - Client Connections
// ============================================================================

impl RelayServer {
    /// Runs one client connection to completion.
    async fn serve_client(
        self: &Arc<Self>,
        ws_stream: tokio_tungstenite::WebSocketStream<TcpStream>,
        token: EndpointToken,
        addr: SocketAddr,
    ) {
        let connection = ConnectionId::next();
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

        self.clients.insert(
            connection,
            ClientHandle {
                sender: frame_tx,
                sessions: FxHashSet::default(),
            },
        );
        info!(%connection, %token, ?addr, "Client connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Writer task: the single place this socket is written, so
        // responses and event fanout stay ordered per connection.
        let writer = tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                if ws_write.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_write.close().await;
        });

        while let Some(message) = ws_read.next().await {
            match message {
                Ok(Message::Text(text)) => self.handle_client_frame(connection, &text),
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ignore Binary, Ping, Pong
                Err(e) => {
                    debug!(%connection, error = %e, "Client socket error");
                    break;
                }
            }
        }

        // Disconnect: this connection's pending calls are discarded; no
        // abort is sent to the agent, and other connections are
        // untouched. Dropping the handle's sender ends the writer task.
        let handle = self.clients.remove(connection);
        let discarded = self.registry.cancel_connection(connection);
        drop(handle);
        let _ = writer.await;
        info!(%connection, %token, discarded, "Client disconnected");
    }

    /// Processes one frame from a client.
    fn handle_client_frame(self: &Arc<Self>, connection: ConnectionId, text: &str) {
        let command = match ClientCommand::parse(text) {
            Ok(command) => command,
            Err(e) => {
                warn!(%connection, error = %e, frame = %text, "Malformed client frame dropped");
                self.sink_line(&format!("malformed frame from {connection}: {e}"));
                return;
            }
        };

        let Some(generation) = self.channel.attached_generation() else {
            // Fail immediately rather than buffering.
            self.respond_error(connection, command.id, &Error::ExtensionNotConnected);
            return;
        };

        let key = CallKey {
            connection,
            id: command.id,
        };
        let (wire_id, receiver) =
            match self
                .registry
                .register(key, generation, self.config.default_timeout)
            {
                Ok(registered) => registered,
                Err(e) => {
                    warn!(%connection, id = %command.id, error = %e, "Command rejected");
                    self.respond_error(connection, command.id, &e);
                    return;
                }
            };

        if let Some(session) = &command.session_id {
            self.clients.associate(connection, session.clone());
        }

        let forward = ForwardCommand::new(
            wire_id,
            command.method.clone(),
            command.session_id.clone(),
            command.params.clone(),
        );
        let frame = match forward.serialize() {
            Ok(frame) => frame,
            Err(e) => {
                self.registry.remove(wire_id);
                self.respond_error(connection, command.id, &e);
                return;
            }
        };

        if let Err(e) = self.channel.send(generation, frame) {
            self.registry.remove(wire_id);
            self.respond_error(connection, command.id, &e);
            return;
        }

        debug!(%connection, id = %command.id, %wire_id, method = %command.method, "Command forwarded");

        // Await the resolution and relay it to the originating
        // connection only.
        let server = Arc::clone(self);
        tokio::spawn(async move {
            match receiver.await {
                Ok(Ok(response)) => {
                    server.note_session_from_response(connection, &response);
                    match response.serialize() {
                        Ok(frame) => server.clients.send_to(connection, frame),
                        Err(e) => error!(%connection, error = %e, "Failed to serialize response"),
                    }
                }
                Ok(Err(e)) => {
                    server.respond_error(connection, key.id, &e);
                }
                Err(_) => {
                    // Entry discarded without resolution: the client is
                    // gone, no one is listening.
                }
            }
        });
    }

    /// Sends an error-carrying response frame to one client.
    fn respond_error(&self, connection: ConnectionId, id: CommandId, error: &Error) {
        let response = CommandResponse::failure(id, error.wire_reason());
        match response.serialize() {
            Ok(frame) => self.clients.send_to(connection, frame),
            Err(e) => error!(%connection, error = %e, "Failed to serialize error response"),
        }
    }

    /// Associates a connection with the session named in a successful
    /// response, if any.
    ///
    /// Covers `Target.attachToTarget`-style results, where the session
    /// id first appears in the response rather than in a command.
    fn note_session_from_response(&self, connection: ConnectionId, response: &CommandResponse) {
        if let Some(session) = response
            .result
            .as_ref()
            .and_then(|result| result.get("sessionId"))
            .and_then(|value| value.as_str())
        {
            self.clients.associate(connection, SessionId::from(session));
        }
    }
}

// ============================================================================
// RelayServer - Extension Consumer Loop
// ============================================================================

impl RelayServer {
    /// Single consumer of the extension channel mailbox.
    ///
    /// Routing: responses to the registry, events to fanout, logs to the
    /// sink. Channel closure cancels that generation's pending calls;
    /// established client connections stay open.
    async fn extension_loop(self: Arc<Self>, mut mailbox: mpsc::UnboundedReceiver<ChannelMessage>) {
        while let Some(message) = mailbox.recv().await {
            match message {
                ChannelMessage::Frame(ExtensionMessage::Response { id, result, error }) => {
                    self.registry.resolve(id, result, error);
                }

                ChannelMessage::Frame(ExtensionMessage::Event(event)) => {
                    self.fanout_event(&event);
                }

                ChannelMessage::Frame(ExtensionMessage::Log(line)) => {
                    self.forward_log(&line);
                }

                ChannelMessage::Closed { generation } => {
                    let cancelled = self.registry.cancel_generation(generation);
                    info!(generation, cancelled, "Agent detached");
                    self.sink_line(&format!(
                        "agent detached (generation {generation}), cancelled {cancelled} pending calls"
                    ));
                }
            }
        }

        debug!("Extension loop terminated");
    }

    /// Republishes one agent event to clients.
    fn fanout_event(&self, event: &EventEnvelope) {
        let frame = match event.serialize() {
            Ok(frame) => frame,
            Err(e) => {
                error!(error = %e, "Failed to serialize event");
                return;
            }
        };

        let delivered = self
            .clients
            .deliver_event(event.session_id.as_ref(), &frame);

        if let Some(session) = &event.session_id
            && delivered == 0
        {
            debug!(
                method = %event.method,
                %session,
                "Event for session with no associated connections"
            );
        }
    }

    /// Forwards an agent log line to tracing and the file sink.
    fn forward_log(&self, line: &LogLine) {
        let rendered = line.render();
        match line.level {
            LogLevel::Error => error!(agent = %rendered, "Agent log"),
            LogLevel::Warn => warn!(agent = %rendered, "Agent log"),
            _ => debug!(agent = %rendered, "Agent log"),
        }
        self.sink_line(&rendered);
    }

    /// Writes a line to the diagnostic sink, if configured.
    ///
    /// Sink failures are reported but never affect protocol state.
    fn sink_line(&self, line: &str) {
        if let Some(sink) = &self.sink
            && let Err(e) = sink.log(line)
        {
            warn!(error = %e, "Diagnostic sink write failed");
        }
    }
}

// ============================================================================
// RelayServer - Expiry Sweeper
// ============================================================================

impl RelayServer {
    /// Periodically rejects pending calls whose deadline elapsed.
    async fn expiry_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            self.registry.expire(Instant::now());
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
