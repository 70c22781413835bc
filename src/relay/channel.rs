//! Extension channel: the one live connection to the browser agent.
//!
//! The channel is a singleton slot. Its state machine is
//! `Disconnected -> Attached -> Disconnected`, re-entrant: every attach
//! gets a fresh generation number, never a resume, because a reconnected
//! agent holds a different live browser session. Commands sent while
//! detached fail immediately; nothing is queued for replay.
//!
//! Incoming frames are parsed by the codec and pushed into one mailbox
//! ([`ChannelMessage`]) consumed by a single relay-server loop, which
//! keeps ordering auditable: FIFO per channel, responses and events
//! interleaved exactly as the agent produced them.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::protocol::ExtensionMessage;

// ============================================================================
// Types
// ============================================================================

/// One entry in the channel mailbox.
#[derive(Debug)]
pub enum ChannelMessage {
    /// A parsed frame from the currently attached agent.
    Frame(ExtensionMessage),
    /// The agent on this generation detached.
    Closed {
        /// Generation that ended.
        generation: u64,
    },
}

/// Outbound writer handle for one attached agent.
struct AgentLink {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

// ============================================================================
// ExtensionChannel
// ============================================================================

/// Singleton slot holding the bidirectional agent connection.
///
/// Shared by all client handlers; only the relay server's consumer loop
/// reads the mailbox.
pub struct ExtensionChannel {
    link: Mutex<Option<AgentLink>>,
    inbound_tx: mpsc::UnboundedSender<ChannelMessage>,
    next_generation: AtomicU64,
}

impl ExtensionChannel {
    /// Creates a detached channel and its mailbox receiver.
    #[must_use]
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            link: Mutex::new(None),
            inbound_tx,
            next_generation: AtomicU64::new(0),
        });
        (channel, inbound_rx)
    }

    /// Returns the generation of the attached agent, if any.
    #[inline]
    #[must_use]
    pub fn attached_generation(&self) -> Option<u64> {
        self.link.lock().as_ref().map(|link| link.generation)
    }

    /// Returns `true` if an agent is currently attached.
    #[inline]
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.link.lock().is_some()
    }

    /// Enqueues a frame for the agent attached as `generation`.
    ///
    /// FIFO relative to other frames sent on the same generation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExtensionNotConnected`] when detached or when
    /// `generation` is no longer the attached agent.
    pub fn send(&self, generation: u64, frame: String) -> Result<()> {
        let link = self.link.lock();
        match link.as_ref() {
            Some(link) if link.generation == generation => link
                .tx
                .send(frame)
                .map_err(|_| Error::ExtensionNotConnected),
            _ => Err(Error::ExtensionNotConnected),
        }
    }

    /// Attaches a freshly upgraded agent socket, replacing any previous
    /// agent.
    ///
    /// The previous agent's writer is dropped, which ends its loop and
    /// emits `Closed` for its generation; the new attach is a fresh
    /// generation. Returns the new generation number.
    pub fn attach(self: &Arc<Self>, ws_stream: WebSocketStream<TcpStream>) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let replaced = {
            let mut link = self.link.lock();
            link.replace(AgentLink {
                generation,
                tx: out_tx,
            })
        };

        if let Some(old) = replaced {
            info!(
                old_generation = old.generation,
                new_generation = generation,
                "Replacing attached agent"
            );
            // Dropping the old sender ends the old loop.
        } else {
            info!(generation, "Agent attached");
        }

        let channel = Arc::clone(self);
        tokio::spawn(channel.run_agent_loop(ws_stream, out_rx, generation));

        generation
    }

    /// Detaches the current agent, if any, ending its loop.
    pub fn shutdown(&self) {
        let link = self.link.lock().take();
        if let Some(link) = link {
            debug!(generation = link.generation, "Channel shutdown");
            drop(link); // sender drop ends the agent loop
        }
    }

    /// Event loop for one attached agent generation.
    async fn run_agent_loop(
        self: Arc<Self>,
        ws_stream: WebSocketStream<TcpStream>,
        mut out_rx: mpsc::UnboundedReceiver<String>,
        generation: u64,
    ) {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.deliver_frame(&text, generation);
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(generation, "Agent closed the socket");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(generation, error = %e, "Agent socket error");
                            break;
                        }

                        None => {
                            debug!(generation, "Agent stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                frame = out_rx.recv() => {
                    match frame {
                        Some(frame) => {
                            if let Err(e) = ws_write.send(Message::Text(frame.into())).await {
                                error!(generation, error = %e, "Failed to write to agent");
                                break;
                            }
                        }
                        None => {
                            // Replaced or shut down.
                            debug!(generation, "Agent writer dropped");
                            let _ = ws_write.close().await;
                            break;
                        }
                    }
                }
            }
        }

        self.detach_if_current(generation);
        let _ = self.inbound_tx.send(ChannelMessage::Closed { generation });
        debug!(generation, "Agent loop terminated");
    }

    /// Parses and forwards one incoming frame, dropping frames from
    /// superseded generations and malformed frames.
    fn deliver_frame(&self, text: &str, generation: u64) {
        if self.attached_generation() != Some(generation) {
            debug!(generation, "Dropping frame from superseded agent");
            return;
        }

        match ExtensionMessage::parse(text) {
            Ok(message) => {
                let _ = self.inbound_tx.send(ChannelMessage::Frame(message));
            }
            Err(e) => {
                warn!(generation, error = %e, frame = %text, "Malformed agent frame dropped");
            }
        }
    }

    /// Clears the link slot if it still belongs to `generation`.
    fn detach_if_current(&self, generation: u64) {
        let mut link = self.link.lock();
        if link.as_ref().is_some_and(|l| l.generation == generation) {
            *link = None;
            info!(generation, "Agent detached");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
