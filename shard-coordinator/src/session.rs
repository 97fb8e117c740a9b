//! Listening endpoints and the sessions they accept.
//!
//! An [`Endpoint`] owns one TCP listener. Every accepted connection gets a
//! reader task, which turns incoming lines into [`SessionEvent`]s on the
//! endpoint's single FIFO queue, and a writer task fed through an unbounded
//! channel. The endpoint's owner is the only consumer of the queue and the
//! only one who decides what to send where.
//!
//! Peers are identified by a [`PeerId`] assigned at accept time. Names
//! (worker node names, the controller) are attached later by the owner once
//! the peer has introduced itself.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufRead, BufReader},
    net::{TcpListener, TcpStream, ToSocketAddrs, tcp::OwnedWriteHalf},
    select,
    sync::{Mutex, mpsc, watch},
    time::error::Elapsed,
};
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    wire::{read_line_message, write_line_message},
};

pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Message { peer: PeerId, text: String },
    Closed { peer: PeerId },
}

pub struct Endpoint {
    name: &'static str,
    local_addr: SocketAddr,
    state: Arc<EndpointState>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    last_sender: Option<PeerId>,
    shutdown: watch::Sender<bool>,
}

impl Endpoint {
    /// Binds `addr` and starts accepting connections in the background.
    ///
    /// `name` only labels log lines ("client", "controller").
    pub async fn bind(name: &'static str, addr: impl ToSocketAddrs) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(EndpointState::new());
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);

        tokio::spawn(accept_loop(
            name,
            listener,
            Arc::clone(&state),
            events_tx,
            shutdown_rx,
        ));
        info!(endpoint = name, addr = %local_addr, "listening");

        Ok(Self {
            name,
            local_addr,
            state,
            events,
            last_sender: None,
            shutdown,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next event, or `None` once the endpoint is closed and drained.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        let event = self.events.recv().await?;
        if let SessionEvent::Message { peer, .. } = &event {
            self.last_sender = Some(*peer);
        }
        Some(event)
    }

    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<SessionEvent>, Elapsed> {
        tokio::time::timeout(timeout, self.recv()).await
    }

    /// Sends to whoever sent the most recently received message.
    pub async fn reply(&self, text: &str) -> Result<(), TransportError> {
        let peer = self.last_sender.ok_or(TransportError::NoSender)?;
        self.send(peer, text).await
    }

    pub async fn send(&self, peer: PeerId, text: &str) -> Result<(), TransportError> {
        let sessions = self.state.sessions.lock().await;
        let writer = sessions
            .writers
            .get(&peer)
            .ok_or(TransportError::PeerGone(peer))?;
        writer
            .send(text.to_string())
            .map_err(|_| TransportError::PeerGone(peer))
    }

    /// Sends to the peer registered under `node`.
    pub async fn send_named(&self, node: &str, text: &str) -> Result<(), TransportError> {
        let peer = {
            let sessions = self.state.sessions.lock().await;
            *sessions
                .names
                .get(node)
                .ok_or_else(|| TransportError::UnknownNode(node.to_string()))?
        };
        self.send(peer, text).await
    }

    pub async fn send_controller(&self, text: &str) -> Result<(), TransportError> {
        let peer = self
            .state
            .sessions
            .lock()
            .await
            .controller
            .ok_or(TransportError::NoController)?;
        self.send(peer, text).await
    }

    /// Attaches a node name to `peer`; a later registration of the same name wins.
    pub async fn register_node(&self, node: &str, peer: PeerId) {
        let mut sessions = self.state.sessions.lock().await;
        if let Some(previous) = sessions.names.insert(node.to_string(), peer) {
            if previous != peer {
                warn!(
                    endpoint = self.name,
                    node,
                    previous,
                    peer,
                    "node re-registered from a new session"
                );
            }
        }
        sessions.peer_names.insert(peer, node.to_string());
    }

    pub async fn register_controller(&self, peer: PeerId) {
        self.state.sessions.lock().await.controller = Some(peer);
    }

    /// Name registered for `peer`, kept after the peer disconnects.
    pub async fn peer_name(&self, peer: PeerId) -> Option<String> {
        self.state.sessions.lock().await.peer_names.get(&peer).cloned()
    }

    /// Stops accepting, disconnects every session and ends the event queue.
    pub async fn close(&mut self) {
        let _ = self.shutdown.send(true);
        let dropped = {
            let mut sessions = self.state.sessions.lock().await;
            let count = sessions.writers.len();
            sessions.writers.clear();
            count
        };
        self.events.close();
        info!(endpoint = self.name, sessions = dropped, "endpoint closed");
    }
}

struct EndpointState {
    sessions: Mutex<Sessions>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Sessions {
    writers: HashMap<PeerId, mpsc::UnboundedSender<String>>,
    names: HashMap<String, PeerId>,
    peer_names: HashMap<PeerId, String>,
    controller: Option<PeerId>,
}

impl EndpointState {
    fn new() -> Self {
        Self {
            sessions: Mutex::new(Sessions::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn add_session(&self, peer: PeerId, writer: mpsc::UnboundedSender<String>) {
        self.sessions.lock().await.writers.insert(peer, writer);
    }

    async fn remove_session(&self, peer: PeerId) {
        self.sessions.lock().await.writers.remove(&peer);
    }
}

async fn accept_loop(
    name: &'static str,
    listener: TcpListener,
    state: Arc<EndpointState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        select! {
            _ = shutdown.changed() => break,
            accept_result = listener.accept() => {
                handle_accept_result(name, accept_result, &state, &events, &shutdown).await;
            }
        }
    }
    debug!(endpoint = name, "accept loop stopped");
}

async fn handle_accept_result(
    name: &'static str,
    result: std::io::Result<(TcpStream, SocketAddr)>,
    state: &Arc<EndpointState>,
    events: &mpsc::UnboundedSender<SessionEvent>,
    shutdown: &watch::Receiver<bool>,
) {
    match result {
        Ok((stream, addr)) => {
            let peer = state.next_id();
            let (reader, writer) = stream.into_split();
            let (outbox, inbox) = mpsc::unbounded_channel();
            state.add_session(peer, outbox).await;
            info!(endpoint = name, peer, %addr, "session opened");

            tokio::spawn(write_session(name, peer, writer, inbox));
            tokio::spawn(read_session(
                name,
                peer,
                BufReader::new(reader),
                Arc::clone(state),
                events.clone(),
                shutdown.clone(),
            ));
        }
        Err(err) => warn!(endpoint = name, error = ?err, "failed to accept connection"),
    }
}

async fn read_session<R>(
    name: &'static str,
    peer: PeerId,
    mut reader: R,
    state: Arc<EndpointState>,
    events: mpsc::UnboundedSender<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            _ = shutdown.changed() => return,
            line = read_line_message(&mut reader) => match line {
                Ok(Some(text)) => {
                    debug!(endpoint = name, peer, %text, "received");
                    if events.send(SessionEvent::Message { peer, text }).is_err() {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    debug!(endpoint = name, peer, error = ?err, "read failed");
                    break;
                }
            }
        }
    }

    // Unregister before announcing, so a send after `Closed` reports `PeerGone`.
    state.remove_session(peer).await;
    info!(endpoint = name, peer, "session closed");
    let _ = events.send(SessionEvent::Closed { peer });
}

async fn write_session(
    name: &'static str,
    peer: PeerId,
    mut writer: OwnedWriteHalf,
    mut inbox: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = inbox.recv().await {
        if let Err(err) = write_line_message(&mut writer, &text).await {
            debug!(endpoint = name, peer, error = ?err, "failed to deliver message");
            break;
        }
    }
}
