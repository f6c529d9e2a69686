//! In-memory transport for testing and embedding.
//!
//! Every `open` creates a connection the test drives through a
//! `MemoryPeer`: accept it, push frames, fail it, close it, and inspect what
//! the client sent.

use std::sync::{Arc, Mutex, MutexGuard};

use super::{Connector, EventSender, Link, TransportEvent};
use crate::error::TransportError;

#[derive(Debug)]
struct Connection {
    url: String,
    events: EventSender,
    sent: Vec<String>,
    closed_by_client: bool,
    closed_by_peer: bool,
}

#[derive(Debug, Default)]
struct ConnectorState {
    connections: Vec<Arc<Mutex<Connection>>>,
    refuse: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Connector whose links live in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent opens fail immediately with `ConnectFailed`.
    pub fn refuse(&self, reason: impl Into<String>) {
        lock(&self.state).refuse = Some(reason.into());
    }

    /// Let subsequent opens succeed again.
    pub fn allow(&self) {
        lock(&self.state).refuse = None;
    }

    /// Number of links opened so far.
    pub fn open_count(&self) -> usize {
        lock(&self.state).connections.len()
    }

    /// The most recently opened connection.
    pub fn last_peer(&self) -> Option<MemoryPeer> {
        lock(&self.state)
            .connections
            .last()
            .cloned()
            .map(|connection| MemoryPeer { connection })
    }

    /// A connection by open order.
    pub fn peer(&self, index: usize) -> Option<MemoryPeer> {
        lock(&self.state)
            .connections
            .get(index)
            .cloned()
            .map(|connection| MemoryPeer { connection })
    }
}

impl Connector for MemoryConnector {
    fn open(&self, url: &str, events: EventSender) -> Result<Box<dyn Link>, TransportError> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.refuse {
            return Err(TransportError::ConnectFailed(reason.clone()));
        }
        let connection = Arc::new(Mutex::new(Connection {
            url: url.to_string(),
            events,
            sent: Vec::new(),
            closed_by_client: false,
            closed_by_peer: false,
        }));
        state.connections.push(connection.clone());
        Ok(Box::new(MemoryLink { connection }))
    }
}

struct MemoryLink {
    connection: Arc<Mutex<Connection>>,
}

impl Link for MemoryLink {
    fn send(&self, text: String) -> Result<(), TransportError> {
        let mut connection = lock(&self.connection);
        if connection.closed_by_client || connection.closed_by_peer {
            return Err(TransportError::Closed);
        }
        connection.sent.push(text);
        Ok(())
    }

    fn close(&mut self) {
        lock(&self.connection).closed_by_client = true;
    }
}

/// The remote end of one in-memory connection.
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    connection: Arc<Mutex<Connection>>,
}

impl MemoryPeer {
    fn emit(&self, event: TransportEvent) {
        let connection = lock(&self.connection);
        // The client may already have dropped its receiver.
        let _ = connection.events.send(event);
    }

    pub fn url(&self) -> String {
        lock(&self.connection).url.clone()
    }

    /// Complete the handshake.
    pub fn accept(&self) {
        self.emit(TransportEvent::Open);
    }

    /// Deliver a text frame to the client.
    pub fn push(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Report a transport error to the client.
    pub fn fail(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error(reason.into()));
    }

    /// Close from the remote side.
    pub fn close(&self) {
        lock(&self.connection).closed_by_peer = true;
        self.emit(TransportEvent::Closed);
    }

    /// Frames the client sent, oldest first.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.connection).sent.clone()
    }

    /// Whether the client closed this link.
    pub fn is_closed_by_client(&self) -> bool {
        lock(&self.connection).closed_by_client
    }
}
