//! Connection lifecycle.
//!
//! Owns at most one link at a time and drives
//! `Disconnected -> Connecting -> Connected -> Disconnected`.
//! Events are polled (`poll_event`), never pushed.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, TryRecvError, channel};

use crate::error::TransportError;
use crate::transport::{Connector, Link, TransportEvent};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
        };
        f.write_str(name)
    }
}

/// Events surfaced by the connection manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    Closed,
    Error(String),
    Message(String),
}

/// Owner of the raw transport.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    status: ConnectionStatus,
    link: Option<Box<dyn Link>>,
    event_rx: Option<Receiver<TransportEvent>>,
    url: Option<String>,
    /// Bumped on every connect and disconnect.
    epoch: u64,
    /// Status changes not yet reported to observers.
    transitions: Vec<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            status: ConnectionStatus::Disconnected,
            link: None,
            event_rx: None,
            url: None,
            epoch: 0,
            transitions: Vec::new(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    /// Address of the current or most recent connection.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        if self.status != status {
            log::debug!("Connection status: {} -> {}", self.status, status);
            self.status = status;
            self.transitions.push(status);
        }
    }

    /// Take status changes recorded since the last call (drains the queue).
    pub fn take_transitions(&mut self) -> Vec<ConnectionStatus> {
        std::mem::take(&mut self.transitions)
    }

    /// Drop the link and its event channel without touching status.
    fn teardown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
        }
        self.event_rx = None;
    }

    /// Open a connection to `url`, tearing down any existing one first.
    ///
    /// On an immediate failure the manager is back in `Disconnected` when
    /// this returns; later failures arrive as `Error`/`Closed` events.
    pub fn connect(&mut self, url: &str) -> Result<(), TransportError> {
        if self.link.is_some() {
            log::info!("Replacing existing connection to {:?}", self.url);
            self.teardown();
            self.set_status(ConnectionStatus::Disconnected);
        }
        self.epoch += 1;
        self.url = Some(url.to_string());
        self.set_status(ConnectionStatus::Connecting);

        let (event_tx, event_rx) = channel();
        match self.connector.open(url, event_tx) {
            Ok(link) => {
                log::info!("Connecting to {}", url);
                self.link = Some(link);
                self.event_rx = Some(event_rx);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to open connection to {}: {}", url, e);
                self.set_status(ConnectionStatus::Disconnected);
                Err(e)
            }
        }
    }

    /// Close the connection immediately. Idempotent; events still queued on
    /// the old link are discarded.
    pub fn disconnect(&mut self) {
        if self.link.is_some() {
            log::info!("Disconnecting from {:?}", self.url);
        }
        self.teardown();
        self.epoch += 1;
        self.set_status(ConnectionStatus::Disconnected);
    }

    /// Send a text frame if connected. Returns false if it was dropped.
    pub fn send(&self, text: String) -> bool {
        if self.status != ConnectionStatus::Connected {
            log::trace!("Send suppressed while {}", self.status);
            return false;
        }
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        match link.send(text) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Send dropped: {}", e);
                false
            }
        }
    }

    /// Take the next transport event, if any, applying its status effect.
    pub fn poll_event(&mut self) -> Option<ConnectionEvent> {
        let received = self.event_rx.as_ref()?.try_recv();
        let event = match received {
            Ok(event) => event,
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => {
                log::warn!("Transport went away without closing");
                TransportEvent::Closed
            }
        };

        Some(match event {
            TransportEvent::Open => {
                log::info!("Connected to {:?}", self.url);
                self.set_status(ConnectionStatus::Connected);
                ConnectionEvent::Opened
            }
            TransportEvent::Message(text) => ConnectionEvent::Message(text),
            TransportEvent::Error(message) => {
                log::error!("Transport error: {}", message);
                ConnectionEvent::Error(message)
            }
            TransportEvent::Closed => {
                log::info!("Connection to {:?} closed", self.url);
                self.teardown();
                self.set_status(ConnectionStatus::Disconnected);
                ConnectionEvent::Closed
            }
        })
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryConnector;

    fn manager() -> (ConnectionManager, MemoryConnector) {
        let connector = MemoryConnector::new();
        (ConnectionManager::new(Arc::new(connector.clone())), connector)
    }

    fn drain(manager: &mut ConnectionManager) -> Vec<ConnectionEvent> {
        std::iter::from_fn(|| manager.poll_event()).collect()
    }

    #[test]
    fn test_lifecycle() {
        let (mut manager, connector) = manager();
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        manager.connect("ws://memory/canvas").unwrap();
        assert_eq!(manager.status(), ConnectionStatus::Connecting);

        let peer = connector.last_peer().unwrap();
        peer.accept();
        peer.push("hello");
        assert_eq!(
            drain(&mut manager),
            vec![ConnectionEvent::Opened, ConnectionEvent::Message("hello".to_string())]
        );
        assert!(manager.is_connected());

        peer.close();
        assert_eq!(drain(&mut manager), vec![ConnectionEvent::Closed]);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            manager.take_transitions(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected
            ]
        );
    }

    #[test]
    fn test_send_only_when_connected() {
        let (mut manager, connector) = manager();
        assert!(!manager.send("early".to_string()));

        manager.connect("ws://memory").unwrap();
        assert!(!manager.send("connecting".to_string()));

        let peer = connector.last_peer().unwrap();
        peer.accept();
        drain(&mut manager);
        assert!(manager.send("live".to_string()));
        assert_eq!(peer.sent(), vec!["live".to_string()]);
    }

    #[test]
    fn test_error_does_not_change_status() {
        let (mut manager, connector) = manager();
        manager.connect("ws://memory").unwrap();
        let peer = connector.last_peer().unwrap();
        peer.accept();
        peer.fail("reset by peer");

        let events = drain(&mut manager);
        assert_eq!(events.last(), Some(&ConnectionEvent::Error("reset by peer".to_string())));
        assert!(manager.is_connected());
    }

    #[test]
    fn test_disconnect_discards_queued_events() {
        let (mut manager, connector) = manager();
        manager.connect("ws://memory").unwrap();
        let peer = connector.last_peer().unwrap();
        peer.accept();
        peer.push("queued");

        manager.disconnect();
        assert!(peer.is_closed_by_client());
        assert!(drain(&mut manager).is_empty());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        // Idempotent.
        let epoch = manager.epoch();
        manager.take_transitions();
        manager.disconnect();
        assert!(manager.take_transitions().is_empty());
        assert!(manager.epoch() > epoch);
    }

    #[test]
    fn test_reconnect_replaces_link() {
        let (mut manager, connector) = manager();
        manager.connect("ws://memory/one").unwrap();
        let first = connector.last_peer().unwrap();
        first.accept();
        drain(&mut manager);

        manager.connect("ws://memory/two").unwrap();
        assert!(first.is_closed_by_client());
        first.push("from old link");
        assert!(drain(&mut manager).is_empty());
        assert_eq!(manager.status(), ConnectionStatus::Connecting);
        assert_eq!(manager.url(), Some("ws://memory/two"));
        assert_eq!(connector.open_count(), 2);
    }

    #[test]
    fn test_immediate_failure_returns_to_disconnected() {
        let (mut manager, connector) = manager();
        connector.refuse("connection refused");
        assert!(manager.connect("ws://memory").is_err());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert_eq!(
            manager.take_transitions(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
    }
}
