//! Transport abstraction.
//!
//! A `Connector` opens a `Link` to an address and reports what happens on
//! it through an event channel. Each open gets its own channel, so dropping
//! the receiver discards everything the old link still has in flight.

mod memory;
mod native;

pub use memory::{MemoryConnector, MemoryPeer};
pub use native::WebSocketConnector;

use std::sync::mpsc::Sender;

use crate::error::TransportError;

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The link is ready to carry messages.
    Open,
    /// A text frame arrived.
    Message(String),
    /// The link reported an error. A `Closed` follows if it is fatal.
    Error(String),
    /// The link is gone. No events follow.
    Closed,
}

/// Channel a link reports its events on.
pub type EventSender = Sender<TransportEvent>;

/// Opens links.
pub trait Connector: Send + Sync {
    /// Start opening a link to `url`. Returns an error only for failures that
    /// are known immediately; everything else is reported as events.
    fn open(&self, url: &str, events: EventSender) -> Result<Box<dyn Link>, TransportError>;
}

/// One open (or opening) bidirectional text connection.
pub trait Link: Send {
    /// Queue a text frame. Must not block on the network.
    fn send(&self, text: String) -> Result<(), TransportError>;

    /// Close the link. Idempotent.
    fn close(&mut self);
}
