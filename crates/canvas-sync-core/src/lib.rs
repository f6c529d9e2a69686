//! Canvas Sync Core Library
//!
//! Client-side synchronization engine for a shared canvas of cursors and
//! text annotations: connection lifecycle, wire codec, cursor throttling and
//! snapshot reconciliation.

pub mod backoff;
pub mod canvas;
pub mod clock;
pub mod codec;
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod intent;
pub mod observer;
pub mod reconciler;
pub mod throttle;
pub mod transport;

pub use canvas::{CanvasState, Cursor, TextElement, TextElementId, UserId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::Snapshot;
pub use config::{EngineConfig, ReconnectConfig};
pub use connection::{ConnectionEvent, ConnectionManager, ConnectionStatus};
pub use engine::{EngineDriver, SyncEngine};
pub use error::{ConfigError, DecodeError, EncodeError, TransportError};
pub use intent::OutboundIntent;
pub use observer::{Observers, SubscriptionId};
pub use reconciler::{ApplyOutcome, StateReconciler};
pub use throttle::IntentThrottler;
pub use transport::{Connector, Link, MemoryConnector, MemoryPeer, TransportEvent, WebSocketConnector};
