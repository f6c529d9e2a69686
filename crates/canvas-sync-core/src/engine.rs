//! Synchronization engine: the facade the UI layer talks to.
//!
//! Local intents go through the throttler and codec to the connection;
//! inbound frames go through the codec to the reconciler and its
//! subscribers. Nothing happens on its own: the host calls `pump()` from its
//! frame loop, or runs `spawn_driver()` to have a worker thread do it.
//!
//! Callbacks run on whichever thread pumps, with no engine lock held, so
//! they may call back into the engine.
//!
//! Status changes are committed under the core lock and delivered in commit
//! order by one thread at a time. A thread that changes status while another
//! thread is delivering leaves the change for that thread to deliver.
//! State fan-out checks the connection epoch before each subscriber, so once
//! `disconnect()` has returned no further subscriber is called for the old
//! connection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::backoff::Backoff;
use crate::canvas::{CanvasState, TextElementId};
use crate::clock::{Clock, SystemClock};
use crate::codec;
use crate::config::EngineConfig;
use crate::connection::{ConnectionEvent, ConnectionManager, ConnectionStatus};
use crate::error::TransportError;
use crate::intent::OutboundIntent;
use crate::observer::{Observers, SubscriptionId};
use crate::reconciler::StateReconciler;
use crate::throttle::IntentThrottler;
use crate::transport::{Connector, WebSocketConnector};

/// Mutable engine state guarded by one lock.
struct EngineCore {
    connection: ConnectionManager,
    throttler: IntentThrottler,
    backoff: Backoff,
    reconnect_at: Option<Instant>,
    /// Committed status changes not yet delivered: (commit number, epoch, status).
    status_outbox: VecDeque<(u64, u64, ConnectionStatus)>,
    status_committed: u64,
    /// Commit number of the status most recently handed to observers.
    status_delivering: u64,
    /// Thread currently delivering status changes.
    status_deliverer: Option<ThreadId>,
}

impl EngineCore {
    /// Move the connection's status changes into the outbox.
    fn commit_status(&mut self) {
        let epoch = self.connection.epoch();
        for status in self.connection.take_transitions() {
            self.status_committed += 1;
            self.status_outbox.push_back((self.status_committed, epoch, status));
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    core: Mutex<EngineCore>,
    reconciler: StateReconciler,
    status_observers: Observers<ConnectionStatus>,
    /// Held while pumping so inbound messages are applied one at a time.
    pump_guard: Mutex<()>,
}

/// Client-side synchronization engine for one canvas session.
///
/// Cloning is cheap and yields another handle to the same engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    /// Create an engine using `connector` for transport.
    pub fn new(connector: Arc<dyn Connector>, config: EngineConfig) -> Self {
        Self::with_clock(connector, config, Arc::new(SystemClock))
    }

    /// Create an engine speaking WebSocket.
    pub fn websocket(config: EngineConfig) -> Self {
        Self::new(Arc::new(WebSocketConnector::new()), config)
    }

    /// Create an engine with an explicit time source.
    pub fn with_clock(connector: Arc<dyn Connector>, config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let core = EngineCore {
            connection: ConnectionManager::new(connector),
            throttler: IntentThrottler::new(config.throttle_window()),
            backoff: Backoff::new(&config.reconnect),
            reconnect_at: None,
            status_outbox: VecDeque::new(),
            status_committed: 0,
            status_delivering: 0,
            status_deliverer: None,
        };
        Self {
            inner: Arc::new(EngineInner {
                reconciler: StateReconciler::new(config.reject_stale_sequences),
                config,
                clock,
                core: Mutex::new(core),
                status_observers: Observers::new(),
                pump_guard: Mutex::new(()),
            }),
        }
    }

    /// Mint a fresh text element id.
    pub fn new_text_element_id() -> TextElementId {
        Uuid::new_v4().to_string()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn core(&self) -> MutexGuard<'_, EngineCore> {
        self.inner.core.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- Connection ---

    /// Connect to `url`, replacing any existing connection.
    ///
    /// Status observers see `Connecting` before this returns. An error means
    /// the address was rejected outright and the engine is `Disconnected`
    /// again; the observers have seen that too.
    pub fn connect(&self, url: &str) -> Result<(), TransportError> {
        let result = {
            let mut core = self.core();
            core.reconnect_at = None;
            core.backoff.reset();
            core.throttler.clear();
            let result = core.connection.connect(url);
            if let Err(ref e) = result {
                self.schedule_reconnect(&mut core, e.is_retryable());
            }
            core.commit_status();
            result
        };
        self.deliver_status();
        result
    }

    /// Close the connection and cancel any pending reconnect. Idempotent.
    ///
    /// Once this returns no callback fires for events the old connection
    /// still had queued, on any thread.
    pub fn disconnect(&self) {
        {
            let mut core = self.core();
            core.connection.disconnect();
            core.throttler.clear();
            core.reconnect_at = None;
            core.backoff.reset();
            core.commit_status();
        }
        self.deliver_status();
    }

    pub fn status(&self) -> ConnectionStatus {
        self.core().connection.status()
    }

    /// When the next automatic reconnect is due, if one is scheduled.
    pub fn reconnect_scheduled(&self) -> Option<Instant> {
        self.core().reconnect_at
    }

    fn schedule_reconnect(&self, core: &mut EngineCore, retryable: bool) {
        if !self.inner.config.reconnect.enabled || !retryable || core.connection.url().is_none() {
            return;
        }
        let delay = core.backoff.next_delay();
        log::info!("Reconnecting in {:?} (attempt {})", delay, core.backoff.attempts());
        core.reconnect_at = Some(self.inner.clock.now() + delay);
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.core().connection.epoch() == epoch
    }

    /// Deliver committed status changes in commit order.
    ///
    /// Changes from an older epoch are dropped. If a callback commits a newer
    /// change, it is delivered right away (nested) and the observers still
    /// waiting for the older one skip it.
    fn deliver_status(&self) {
        let me = thread::current().id();
        let owner = {
            let mut core = self.core();
            if core.status_outbox.is_empty() {
                return;
            }
            match core.status_deliverer {
                Some(deliverer) if deliverer != me => return,
                Some(_) => false,
                None => {
                    core.status_deliverer = Some(me);
                    true
                }
            }
        };

        loop {
            let next = {
                let mut core = self.core();
                let next = core.status_outbox.pop_front();
                match next {
                    Some((commit, _, _)) => core.status_delivering = commit,
                    None if owner => core.status_deliverer = None,
                    None => {}
                }
                next
            };
            let Some((commit, epoch, status)) = next else {
                return;
            };
            self.inner.status_observers.notify_while(&status, || {
                let core = self.core();
                core.connection.epoch() == epoch && core.status_delivering == commit
            });
        }
    }

    // --- Intents ---

    /// Report the local pointer position. Throttled.
    pub fn send_cursor(&self, x: f64, y: f64) {
        self.send_intent(OutboundIntent::cursor(x, y));
    }

    /// Create or edit a text element. Sent immediately.
    pub fn send_text_element(&self, id: impl Into<TextElementId>, x: f64, y: f64, text: impl Into<String>) {
        self.send_intent(OutboundIntent::text(id, x, y, text));
    }

    /// Submit any intent. Dropped silently if not connected when it goes out.
    pub fn send_intent(&self, intent: OutboundIntent) {
        let mut core = self.core();
        let now = self.inner.clock.now();
        if let Some(ready) = core.throttler.submit(intent, now) {
            transmit(&core.connection, &ready);
        }
        if let Some(due) = core.throttler.poll_due(now) {
            transmit(&core.connection, &due);
        }
    }

    // --- State ---

    /// The last applied canvas state.
    pub fn current_state(&self) -> Arc<CanvasState> {
        self.inner.reconciler.current_state()
    }

    /// Call `callback` with every newly applied canvas state.
    pub fn on_state_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&CanvasState) + Send + Sync + 'static,
    {
        self.inner.reconciler.subscribe(callback)
    }

    /// Call `callback` on every connection status change.
    pub fn on_connection_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        self.inner
            .status_observers
            .subscribe(move |status: &ConnectionStatus| callback(*status))
    }

    /// Remove a state or status subscription. Returns false if unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.reconciler.unsubscribe(id) || self.inner.status_observers.unsubscribe(id)
    }

    // --- Driving ---

    /// Process pending transport events, release due throttled intents and
    /// run a due reconnect. Returns the number of snapshots applied.
    ///
    /// Returns 0 immediately if another pump is in progress (including a
    /// pump further up the stack of the calling callback).
    pub fn pump(&self) -> usize {
        let _guard = match self.inner.pump_guard.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return 0,
        };

        self.service_timers();
        let mut applied = 0;
        loop {
            let (event, epoch) = {
                let mut core = self.core();
                let event = core.connection.poll_event();
                match event {
                    Some(ConnectionEvent::Opened) => {
                        core.backoff.reset();
                        core.reconnect_at = None;
                    }
                    Some(ConnectionEvent::Closed) => {
                        core.throttler.clear();
                        self.schedule_reconnect(&mut core, true);
                    }
                    _ => {}
                }
                core.commit_status();
                (event, core.connection.epoch())
            };

            if matches!(event, Some(ConnectionEvent::Opened)) {
                self.inner.reconciler.reset_sequence();
            }
            self.deliver_status();

            let Some(event) = event else {
                break;
            };
            if let ConnectionEvent::Message(text) = event {
                let snapshot = match codec::decode_snapshot(&text) {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        log::warn!("Discarding inbound message: {}", e);
                        continue;
                    }
                };
                // Disconnect bumps the epoch under the core lock, so the state
                // is only replaced while this connection is current.
                let state = {
                    let core = self.core();
                    if core.connection.epoch() != epoch {
                        break;
                    }
                    self.inner.reconciler.replace(snapshot)
                };
                if let Some(state) = state {
                    applied += 1;
                    self.inner.reconciler.notify_while(&state, || self.is_current(epoch));
                }
            }
        }
        self.service_timers();
        applied
    }

    fn service_timers(&self) {
        {
            let mut core = self.core();
            let now = self.inner.clock.now();

            if let Some(due) = core.throttler.poll_due(now) {
                transmit(&core.connection, &due);
            }

            if core.reconnect_at.is_some_and(|at| now >= at) {
                core.reconnect_at = None;
                let url = core.connection.url().map(str::to_string);
                if let (ConnectionStatus::Disconnected, Some(url)) = (core.connection.status(), url) {
                    log::info!("Reconnect attempt {} to {}", core.backoff.attempts(), url);
                    if let Err(e) = core.connection.connect(&url) {
                        self.schedule_reconnect(&mut core, e.is_retryable());
                    }
                }
            }
            core.commit_status();
        }
        self.deliver_status();
    }

    /// Earliest instant at which `pump` has timer work to do.
    pub fn next_wakeup(&self) -> Option<Instant> {
        let core = self.core();
        [core.throttler.next_deadline(), core.reconnect_at]
            .into_iter()
            .flatten()
            .min()
    }

    /// Run `pump` on a worker thread until the returned handle is stopped
    /// or dropped. The worker keeps the engine alive while it runs.
    pub fn spawn_driver(&self) -> std::io::Result<EngineDriver> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let engine = self.clone();
        let tick = self.inner.config.driver_tick();

        let handle = thread::Builder::new()
            .name("canvas-sync-driver".to_string())
            .spawn(move || {
                log::debug!("Engine driver started");
                while !flag.load(Ordering::Acquire) {
                    engine.pump();
                    let now = engine.inner.clock.now();
                    let sleep = engine
                        .next_wakeup()
                        .map(|at| at.saturating_duration_since(now).min(tick))
                        .unwrap_or(tick);
                    thread::sleep(sleep.max(Duration::from_millis(1)));
                }
                log::debug!("Engine driver stopped");
            })?;

        Ok(EngineDriver {
            stop,
            handle: Some(handle),
        })
    }
}

fn transmit(connection: &ConnectionManager, intent: &OutboundIntent) -> bool {
    match codec::encode(intent) {
        Ok(text) => connection.send(text),
        Err(e) => {
            log::warn!("Dropping {} intent: {}", intent.kind(), e);
            false
        }
    }
}

/// Handle to a background pump thread.
pub struct EngineDriver {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EngineDriver {
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the worker and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            // Joining from a callback running on the worker would deadlock.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for EngineDriver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Cursor;
    use crate::clock::ManualClock;
    use crate::config::ReconnectConfig;
    use crate::transport::{MemoryConnector, MemoryPeer};

    const URL: &str = "ws://memory/canvas";
    const U1_SNAPSHOT: &str = r#"{"cursors":{"u1":{"userId":"u1","x":5,"y":5}},"textElements":[]}"#;
    const EMPTY_SNAPSHOT: &str = r#"{"cursors":{},"textElements":[]}"#;

    struct Harness {
        engine: SyncEngine,
        connector: MemoryConnector,
        clock: Arc<ManualClock>,
        statuses: Arc<Mutex<Vec<ConnectionStatus>>>,
        states: Arc<Mutex<Vec<CanvasState>>>,
    }

    impl Harness {
        fn new(config: EngineConfig) -> Self {
            let connector = MemoryConnector::new();
            let clock = Arc::new(ManualClock::new());
            let engine = SyncEngine::with_clock(Arc::new(connector.clone()), config, clock.clone());

            let statuses = Arc::new(Mutex::new(Vec::new()));
            let sink = statuses.clone();
            engine.on_connection_change(move |status| sink.lock().unwrap().push(status));
            let states = Arc::new(Mutex::new(Vec::new()));
            let sink = states.clone();
            engine.on_state_change(move |state: &CanvasState| sink.lock().unwrap().push(state.clone()));

            Self {
                engine,
                connector,
                clock,
                statuses,
                states,
            }
        }

        fn without_reconnect() -> Self {
            Self::new(EngineConfig {
                reconnect: ReconnectConfig::disabled(),
                ..EngineConfig::default()
            })
        }

        fn connected(config: EngineConfig) -> (Self, MemoryPeer) {
            let harness = Self::new(config);
            harness.engine.connect(URL).unwrap();
            let peer = harness.connector.last_peer().unwrap();
            peer.accept();
            harness.engine.pump();
            assert_eq!(harness.engine.status(), ConnectionStatus::Connected);
            (harness, peer)
        }

        fn statuses(&self) -> Vec<ConnectionStatus> {
            self.statuses.lock().unwrap().clone()
        }

        fn state_count(&self) -> usize {
            self.states.lock().unwrap().len()
        }
    }

    fn no_reconnect() -> EngineConfig {
        EngineConfig {
            reconnect: ReconnectConfig::disabled(),
            ..EngineConfig::default()
        }
    }

    fn cursor_frame(x: f64, y: f64) -> String {
        codec::encode(&OutboundIntent::cursor(x, y)).unwrap()
    }

    #[test]
    fn test_snapshot_replaces_state() {
        let (h, peer) = Harness::connected(no_reconnect());

        peer.push(U1_SNAPSHOT);
        assert_eq!(h.engine.pump(), 1);
        assert_eq!(h.engine.current_state().cursor("u1"), Some(&Cursor::new("u1", 5.0, 5.0)));

        peer.push(EMPTY_SNAPSHOT);
        assert_eq!(h.engine.pump(), 1);
        assert!(h.engine.current_state().cursors.is_empty());
        assert_eq!(h.state_count(), 2);
    }

    #[test]
    fn test_cursor_burst_sends_latest_once() {
        let (h, peer) = Harness::connected(no_reconnect());

        h.engine.send_cursor(1.0, 1.0);
        h.clock.advance(Duration::from_millis(10));
        h.engine.send_cursor(2.0, 2.0);
        h.engine.pump();
        assert!(peer.sent().is_empty());

        h.clock.advance(Duration::from_millis(40));
        h.engine.pump();
        assert_eq!(peer.sent(), vec![cursor_frame(2.0, 2.0)]);

        h.clock.advance(Duration::from_millis(200));
        h.engine.pump();
        assert_eq!(peer.sent().len(), 1);
    }

    #[test]
    fn test_text_updates_are_not_throttled() {
        let (h, peer) = Harness::connected(no_reconnect());
        h.engine.send_text_element("t1", 1.0, 2.0, "a");
        h.engine.send_text_element("t1", 1.0, 2.0, "ab");

        let sent = peer.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].contains(r#""text":"ab""#));
        assert!(sent[1].contains("TEXT_ELEMENT_UPDATE"));
    }

    #[test]
    fn test_transport_error_during_connect() {
        let h = Harness::without_reconnect();
        h.engine.connect("bad://host").unwrap();
        assert_eq!(h.engine.status(), ConnectionStatus::Connecting);

        // Sending in the error window is a silent no-op.
        h.engine.send_text_element("t", 0.0, 0.0, "x");
        let peer = h.connector.last_peer().unwrap();
        peer.fail("connection refused");
        peer.close();
        h.engine.pump();

        assert_eq!(
            h.statuses(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
        assert!(peer.sent().is_empty());
    }

    #[test]
    fn test_invalid_address_with_websocket_connector() {
        let engine = SyncEngine::websocket(EngineConfig::default());
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let sink = statuses.clone();
        engine.on_connection_change(move |status| sink.lock().unwrap().push(status));

        let err = engine.connect("bad://host").unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl(_)));
        assert_eq!(
            *statuses.lock().unwrap(),
            vec![ConnectionStatus::Connecting, ConnectionStatus::Disconnected]
        );
        // An unusable address is not retried.
        assert!(engine.reconnect_scheduled().is_none());
        engine.send_cursor(1.0, 1.0);
    }

    #[test]
    fn test_no_callbacks_after_disconnect() {
        let (h, peer) = Harness::connected(no_reconnect());
        peer.push(U1_SNAPSHOT);
        peer.push(EMPTY_SNAPSHOT);
        peer.close();

        h.engine.disconnect();
        let statuses_at_disconnect = h.statuses();
        assert_eq!(statuses_at_disconnect.last(), Some(&ConnectionStatus::Disconnected));

        assert_eq!(h.engine.pump(), 0);
        assert_eq!(h.state_count(), 0);
        assert_eq!(h.statuses(), statuses_at_disconnect);

        // Idempotent.
        h.engine.disconnect();
        assert_eq!(h.statuses(), statuses_at_disconnect);
    }

    #[test]
    fn test_disconnect_from_callback_stops_dispatch() {
        let (h, peer) = Harness::connected(no_reconnect());
        let engine = h.engine.clone();
        h.engine.on_state_change(move |_| engine.disconnect());

        peer.push(U1_SNAPSHOT);
        peer.push(EMPTY_SNAPSHOT);
        assert_eq!(h.engine.pump(), 1);
        assert_eq!(h.state_count(), 1);
        assert_eq!(h.engine.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.engine.current_state().cursors.len(), 1);
    }

    #[test]
    fn test_bad_payload_keeps_last_good_state() {
        let (h, peer) = Harness::connected(no_reconnect());
        peer.push(U1_SNAPSHOT);
        peer.push("garbage");
        peer.push(r#"{"cursors":{}}"#);
        peer.push(r#"{"cursors":{"u1":{"userId":"u1","y":1}},"textElements":[]}"#);

        assert_eq!(h.engine.pump(), 1);
        assert_eq!(h.engine.current_state().cursor("u1"), Some(&Cursor::new("u1", 5.0, 5.0)));
        assert_eq!(h.state_count(), 1);
        assert!(h.engine.status() == ConnectionStatus::Connected);
    }

    #[test]
    fn test_send_while_disconnected_is_noop() {
        let h = Harness::without_reconnect();
        h.engine.send_cursor(1.0, 1.0);
        h.engine.send_text_element("t", 0.0, 0.0, "x");
        h.clock.advance(Duration::from_millis(100));
        h.engine.pump();
        assert_eq!(h.connector.open_count(), 0);
    }

    #[test]
    fn test_non_finite_cursor_dropped() {
        let (h, peer) = Harness::connected(no_reconnect());
        h.engine.send_cursor(f64::INFINITY, 0.0);
        h.clock.advance(Duration::from_millis(50));
        h.engine.pump();
        assert!(peer.sent().is_empty());
    }

    #[test]
    fn test_reconnect_with_backoff() {
        let (h, peer) = Harness::connected(EngineConfig::default());
        peer.close();
        h.engine.pump();
        assert_eq!(h.engine.status(), ConnectionStatus::Disconnected);

        let scheduled = h.engine.reconnect_scheduled().unwrap();
        assert_eq!(scheduled, h.clock.now() + Duration::from_millis(250));
        assert_eq!(h.engine.next_wakeup(), Some(scheduled));

        h.clock.advance(Duration::from_millis(249));
        h.engine.pump();
        assert_eq!(h.connector.open_count(), 1);

        h.clock.advance(Duration::from_millis(1));
        h.engine.pump();
        assert_eq!(h.connector.open_count(), 2);
        assert_eq!(h.engine.status(), ConnectionStatus::Connecting);

        // Second failure doubles the delay.
        let second = h.connector.last_peer().unwrap();
        second.fail("refused");
        second.close();
        h.engine.pump();
        assert_eq!(
            h.engine.reconnect_scheduled(),
            Some(h.clock.now() + Duration::from_millis(500))
        );

        h.clock.advance(Duration::from_millis(500));
        h.engine.pump();
        let third = h.connector.last_peer().unwrap();
        assert_eq!(third.url(), URL);
        third.accept();
        h.engine.pump();
        assert_eq!(h.engine.status(), ConnectionStatus::Connected);

        // Success resets the schedule.
        third.close();
        h.engine.pump();
        assert_eq!(
            h.engine.reconnect_scheduled(),
            Some(h.clock.now() + Duration::from_millis(250))
        );
    }

    #[test]
    fn test_refused_connect_is_retried() {
        let h = Harness::new(EngineConfig::default());
        h.connector.refuse("down");
        assert!(h.engine.connect(URL).is_err());
        assert!(h.engine.reconnect_scheduled().is_some());

        h.connector.allow();
        h.clock.advance(Duration::from_millis(250));
        h.engine.pump();
        assert_eq!(h.engine.status(), ConnectionStatus::Connecting);
        assert_eq!(h.connector.open_count(), 1);
    }

    #[test]
    fn test_disconnect_cancels_reconnect() {
        let (h, peer) = Harness::connected(EngineConfig::default());
        peer.close();
        h.engine.pump();
        assert!(h.engine.reconnect_scheduled().is_some());

        h.engine.disconnect();
        assert!(h.engine.reconnect_scheduled().is_none());
        h.clock.advance(Duration::from_secs(10));
        h.engine.pump();
        assert_eq!(h.connector.open_count(), 1);
    }

    #[test]
    fn test_stale_snapshot_ignored_until_new_connection() {
        let (h, peer) = Harness::connected(EngineConfig::default());
        peer.push(r#"{"cursors":{},"textElements":[],"seq":10}"#);
        peer.push(r#"{"cursors":{"u1":{"userId":"u1","x":1,"y":1}},"textElements":[],"seq":9}"#);
        assert_eq!(h.engine.pump(), 1);
        assert!(h.engine.current_state().cursors.is_empty());

        // A fresh connection may talk to a restarted authority.
        h.engine.connect(URL).unwrap();
        let peer = h.connector.last_peer().unwrap();
        peer.accept();
        peer.push(r#"{"cursors":{"u1":{"userId":"u1","x":1,"y":1}},"textElements":[],"seq":1}"#);
        assert_eq!(h.engine.pump(), 1);
        assert_eq!(h.engine.current_state().cursors.len(), 1);
    }

    #[test]
    fn test_unsubscribe_from_callback() {
        let (h, peer) = Harness::connected(no_reconnect());
        let calls = Arc::new(Mutex::new(0));
        let own_id = Arc::new(Mutex::new(None::<SubscriptionId>));

        let engine = h.engine.clone();
        let counter = calls.clone();
        let id_slot = own_id.clone();
        let id = h.engine.on_state_change(move |_| {
            *counter.lock().unwrap() += 1;
            if let Some(id) = *id_slot.lock().unwrap() {
                engine.unsubscribe(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        peer.push(EMPTY_SNAPSHOT);
        peer.push(EMPTY_SNAPSHOT);
        assert_eq!(h.engine.pump(), 2);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(!h.engine.unsubscribe(id));
    }

    #[test]
    fn test_nested_pump_is_noop() {
        let (h, peer) = Harness::connected(no_reconnect());
        let nested = Arc::new(Mutex::new(Vec::new()));
        let engine = h.engine.clone();
        let sink = nested.clone();
        h.engine.on_state_change(move |_| sink.lock().unwrap().push(engine.pump()));

        peer.push(EMPTY_SNAPSHOT);
        peer.push(EMPTY_SNAPSHOT);
        assert_eq!(h.engine.pump(), 2);
        assert_eq!(*nested.lock().unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_callbacks_can_send() {
        let (h, peer) = Harness::connected(no_reconnect());
        let engine = h.engine.clone();
        h.engine.on_state_change(move |state: &CanvasState| {
            engine.send_text_element("ack", 0.0, 0.0, format!("{}", state.cursors.len()));
        });
        peer.push(U1_SNAPSHOT);
        h.engine.pump();
        assert_eq!(peer.sent().len(), 1);
    }

    #[test]
    fn test_driver_services_throttle_window() {
        let connector = MemoryConnector::new();
        let engine = SyncEngine::new(Arc::new(connector.clone()), no_reconnect());
        let driver = engine.spawn_driver().unwrap();
        assert!(driver.is_running());

        engine.connect(URL).unwrap();
        connector.last_peer().unwrap().accept();
        assert!(wait_for(|| engine.status() == ConnectionStatus::Connected));

        engine.send_cursor(3.0, 4.0);
        let peer = connector.last_peer().unwrap();
        assert!(wait_for(|| !peer.sent().is_empty()));
        assert_eq!(peer.sent(), vec![cursor_frame(3.0, 4.0)]);

        driver.stop();
    }

    #[test]
    fn test_disconnect_on_another_thread_stops_state_fan_out() {
        let (h, peer) = Harness::connected(no_reconnect());
        let engine = h.engine.clone();
        h.engine.on_state_change(move |_| {
            let engine = engine.clone();
            thread::spawn(move || engine.disconnect()).join().unwrap();
        });
        let late = Arc::new(AtomicBool::new(false));
        let flag = late.clone();
        h.engine.on_state_change(move |_| flag.store(true, Ordering::SeqCst));

        peer.push(U1_SNAPSHOT);
        peer.push(EMPTY_SNAPSHOT);
        assert_eq!(h.engine.pump(), 1);
        assert!(!late.load(Ordering::SeqCst));
        assert_eq!(h.state_count(), 1);
        assert_eq!(h.engine.status(), ConnectionStatus::Disconnected);
        assert_eq!(h.statuses().last(), Some(&ConnectionStatus::Disconnected));
    }

    #[test]
    fn test_status_changes_from_another_thread_keep_commit_order() {
        let (h, _peer) = Harness::connected(no_reconnect());
        let engine = h.engine.clone();
        let connector = h.connector.clone();
        let fired = AtomicBool::new(false);
        h.engine.on_connection_change(move |status| {
            if status != ConnectionStatus::Disconnected || fired.swap(true, Ordering::SeqCst) {
                return;
            }
            // Another thread completes the replacement link while this
            // notification is still running.
            let engine = engine.clone();
            let connector = connector.clone();
            thread::spawn(move || {
                connector.last_peer().unwrap().accept();
                engine.pump();
            })
            .join()
            .unwrap();
        });

        h.engine.connect(URL).unwrap();
        assert_eq!(h.engine.status(), ConnectionStatus::Connected);
        assert_eq!(
            h.statuses(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
            ]
        );
    }

    #[test]
    fn test_driver_with_connect_and_disconnect_on_other_threads() {
        let h = Harness::without_reconnect();
        let driver = h.engine.spawn_driver().unwrap();

        let engine = h.engine.clone();
        thread::spawn(move || engine.connect(URL).unwrap()).join().unwrap();
        let peer = h.connector.last_peer().unwrap();
        peer.accept();
        assert!(wait_for(|| h.engine.status() == ConnectionStatus::Connected));
        peer.push(U1_SNAPSHOT);
        assert!(wait_for(|| h.state_count() == 1));

        let engine = h.engine.clone();
        thread::spawn(move || engine.disconnect()).join().unwrap();
        assert!(wait_for(|| h.statuses().last() == Some(&ConnectionStatus::Disconnected)));

        // Frames sent after disconnect never reach subscribers.
        peer.push(EMPTY_SNAPSHOT);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(h.state_count(), 1);
        assert_eq!(
            h.statuses(),
            vec![
                ConnectionStatus::Connecting,
                ConnectionStatus::Connected,
                ConnectionStatus::Disconnected,
            ]
        );
        driver.stop();
    }

    #[test]
    fn test_status_sequence_stays_consistent_under_driver() {
        let h = Harness::without_reconnect();
        let driver = h.engine.spawn_driver().unwrap();

        for _ in 0..50 {
            h.engine.connect(URL).unwrap();
            let peer = h.connector.last_peer().unwrap();
            peer.accept();
            peer.push(EMPTY_SNAPSHOT);
            thread::yield_now();
            h.engine.disconnect();
        }
        driver.stop();

        let statuses = h.statuses();
        assert_eq!(statuses.last(), Some(&ConnectionStatus::Disconnected));
        assert_eq!(h.engine.status(), ConnectionStatus::Disconnected);
        for (i, status) in statuses.iter().enumerate() {
            if *status == ConnectionStatus::Connected {
                assert_eq!(statuses[i - 1], ConnectionStatus::Connecting, "{:?}", statuses);
            }
        }
    }

    fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }
}
