//! Outbound intent pacing.
//!
//! Cursor intents are gated to one transmission per window. The window opens
//! on the first cursor intent submitted while none is open; later intents in
//! the same window replace the pending one, and the most recent is released
//! once the window elapses. Text intents bypass the gate.

use std::time::{Duration, Instant};

use crate::intent::OutboundIntent;

/// Default cursor throttle window in milliseconds.
pub const DEFAULT_THROTTLE_WINDOW_MS: u64 = 50;

/// Trailing-edge throttle for high-frequency intents.
#[derive(Debug)]
pub struct IntentThrottler {
    window: Duration,
    pending: Option<OutboundIntent>,
    deadline: Option<Instant>,
}

impl IntentThrottler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            deadline: None,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Submit an intent. Returns it back if it must be sent right away.
    pub fn submit(&mut self, intent: OutboundIntent, now: Instant) -> Option<OutboundIntent> {
        if !intent.is_throttled() {
            return Some(intent);
        }
        if self.deadline.is_none() {
            self.deadline = Some(now + self.window);
        }
        self.pending = Some(intent);
        None
    }

    /// Release the pending intent if its window has elapsed.
    pub fn poll_due(&mut self, now: Instant) -> Option<OutboundIntent> {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                self.pending.take()
            }
            _ => None,
        }
    }

    /// When the open window closes, if one is open.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop the pending intent and close the window.
    pub fn clear(&mut self) {
        self.pending = None;
        self.deadline = None;
    }
}

impl Default for IntentThrottler {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_THROTTLE_WINDOW_MS))
    }
}
