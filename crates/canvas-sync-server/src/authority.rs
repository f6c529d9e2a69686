//! Canonical canvas state for one room.
//!
//! Applies intents on behalf of sessions and produces sequenced snapshots.

use std::fmt;

use canvas_sync_core::codec::encode_snapshot;
use canvas_sync_core::{CanvasState, EncodeError, OutboundIntent, TextElement};
use uuid::Uuid;

/// Why an intent was not applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    /// The text element belongs to another user.
    NotOwner { id: String, owner: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::NotOwner { id, owner } => {
                write!(f, "text element {} is owned by {}", id, owner)
            }
        }
    }
}

/// Owner of a room's canvas.
#[derive(Debug, Default)]
pub struct Authority {
    state: CanvasState,
    sequence: u64,
}

impl Authority {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &CanvasState {
        &self.state
    }

    /// Sequence number of the last snapshot produced.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Apply `intent` as `user_id`.
    ///
    /// Text updates without an id, or with an id not seen before, create a
    /// new element; a known id is edited in place if `user_id` created it.
    pub fn apply(&mut self, user_id: &str, intent: OutboundIntent) -> Result<(), Rejection> {
        match intent {
            OutboundIntent::CursorUpdate { x, y } => {
                self.state.set_cursor(user_id, x, y);
            }
            OutboundIntent::TextElementUpdate { id, x, y, text } => {
                let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
                if let Some(existing) = self.state.text_element(&id) {
                    if existing.user_id != user_id {
                        return Err(Rejection::NotOwner {
                            id,
                            owner: existing.user_id.clone(),
                        });
                    }
                }
                self.state.upsert_text_element(TextElement::new(id, user_id, text, x, y));
            }
        }
        Ok(())
    }

    /// Drop a departing user's cursor. Their text stays.
    pub fn remove_user(&mut self, user_id: &str) -> bool {
        self.state.remove_cursor(user_id)
    }

    /// Snapshot for a broadcast; advances the sequence number.
    pub fn next_snapshot(&mut self) -> Result<String, EncodeError> {
        self.sequence += 1;
        encode_snapshot(&self.state, Some(self.sequence))
    }

    /// Snapshot for a newly joined session, at the current sequence number.
    pub fn current_snapshot(&self) -> Result<String, EncodeError> {
        encode_snapshot(&self.state, Some(self.sequence))
    }
}
