//! Wire codec for intents and canvas snapshots.
//!
//! Messages are JSON text frames:
//! ```json
//! { "type": "CURSOR_UPDATE", "x": 10, "y": 20 }
//! { "type": "TEXT_ELEMENT_UPDATE", "id": "...", "x": 10, "y": 20, "text": "hi" }
//! { "cursors": { "u1": { "userId": "u1", "x": 5, "y": 5 } }, "textElements": [], "seq": 7 }
//! ```
//! `id` on text updates and `seq` on snapshots are optional.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::canvas::{CanvasState, Cursor, TextElement};
use crate::error::{DecodeError, EncodeError};
use crate::intent::OutboundIntent;

/// A decoded state broadcast.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: CanvasState,
    /// Broadcast sequence number, if the authority sends one.
    pub sequence: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingSnapshot {
    cursors: BTreeMap<String, Cursor>,
    text_elements: Vec<TextElement>,
    #[serde(default)]
    seq: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingSnapshot<'a> {
    cursors: &'a BTreeMap<String, Cursor>,
    text_elements: &'a [TextElement],
    #[serde(skip_serializing_if = "Option::is_none")]
    seq: Option<u64>,
}

/// Encode an intent as a text frame.
pub fn encode(intent: &OutboundIntent) -> Result<String, EncodeError> {
    let (x, y) = intent.coordinates();
    if !x.is_finite() || !y.is_finite() {
        return Err(EncodeError::NonFiniteCoordinate(intent.kind()));
    }
    Ok(serde_json::to_string(intent)?)
}

/// Decode a snapshot frame into canvas state, dropping the sequence number.
pub fn decode(text: &str) -> Result<CanvasState, DecodeError> {
    decode_snapshot(text).map(|snapshot| snapshot.state)
}

/// Decode a snapshot frame.
pub fn decode_snapshot(text: &str) -> Result<Snapshot, DecodeError> {
    let incoming: IncomingSnapshot = serde_json::from_str(text)?;
    let state = CanvasState {
        cursors: incoming.cursors,
        text_elements: incoming.text_elements,
    };
    validate(&state)?;
    Ok(Snapshot {
        state,
        sequence: incoming.seq,
    })
}

/// Encode canvas state as a snapshot frame.
pub fn encode_snapshot(state: &CanvasState, sequence: Option<u64>) -> Result<String, EncodeError> {
    let cursors_finite = state.cursors.values().all(|c| c.x.is_finite() && c.y.is_finite());
    if !cursors_finite {
        return Err(EncodeError::NonFiniteCoordinate("cursor"));
    }
    if !state.text_elements.iter().all(|el| el.x.is_finite() && el.y.is_finite()) {
        return Err(EncodeError::NonFiniteCoordinate("text element"));
    }
    let outgoing = OutgoingSnapshot {
        cursors: &state.cursors,
        text_elements: &state.text_elements,
        seq: sequence,
    };
    Ok(serde_json::to_string(&outgoing)?)
}

/// Decode an intent frame (authority side).
pub fn decode_intent(text: &str) -> Result<OutboundIntent, DecodeError> {
    Ok(serde_json::from_str(text)?)
}

fn validate(state: &CanvasState) -> Result<(), DecodeError> {
    for (key, cursor) in &state.cursors {
        if *key != cursor.user_id {
            return Err(DecodeError::CursorKeyMismatch {
                key: key.clone(),
                user_id: cursor.user_id.clone(),
            });
        }
    }

    let mut seen = HashSet::with_capacity(state.text_elements.len());
    for element in &state.text_elements {
        if !seen.insert(element.id.as_str()) {
            return Err(DecodeError::DuplicateTextElement(element.id.clone()));
        }
    }
    Ok(())
}
