//! Local intents sent to the authority.

use serde::{Deserialize, Serialize};

use crate::canvas::TextElementId;

/// A local user's request to change shared state.
///
/// Cursor intents carry no identity: the authority attributes them to the
/// sending session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboundIntent {
    /// Pointer moved.
    CursorUpdate { x: f64, y: f64 },
    /// Text element created or edited.
    TextElementUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<TextElementId>,
        x: f64,
        y: f64,
        text: String,
    },
}

impl OutboundIntent {
    pub fn cursor(x: f64, y: f64) -> Self {
        OutboundIntent::CursorUpdate { x, y }
    }

    pub fn text(id: impl Into<TextElementId>, x: f64, y: f64, text: impl Into<String>) -> Self {
        OutboundIntent::TextElementUpdate {
            id: Some(id.into()),
            x,
            y,
            text: text.into(),
        }
    }

    /// High-frequency intents that go through the throttle window.
    pub fn is_throttled(&self) -> bool {
        matches!(self, OutboundIntent::CursorUpdate { .. })
    }

    /// Wire name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundIntent::CursorUpdate { .. } => "CURSOR_UPDATE",
            OutboundIntent::TextElementUpdate { .. } => "TEXT_ELEMENT_UPDATE",
        }
    }

    pub(crate) fn coordinates(&self) -> (f64, f64) {
        match self {
            OutboundIntent::CursorUpdate { x, y } => (*x, *y),
            OutboundIntent::TextElementUpdate { x, y, .. } => (*x, *y),
        }
    }
}
