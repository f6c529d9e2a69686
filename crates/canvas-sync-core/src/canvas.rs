//! Shared canvas state: remote cursors and text annotations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identifier of a connected user (assigned by the authority).
pub type UserId = String;

/// Identifier of a text element, unique within a canvas.
pub type TextElementId = String;

/// A user's pointer position on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cursor {
    pub user_id: UserId,
    pub x: f64,
    pub y: f64,
}

impl Cursor {
    pub fn new(user_id: impl Into<UserId>, x: f64, y: f64) -> Self {
        Self {
            user_id: user_id.into(),
            x,
            y,
        }
    }
}

/// A short text annotation placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    pub id: TextElementId,
    pub user_id: UserId,
    pub text: String,
    pub x: f64,
    pub y: f64,
}

impl TextElement {
    pub fn new(
        id: impl Into<TextElementId>,
        user_id: impl Into<UserId>,
        text: impl Into<String>,
        x: f64,
        y: f64,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            text: text.into(),
            x,
            y,
        }
    }
}

/// The authoritative shared view of a canvas.
///
/// Holds at most one cursor per user and the text elements in arrival
/// order. On the client this is only ever replaced wholesale by the
/// reconciler; the in-place mutators below are used by the authority.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasState {
    /// Cursors keyed by user id.
    pub cursors: BTreeMap<UserId, Cursor>,
    /// Text elements, oldest first.
    pub text_elements: Vec<TextElement>,
}

impl CanvasState {
    /// Create an empty canvas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the canvas has neither cursors nor text.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty() && self.text_elements.is_empty()
    }

    /// Look up a user's cursor.
    pub fn cursor(&self, user_id: &str) -> Option<&Cursor> {
        self.cursors.get(user_id)
    }

    /// Look up a text element by id.
    pub fn text_element(&self, id: &str) -> Option<&TextElement> {
        self.text_elements.iter().find(|el| el.id == id)
    }

    /// Overwrite a user's cursor (last write wins).
    pub fn set_cursor(&mut self, user_id: &str, x: f64, y: f64) {
        self.cursors.insert(user_id.to_string(), Cursor::new(user_id, x, y));
    }

    /// Remove a user's cursor. Returns true if one existed.
    pub fn remove_cursor(&mut self, user_id: &str) -> bool {
        self.cursors.remove(user_id).is_some()
    }

    /// Insert a new text element or update the existing one with the same id
    /// in place, keeping its position in arrival order.
    /// Returns true if a new element was created.
    pub fn upsert_text_element(&mut self, element: TextElement) -> bool {
        match self.text_elements.iter_mut().find(|el| el.id == element.id) {
            Some(existing) => {
                *existing = element;
                false
            }
            None => {
                self.text_elements.push(element);
                true
            }
        }
    }
}
