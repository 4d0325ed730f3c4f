//! Composition engine capability.
//!
//! An engine turns key events into preedit, candidate and commit events. The
//! broker owns engine instances through [`session::EngineSession`] and calls
//! them with an [`EngineHost`] borrowed for the duration of one call. The
//! engine reports its output by emitting [`EngineEvent`]s into the host; the
//! broker applies them once the call returns, so an engine is never entered
//! twice at the same time.
//!
//! Only the three surrounding-text operations need an answer before the
//! engine can continue. Those are synchronous host calls that wait on the
//! client with a deadline.
//!
//! # Built-in providers
//!
//! - [`dummy`]: the fallback. Consumes nothing, shows nothing.
//! - [`rawcode`]: hexadecimal code point entry with preedit, aux string and a
//!   candidate table.

pub mod dummy;
pub mod key;
pub mod provider;
pub mod rawcode;
pub mod session;

use std::fmt;

use uuid::Uuid;

pub use key::{KeyEvent, KeyMask};

use crate::panel::transaction::Transaction;

bitflags::bitflags! {
    /// What the client side of a context can do.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClientCapabilities: u32 {
        /// The client renders the preedit inline.
        const ONTHESPOT_PREEDIT = 1 << 0;
        /// The client answers surrounding-text round trips.
        const SURROUNDING_TEXT = 1 << 1;
    }
}

// ─── Styled ranges ─────────────────────────────────────────────────────────

/// Visual style of a preedit or aux range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeKind {
    /// Underlined.
    Underline,
    /// Reverse video.
    Reverse,
    /// Highlighted.
    Highlight,
    /// Foreground color, `0xRRGGBB`.
    Foreground(u32),
    /// Background color, `0xRRGGBB`.
    Background(u32),
}

/// A style applied to the half-open character range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attribute {
    /// First styled character.
    pub start: u32,
    /// One past the last styled character.
    pub end: u32,
    /// Style.
    pub kind: AttributeKind,
}

impl Attribute {
    /// Build an attribute over `[start, end)`.
    pub fn new(start: u32, end: u32, kind: AttributeKind) -> Self {
        Self { start, end, kind }
    }

    /// The four client wire tokens: begin, end, category, value.
    pub fn to_wire(&self) -> [String; 4] {
        let (category, value) = match self.kind {
            AttributeKind::Underline => ("decorate", "underline".to_string()),
            AttributeKind::Reverse => ("decorate", "reverse".to_string()),
            AttributeKind::Highlight => ("decorate", "highlight".to_string()),
            AttributeKind::Foreground(rgb) => ("foreground", format!("#{rgb:06x}")),
            AttributeKind::Background(rgb) => ("background", format!("#{rgb:06x}")),
        };
        [
            self.start.to_string(),
            self.end.to_string(),
            category.to_string(),
            value,
        ]
    }
}

// ─── Candidate table ───────────────────────────────────────────────────────

/// A paged list of candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    /// All candidates.
    pub candidates: Vec<String>,
    /// Selection labels for one page.
    pub labels: Vec<String>,
    /// Candidates per page.
    pub page_size: u32,
    /// Index of the first candidate on the current page.
    pub page_start: u32,
    /// Index of the highlighted candidate.
    pub cursor: u32,
    /// Whether the highlight is drawn.
    pub cursor_visible: bool,
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::new(10)
    }
}

impl LookupTable {
    /// Empty table with numeric labels.
    pub fn new(page_size: u32) -> Self {
        let page_size = page_size.clamp(1, 16);
        let labels = (1..=page_size).map(|i| (i % 10).to_string()).collect();
        Self {
            candidates: Vec::new(),
            labels,
            page_size,
            page_start: 0,
            cursor: 0,
            cursor_visible: true,
        }
    }

    /// Remove every candidate and return to the first page.
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.page_start = 0;
        self.cursor = 0;
    }

    /// Append a candidate.
    pub fn append(&mut self, candidate: impl Into<String>) {
        self.candidates.push(candidate.into());
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the table has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Candidates on the current page.
    pub fn current_page(&self) -> &[String] {
        let start = (self.page_start as usize).min(self.candidates.len());
        let end = (start + self.page_size as usize).min(self.candidates.len());
        &self.candidates[start..end]
    }

    /// Candidate at `index` within the current page.
    pub fn candidate_in_page(&self, index: u32) -> Option<&str> {
        if index >= self.page_size {
            return None;
        }
        self.current_page().get(index as usize).map(String::as_str)
    }

    /// Go back one page. Returns `false` on the first page.
    pub fn page_up(&mut self) -> bool {
        if self.page_start == 0 {
            return false;
        }
        self.page_start = self.page_start.saturating_sub(self.page_size);
        self.cursor = self.page_start;
        true
    }

    /// Go forward one page. Returns `false` on the last page.
    pub fn page_down(&mut self) -> bool {
        let next = self.page_start + self.page_size;
        if next as usize >= self.candidates.len() {
            return false;
        }
        self.page_start = next;
        self.cursor = next;
        true
    }

    /// Change the page size, keeping the cursor visible.
    pub fn set_page_size(&mut self, size: u32) {
        let fresh = Self::new(size);
        self.page_size = fresh.page_size;
        self.labels = fresh.labels;
        self.page_start = self.cursor - self.cursor % self.page_size;
    }
}

// ─── Properties ────────────────────────────────────────────────────────────

/// A toggle or menu entry the engine exposes on the panel toolbar.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Property {
    /// Hierarchical key, e.g. `/RawCode/Mode`.
    pub key: String,
    /// Short label.
    pub label: String,
    /// Icon path or name.
    pub icon: String,
    /// Tooltip.
    pub tip: String,
    /// Whether the entry is shown.
    pub visible: bool,
    /// Whether the entry can be triggered.
    pub active: bool,
}

impl Property {
    /// Visible, active property.
    pub fn new(key: &str, label: &str, tip: &str) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            icon: String::new(),
            tip: tip.to_string(),
            visible: true,
            active: true,
        }
    }
}

// ─── Engine ↔ broker seam ──────────────────────────────────────────────────

/// Text around the client's caret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurroundingText {
    /// The text.
    pub text: String,
    /// Caret offset in characters.
    pub cursor: u32,
}

/// Output of an engine call.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Show the preedit.
    ShowPreedit,
    /// Hide the preedit.
    HidePreedit,
    /// Replace preedit text and styles.
    UpdatePreedit {
        /// Preedit text.
        text: String,
        /// Styled ranges.
        attrs: Vec<Attribute>,
    },
    /// Move the caret within the preedit.
    UpdatePreeditCaret(u32),
    /// Show the aux string.
    ShowAux,
    /// Hide the aux string.
    HideAux,
    /// Replace aux text and styles.
    UpdateAux {
        /// Aux text.
        text: String,
        /// Styled ranges.
        attrs: Vec<Attribute>,
    },
    /// Show the candidate table.
    ShowLookupTable,
    /// Hide the candidate table.
    HideLookupTable,
    /// Replace the candidate table.
    UpdateLookupTable(LookupTable),
    /// Insert text into the client.
    Commit(String),
    /// Hand a key back to the client.
    ForwardKey(KeyEvent),
    /// Replace the toolbar properties.
    RegisterProperties(Vec<Property>),
    /// Update one toolbar property.
    UpdateProperty(Property),
    /// Ring the bell.
    Beep,
    /// Start a panel helper.
    StartHelper(Uuid),
    /// Stop a panel helper.
    StopHelper(Uuid),
    /// Send a transaction to a panel helper.
    SendHelperEvent {
        /// Helper identity.
        helper: Uuid,
        /// Opaque payload.
        payload: Transaction,
    },
}

/// What an engine can ask of the broker during a call.
pub trait EngineHost {
    /// Queue an output event.
    fn emit(&mut self, event: EngineEvent);

    /// Ask the client for up to `max_before`/`max_after` characters around
    /// the caret. `None` means no answer.
    fn get_surrounding_text(&mut self, max_before: u32, max_after: u32) -> Option<SurroundingText>;

    /// Ask the client to delete `len` characters starting `offset`
    /// characters from the caret.
    fn delete_surrounding_text(&mut self, offset: i32, len: u32) -> bool;

    /// Ask the client to replace the surrounding text.
    fn replace_surrounding_text(&mut self, text: &str, cursor: u32) -> bool;
}

/// A running composition engine.
///
/// Default implementations are no-ops so a minimal engine only implements
/// focus, reset and key handling.
pub trait Engine: fmt::Debug {
    /// The owning context gained focus.
    fn focus_in(&mut self, host: &mut dyn EngineHost);

    /// The owning context lost focus.
    fn focus_out(&mut self, host: &mut dyn EngineHost);

    /// Drop any composition in progress.
    fn reset(&mut self, host: &mut dyn EngineHost);

    /// Filter a key. Returns whether it was consumed.
    fn process_key_event(&mut self, key: &KeyEvent, host: &mut dyn EngineHost) -> bool;

    /// The client's capabilities changed.
    fn update_client_capabilities(&mut self, _caps: ClientCapabilities) {}

    /// The user picked candidate `index` on the current page.
    fn select_candidate(&mut self, _index: u32, _host: &mut dyn EngineHost) {}

    /// The user moved the preedit caret.
    fn move_preedit_caret(&mut self, _pos: u32, _host: &mut dyn EngineHost) {}

    /// The user clicked a toolbar property.
    fn trigger_property(&mut self, _key: &str, _host: &mut dyn EngineHost) {}

    /// A panel helper sent an event.
    fn process_helper_event(
        &mut self,
        _helper: Uuid,
        _payload: &Transaction,
        _host: &mut dyn EngineHost,
    ) {
    }

    /// Previous candidate page.
    fn lookup_table_page_up(&mut self, _host: &mut dyn EngineHost) {}

    /// Next candidate page.
    fn lookup_table_page_down(&mut self, _host: &mut dyn EngineHost) {}

    /// The panel can show `size` candidates per page.
    fn update_lookup_table_page_size(&mut self, _size: u32, _host: &mut dyn EngineHost) {}

    /// Re-read engine settings.
    fn reload_config(&mut self) {}
}

/// Recording host for engine unit tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingHost {
    pub events: Vec<EngineEvent>,
    pub surrounding: Option<SurroundingText>,
    pub deleted: Vec<(i32, u32)>,
}

#[cfg(test)]
impl EngineHost for RecordingHost {
    fn emit(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    fn get_surrounding_text(&mut self, _before: u32, _after: u32) -> Option<SurroundingText> {
        self.surrounding.clone()
    }

    fn delete_surrounding_text(&mut self, offset: i32, len: u32) -> bool {
        self.deleted.push((offset, len));
        true
    }

    fn replace_surrounding_text(&mut self, _text: &str, _cursor: u32) -> bool {
        false
    }
}
