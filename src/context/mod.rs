//! Input contexts.
//!
//! One [`InputContext`] per editable field a client registered. The context
//! holds what the broker must remember between messages: enablement, where
//! and what the preedit is, the caret location, which engine session it
//! talks to, and the round-trip replies it still owes suppression for.

pub mod registry;
pub mod round_trip;

use crate::engine::session::SessionId;
use crate::engine::{Attribute, ClientCapabilities};
use crate::socket::client_conn::ClientId;

pub use registry::ContextRegistry;
pub use round_trip::{RoundTripCounters, RoundTripKind};

/// Where the preedit is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PreeditMode {
    /// Panel window near the caret.
    Floating,
    /// Panel window at a fixed spot.
    Hanging,
    /// Inline, drawn by the client.
    #[default]
    Embedded,
    /// Client's choice; treated as inline.
    Any,
}

impl PreeditMode {
    /// Parse the client wire name.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "floating" => Some(Self::Floating),
            "hanging" => Some(Self::Hanging),
            "embedded" => Some(Self::Embedded),
            "any" => Some(Self::Any),
            _ => None,
        }
    }

    /// Client wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Floating => "floating",
            Self::Hanging => "hanging",
            Self::Embedded => "embedded",
            Self::Any => "any",
        }
    }

    /// Whether the client draws the preedit.
    pub fn renders_in_client(self) -> bool {
        matches!(self, Self::Embedded | Self::Any)
    }
}

/// Last preedit the engine produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreeditState {
    /// Whether it is visible.
    pub shown: bool,
    /// Text.
    pub text: String,
    /// Caret offset in characters.
    pub caret: u32,
    /// Styled ranges.
    pub attrs: Vec<Attribute>,
}

/// Broker-side state of one editable field.
#[derive(Debug, Clone)]
pub struct InputContext {
    /// Registry id, also the wire id.
    pub id: usize,
    /// Connection that registered the context.
    pub client: ClientId,
    /// Whether composition is on.
    pub enabled: bool,
    /// Preedit placement.
    pub preedit_mode: PreeditMode,
    /// Preedit content.
    pub preedit: PreeditState,
    /// Last caret location forwarded to the panel.
    pub cursor: (i32, i32),
    /// Location received while a preedit update was in flight.
    pub deferred_cursor: Option<(i32, i32)>,
    /// `update_preedit` messages sent and not yet acknowledged.
    pub preedit_updates_in_flight: u32,
    /// Engine session, if one is attached.
    pub session: Option<SessionId>,
    /// Late replies still owed per round-trip kind.
    pub counters: RoundTripCounters,
}

impl InputContext {
    /// Fresh context owned by `client`.
    pub fn new(id: usize, client: ClientId, enabled: bool) -> Self {
        Self {
            id,
            client,
            enabled,
            preedit_mode: PreeditMode::default(),
            preedit: PreeditState::default(),
            cursor: (0, 0),
            deferred_cursor: None,
            preedit_updates_in_flight: 0,
            session: None,
            counters: RoundTripCounters::default(),
        }
    }

    /// Capabilities to report to the engine.
    pub fn capabilities(&self) -> ClientCapabilities {
        let mut caps = ClientCapabilities::SURROUNDING_TEXT;
        if self.preedit_mode.renders_in_client() {
            caps |= ClientCapabilities::ONTHESPOT_PREEDIT;
        }
        caps
    }
}
