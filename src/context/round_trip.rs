//! Retry-suppression bookkeeping for round-trip text operations.
//!
//! A round trip that times out leaves its reply in flight. The counter for
//! that kind is bumped so the late reply is swallowed on arrival instead of
//! being taken for the answer to a newer request of the same kind.

use crate::socket::headers;

/// The three engine-initiated operations that wait for a client answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundTripKind {
    /// `get_surrounding_text` / `surrounding_text_gotten`.
    GetSurroundingText,
    /// `delete_surrounding_text` / `surrounding_text_deleted`.
    DeleteSurroundingText,
    /// `replace_surrounding_text` / `surrounding_text_replaced`.
    ReplaceSurroundingText,
}

impl RoundTripKind {
    /// Every kind, in counter order.
    pub const ALL: [Self; 3] = [
        Self::GetSurroundingText,
        Self::DeleteSurroundingText,
        Self::ReplaceSurroundingText,
    ];

    /// Header of the request sent to the client.
    pub fn request_header(self) -> &'static str {
        match self {
            Self::GetSurroundingText => headers::GET_SURROUNDING_TEXT,
            Self::DeleteSurroundingText => headers::DELETE_SURROUNDING_TEXT,
            Self::ReplaceSurroundingText => headers::REPLACE_SURROUNDING_TEXT,
        }
    }

    /// Header of the client's answer.
    pub fn reply_header(self) -> &'static str {
        match self {
            Self::GetSurroundingText => headers::SURROUNDING_TEXT_GOTTEN,
            Self::DeleteSurroundingText => headers::SURROUNDING_TEXT_DELETED,
            Self::ReplaceSurroundingText => headers::SURROUNDING_TEXT_REPLACED,
        }
    }

    /// Kind answered by `header`, if it is a round-trip reply.
    pub fn from_reply_header(header: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.reply_header() == header)
    }

    fn slot(self) -> usize {
        self as usize
    }
}

/// Per-context, per-kind count of replies still owed by the client for
/// requests that already timed out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundTripCounters {
    owed: [u32; 3],
}

impl RoundTripCounters {
    /// Record a timed-out request of `kind`.
    pub fn suppress(&mut self, kind: RoundTripKind) {
        self.owed[kind.slot()] = self.owed[kind.slot()].saturating_add(1);
    }

    /// Consume one stale reply of `kind`.
    ///
    /// Returns `true` if the reply was owed and must be dropped.
    pub fn take_stale(&mut self, kind: RoundTripKind) -> bool {
        let slot = &mut self.owed[kind.slot()];
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }

    /// Replies still owed for `kind`.
    pub fn pending(&self, kind: RoundTripKind) -> u32 {
        self.owed[kind.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_independent_per_kind() {
        let mut c = RoundTripCounters::default();
        c.suppress(RoundTripKind::GetSurroundingText);
        c.suppress(RoundTripKind::GetSurroundingText);
        assert_eq!(c.pending(RoundTripKind::GetSurroundingText), 2);
        assert!(!c.take_stale(RoundTripKind::DeleteSurroundingText));
        assert!(c.take_stale(RoundTripKind::GetSurroundingText));
        assert!(c.take_stale(RoundTripKind::GetSurroundingText));
        assert!(!c.take_stale(RoundTripKind::GetSurroundingText));
    }

    #[test]
    fn test_reply_header_lookup() {
        for kind in RoundTripKind::ALL {
            assert_eq!(RoundTripKind::from_reply_header(kind.reply_header()), Some(kind));
        }
        assert_eq!(RoundTripKind::from_reply_header(headers::BEEPED), None);
    }
}
