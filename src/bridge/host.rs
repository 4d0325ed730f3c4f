//! The engine's view of the broker during one call.

use std::time::Duration;

use crate::context::{RoundTripCounters, RoundTripKind};
use crate::engine::{EngineEvent, EngineHost, SurroundingText};
use crate::socket::client_conn::ClientEndpoint;
use crate::socket::headers;
use crate::socket::message::Message;

/// Collects engine events and runs surrounding-text round trips on the
/// owning client's socket.
#[derive(Debug)]
pub struct ContextHost<'a> {
    context: usize,
    client: Option<&'a mut ClientEndpoint>,
    counters: &'a mut RoundTripCounters,
    timeout: Duration,
    events: Vec<EngineEvent>,
    /// Set once the client reset the context mid-call.
    reset_acked: bool,
}

impl<'a> ContextHost<'a> {
    /// Host for a call on behalf of `context`.
    pub fn new(
        context: usize,
        client: Option<&'a mut ClientEndpoint>,
        counters: &'a mut RoundTripCounters,
        timeout: Duration,
    ) -> Self {
        Self {
            context,
            client,
            counters,
            timeout,
            events: Vec::new(),
            reset_acked: false,
        }
    }

    /// Queued events, and whether a reset arrived during a round trip.
    pub fn finish(self) -> (Vec<EngineEvent>, bool) {
        (self.events, self.reset_acked)
    }

    fn round_trip(&mut self, request: Message, kind: RoundTripKind) -> Option<Message> {
        let client = self.client.as_deref_mut()?;
        let outcome = client.round_trip(self.context, &request, kind, self.counters, self.timeout);
        self.reset_acked |= outcome.reset_requested;
        outcome.reply
    }
}

fn succeeded(reply: &Message) -> bool {
    reply.get(1).and_then(headers::parse_flag).unwrap_or(false)
}

impl EngineHost for ContextHost<'_> {
    /// Commits made after the client was told its context was reset would
    /// land in a field that already moved on; they are dropped.
    fn emit(&mut self, event: EngineEvent) {
        if self.reset_acked && matches!(event, EngineEvent::Commit(_)) {
            log::debug!("[broker] context {} reset, dropping commit", self.context);
            return;
        }
        self.events.push(event);
    }

    fn get_surrounding_text(&mut self, max_before: u32, max_after: u32) -> Option<SurroundingText> {
        let request = Message::new(headers::GET_SURROUNDING_TEXT)
            .arg(self.context)
            .arg(max_before)
            .arg(max_after);
        let reply = self.round_trip(request, RoundTripKind::GetSurroundingText)?;
        if !succeeded(&reply) {
            return None;
        }
        let cursor = reply.get(2).and_then(|c| c.parse().ok()).unwrap_or(0);
        let text = reply.get(3).unwrap_or_default().to_string();
        Some(SurroundingText { text, cursor })
    }

    fn delete_surrounding_text(&mut self, offset: i32, len: u32) -> bool {
        let request = Message::new(headers::DELETE_SURROUNDING_TEXT)
            .arg(self.context)
            .arg(offset)
            .arg(len);
        self.round_trip(request, RoundTripKind::DeleteSurroundingText)
            .is_some_and(|r| succeeded(&r))
    }

    fn replace_surrounding_text(&mut self, text: &str, cursor: u32) -> bool {
        let request = Message::new(headers::REPLACE_SURROUNDING_TEXT)
            .arg(self.context)
            .arg(cursor)
            .arg(text);
        self.round_trip(request, RoundTripKind::ReplaceSurroundingText)
            .is_some_and(|r| succeeded(&r))
    }
}
