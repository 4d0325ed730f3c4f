//! Client message dispatch.
//!
//! Every request names its context in argument 0 and gets exactly one
//! reply. Passive acknowledgements get none. A malformed or foreign context
//! id, a missing or unparsable argument, and an unknown header are protocol
//! errors; the caller closes the connection.

use std::str::FromStr;

use super::{Broker, SharingPolicy};
use crate::context::{PreeditMode, RoundTripKind};
use crate::engine::KeyEvent;
use crate::error::ProtocolError;
use crate::socket::client_conn::ClientId;
use crate::socket::headers;
use crate::socket::message::Message;

fn arg<'m>(msg: &'m Message, index: usize) -> Result<&'m str, ProtocolError> {
    msg.get(index).ok_or_else(|| ProtocolError::MissingArgument {
        header: msg.header().to_string(),
        index,
    })
}

fn parse_arg<T: FromStr>(msg: &Message, index: usize) -> Result<T, ProtocolError> {
    let raw = arg(msg, index)?;
    raw.parse().map_err(|_| invalid(msg, index, raw))
}

fn invalid(msg: &Message, index: usize, raw: &str) -> ProtocolError {
    ProtocolError::InvalidArgument {
        header: msg.header().to_string(),
        index,
        value: raw.to_string(),
    }
}

impl Broker {
    /// Resolve argument 0 to a context owned by `client`.
    fn context_arg(&self, client: ClientId, msg: &Message) -> Result<usize, ProtocolError> {
        let id: usize = parse_arg(msg, 0)?;
        match self.contexts.get(id) {
            None => Err(ProtocolError::UnknownContext(id)),
            Some(ctx) if ctx.client != client => Err(ProtocolError::NotOwner(id)),
            Some(_) => Ok(id),
        }
    }

    fn reply(&mut self, client: ClientId, msg: Message) {
        if let Some(endpoint) = self.clients.get_mut(&client) {
            endpoint.send(&msg);
        }
    }

    /// Handle one message from `client`.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation; the connection must be closed.
    pub(crate) fn dispatch_client(
        &mut self,
        client: ClientId,
        msg: &Message,
    ) -> Result<(), ProtocolError> {
        log::trace!("[broker] {client} -> {}", msg.header());
        match msg.header() {
            headers::REGISTER_IMCONTEXT => {
                let id = self.register_context(client);
                self.reply(client, Message::new(headers::IMCONTEXT_REGISTERED).arg(id));
            }
            headers::DEREGISTER_IMCONTEXT => {
                let id = self.context_arg(client, msg)?;
                self.destroy_context(id);
                self.reply(client, Message::new(headers::IMCONTEXT_DEREGISTERED).arg(id));
            }
            headers::RESET_IMCONTEXT => {
                let id = self.context_arg(client, msg)?;
                self.reset_engine(id);
                self.reply(client, Message::new(headers::IMCONTEXT_RESETED).arg(id));
            }
            headers::ENABLE_IMCONTEXT => {
                let id = self.context_arg(client, msg)?;
                self.set_enabled(id, true);
                self.reply(client, Message::new(headers::IMCONTEXT_ENABLED).arg(id));
            }
            headers::DISABLE_IMCONTEXT => {
                let id = self.context_arg(client, msg)?;
                self.set_enabled(id, false);
                self.reply(client, Message::new(headers::IMCONTEXT_DISABLED).arg(id));
            }
            headers::CHANGE_FOCUS => {
                let id = self.context_arg(client, msg)?;
                let focus = match msg.get(1) {
                    None => true,
                    Some(raw) => headers::parse_flag(raw).ok_or_else(|| invalid(msg, 1, raw))?,
                };
                if focus {
                    self.focus_in(id);
                } else {
                    self.focus_out(id);
                }
                self.reply(client, Message::new(headers::FOCUS_CHANGED).arg(id));
            }
            headers::HANDLE_KEY_EVENT => {
                let id = self.context_arg(client, msg)?;
                let code = arg(msg, 1)?;
                let pressed = arg(msg, 2)?;
                let key = KeyEvent::from_wire(code, pressed, &msg.arguments()[3..])
                    .map_err(|e| {
                        log::debug!("[broker] {client} bad key: {e:#}");
                        invalid(msg, 1, code)
                    })?;
                let consumed = self.handle_key(id, &key);
                self.reply(
                    client,
                    Message::new(headers::KEY_EVENT_HANDLED).arg(headers::flag(consumed)),
                );
            }
            headers::SET_CURSOR_LOCATION => {
                let id = self.context_arg(client, msg)?;
                let x = parse_arg(msg, 1)?;
                let y = parse_arg(msg, 2)?;
                self.set_cursor_location(id, x, y);
                self.reply(client, Message::new(headers::CURSOR_LOCATION_CHANGED).arg(id));
            }
            headers::SET_PREEDIT_MODE => {
                let id = self.context_arg(client, msg)?;
                let raw = arg(msg, 1)?;
                let mode = PreeditMode::parse(raw).ok_or_else(|| invalid(msg, 1, raw))?;
                self.set_preedit_mode(id, mode);
                self.reply(client, Message::new(headers::PREEDIT_MODE_CHANGED).arg(id));
            }
            header @ (headers::SURROUNDING_TEXT_GOTTEN
            | headers::SURROUNDING_TEXT_DELETED
            | headers::SURROUNDING_TEXT_REPLACED) => {
                let id: usize = parse_arg(msg, 0)?;
                let Some(kind) = RoundTripKind::from_reply_header(header) else {
                    return Err(ProtocolError::UnknownHeader(header.to_string()));
                };
                self.late_reply(client, id, kind);
            }
            headers::PREEDIT_UPDATED => {
                let id: usize = parse_arg(msg, 0)?;
                self.preedit_updated(client, id);
            }
            headers::STRING_COMMITED | headers::KEY_EVENT_FORWARDED | headers::BEEPED => {}
            other => return Err(ProtocolError::UnknownHeader(other.to_string())),
        }
        Ok(())
    }

    // ─── Operations ─────────────────────────────────────────────────────────

    fn register_context(&mut self, client: ClientId) -> usize {
        let id = self.contexts.register(client, self.config.enabled_by_default);
        if let (SharingPolicy::Shared(sid), Some(ctx)) = (self.policy, self.contexts.get_mut(id)) {
            ctx.session = Some(sid);
        }
        let opened = self.panel.prepare(id);
        self.panel.register_input_context(client, id);
        if opened {
            self.panel.send();
        }
        log::debug!("[broker] {client} registered context {id}");
        id
    }

    /// Turn composition on or off for `context`.
    ///
    /// Under the shared policy this also sets the shared enablement that
    /// every context picks up on its next focus-in.
    pub(crate) fn set_enabled(&mut self, context: usize, on: bool) {
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        if ctx.enabled == on {
            return;
        }
        ctx.enabled = on;
        log::debug!("[broker] context {context} {}", if on { "enabled" } else { "disabled" });
        if self.focused != Some(context) {
            return;
        }
        if matches!(self.policy, SharingPolicy::Shared(_)) {
            self.shared_enabled = on;
        }
        let opened = self.panel.prepare(context);
        if on {
            self.ensure_session(context);
            self.panel.turn_on();
            self.sync_capabilities(context);
            self.with_engine(context, |engine, host| engine.focus_in(host));
        } else {
            self.with_engine(context, |engine, host| engine.reset(host));
            self.with_engine(context, |engine, host| engine.focus_out(host));
            self.panel.turn_off();
        }
        if opened {
            self.panel.send();
        }
    }

    /// Trigger keys toggle, then the engine filters. Focuses the context
    /// first if needed.
    pub(crate) fn handle_key(&mut self, context: usize, key: &KeyEvent) -> bool {
        if self.focused != Some(context) {
            self.focus_in(context);
        }
        let Some(enabled) = self.contexts.get(context).map(|c| c.enabled) else {
            return false;
        };
        if self.trigger_keys.iter().any(|t| t.matches_press(key)) {
            self.set_enabled(context, !enabled);
            self.send_to_owner(
                context,
                &Message::new(headers::IMENGINE_STATUS_CHANGED)
                    .arg(context)
                    .arg(headers::flag(!enabled)),
            );
            return true;
        }
        if !enabled {
            return false;
        }
        self.ensure_session(context);
        self.with_engine(context, |engine, host| engine.process_key_event(key, host))
            .unwrap_or(false)
    }

    fn set_cursor_location(&mut self, context: usize, x: i32, y: i32) {
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        if ctx.preedit_updates_in_flight > 0 {
            ctx.deferred_cursor = Some((x, y));
            return;
        }
        ctx.cursor = (x, y);
        if self.focused == Some(context) {
            let opened = self.panel.prepare(context);
            self.panel.update_spot_location(x, y);
            if opened {
                self.panel.send();
            }
        }
    }

    fn set_preedit_mode(&mut self, context: usize, mode: PreeditMode) {
        let Some(ctx) = self.contexts.get(context) else {
            return;
        };
        if ctx.preedit_mode == mode {
            return;
        }
        let shown = ctx.preedit.shown;
        if shown {
            self.hide_preedit_surface(context);
        }
        if let Some(ctx) = self.contexts.get_mut(context) {
            ctx.preedit_mode = mode;
        }
        if shown {
            self.show_preedit_surface(context);
        }
        self.sync_capabilities(context);
    }

    fn late_reply(&mut self, client: ClientId, context: usize, kind: RoundTripKind) {
        let Some(ctx) = self.contexts.get_mut(context).filter(|c| c.client == client) else {
            log::debug!("[broker] {client} {} for unknown context {context}", kind.reply_header());
            return;
        };
        if ctx.counters.take_stale(kind) {
            log::debug!("[broker] dropped late {} for context {context}", kind.reply_header());
        } else {
            log::debug!("[broker] unexpected {} for context {context}", kind.reply_header());
        }
    }

    fn preedit_updated(&mut self, client: ClientId, context: usize) {
        let Some(ctx) = self.contexts.get_mut(context).filter(|c| c.client == client) else {
            return;
        };
        ctx.preedit_updates_in_flight = ctx.preedit_updates_in_flight.saturating_sub(1);
        if ctx.preedit_updates_in_flight > 0 {
            return;
        }
        if let Some((x, y)) = ctx.deferred_cursor.take() {
            self.set_cursor_location(context, x, y);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{Harness, TestClient};
    use super::*;
    use crate::config::BrokerConfig;
    use crate::engine::key::keysym;
    use crate::panel::commands as cmd;
    use crate::panel::transaction::Transaction;

    fn codes(batch: &Transaction) -> Vec<u32> {
        batch.commands().unwrap().iter().map(|c| c.code).collect()
    }

    fn register(hx: &mut Harness, c: &mut TestClient) -> usize {
        hx.send(c, Message::new(headers::REGISTER_IMCONTEXT));
        c.recv_until(headers::IMCONTEXT_REGISTERED).get(0).unwrap().parse().unwrap()
    }

    fn key(hx: &mut Harness, c: &mut TestClient, id: usize, code: u32) -> bool {
        hx.send(c, Message::new(headers::HANDLE_KEY_EVENT).arg(id).arg(code).arg("true"));
        let reply = c.recv_until(headers::KEY_EVENT_HANDLED);
        reply.get(0) == Some("true")
    }

    #[test]
    fn test_enable_then_focus_batch() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut a, Message::new(headers::ENABLE_IMCONTEXT).arg(id));
        a.recv_until(headers::IMCONTEXT_ENABLED);
        hx.panel_batches();
        hx.send(&mut a, Message::new(headers::CHANGE_FOCUS).arg(id).arg("true"));
        a.recv_until(headers::FOCUS_CHANGED);

        let batches = hx.panel_batches();
        assert_eq!(batches.len(), 1);
        let codes = codes(&batches[0]);
        let focus_in = codes.iter().position(|c| *c == cmd::FOCUS_IN).unwrap();
        let turn_on = codes.iter().position(|c| *c == cmd::TURN_ON).unwrap();
        assert_eq!(codes[0], cmd::REQUEST);
        assert!(focus_in < turn_on);
    }

    #[test]
    fn test_rawcode_typing_commits() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut a, Message::new(headers::ENABLE_IMCONTEXT).arg(id));
        a.recv_until(headers::IMCONTEXT_ENABLED);

        assert!(key(&mut hx, &mut a, id, u32::from(b'4')));
        assert!(key(&mut hx, &mut a, id, u32::from(b'1')));
        assert!(key(&mut hx, &mut a, id, keysym::SPACE));
        // Implicit focus happened on the first key.
        assert_eq!(hx.broker.focused(), Some(id));
        let commit = a.recv_until(headers::COMMIT_STRING);
        assert_eq!(commit.arguments(), [id.to_string(), "A".to_string()]);
    }

    #[test]
    fn test_disabled_context_does_not_consume() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        assert!(!key(&mut hx, &mut a, id, u32::from(b'a')));
    }

    #[test]
    fn test_trigger_key_toggles_and_notifies() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(
            &mut a,
            Message::new(headers::HANDLE_KEY_EVENT)
                .arg(id)
                .arg(keysym::SPACE)
                .arg("true")
                .arg("control"),
        );
        let status = a.recv_until(headers::IMENGINE_STATUS_CHANGED);
        assert_eq!(status.get(1), Some("true"));
        assert_eq!(a.recv_until(headers::KEY_EVENT_HANDLED).get(0), Some("true"));
        assert!(hx.broker.contexts().get(id).unwrap().enabled);
    }

    #[test]
    fn test_cursor_held_back_during_preedit_update() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut a, Message::new(headers::ENABLE_IMCONTEXT).arg(id));
        a.recv_until(headers::IMCONTEXT_ENABLED);
        assert!(key(&mut hx, &mut a, id, u32::from(b'4')));
        hx.panel_batches();
        let in_flight = hx.broker.contexts().get(id).unwrap().preedit_updates_in_flight;
        assert!(in_flight > 0);

        hx.send(&mut a, Message::new(headers::SET_CURSOR_LOCATION).arg(id).arg(10).arg(20));
        a.recv_until(headers::CURSOR_LOCATION_CHANGED);
        assert!(hx
            .panel_batches()
            .iter()
            .all(|t| !codes(t).contains(&cmd::UPDATE_SPOT_LOCATION)));

        for _ in 0..in_flight {
            hx.send(&mut a, Message::new(headers::PREEDIT_UPDATED).arg(id));
        }
        let batches = hx.panel_batches();
        let spot = batches
            .iter()
            .flat_map(|t| t.commands().unwrap().into_iter().map(|c| (c.code, c.data.to_vec())))
            .find(|(code, _)| *code == cmd::UPDATE_SPOT_LOCATION)
            .unwrap();
        assert_eq!(spot.1.len(), 2);
        assert_eq!(hx.broker.contexts().get(id).unwrap().cursor, (10, 20));
    }

    #[test]
    fn test_unknown_header_closes_client() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut a, Message::new("frobnicate").arg(id));
        assert!(hx.broker.client(a.id).is_none());
        assert!(!hx.broker.contexts().contains(id));
    }

    #[test]
    fn test_foreign_context_is_a_protocol_error() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let mut b = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut b, Message::new(headers::RESET_IMCONTEXT).arg(id));
        assert!(hx.broker.client(b.id).is_none());
        assert!(hx.broker.contexts().contains(id));
    }

    #[test]
    fn test_bad_argument_is_a_protocol_error() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        let msg = Message::new(headers::SET_CURSOR_LOCATION).arg(id).arg("left").arg(0);
        let err = hx.broker.dispatch_client(a.id, &msg).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidArgument { index: 1, .. }));
        let err = hx
            .broker
            .dispatch_client(a.id, &Message::new(headers::ENABLE_IMCONTEXT))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::MissingArgument { index: 0, .. }));
    }

    #[test]
    fn test_late_reply_consumes_suppression() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.broker
            .contexts
            .get_mut(id)
            .unwrap()
            .counters
            .suppress(RoundTripKind::GetSurroundingText);
        let late = Message::new(headers::SURROUNDING_TEXT_GOTTEN).arg(id).arg("true");
        hx.broker.dispatch_client(a.id, &late).unwrap();
        let counters = &hx.broker.contexts().get(id).unwrap().counters;
        assert_eq!(counters.pending(RoundTripKind::GetSurroundingText), 0);
        // A second one with nothing owed is ignored, not an error.
        hx.broker.dispatch_client(a.id, &late).unwrap();
    }

    #[test]
    fn test_preedit_mode_switch_moves_preedit_to_panel() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = hx.client();
        let id = register(&mut hx, &mut a);
        hx.send(&mut a, Message::new(headers::ENABLE_IMCONTEXT).arg(id));
        a.recv_until(headers::IMCONTEXT_ENABLED);
        assert!(key(&mut hx, &mut a, id, u32::from(b'4')));
        hx.panel_batches();

        hx.send(&mut a, Message::new(headers::SET_PREEDIT_MODE).arg(id).arg("floating"));
        let hidden = a.recv_until(headers::SET_PREEDIT_SHOWN);
        assert_eq!(hidden.get(1), Some("false"));
        a.recv_until(headers::PREEDIT_MODE_CHANGED);
        let batches = hx.panel_batches();
        let all: Vec<u32> = batches.iter().flat_map(codes).collect();
        assert!(all.contains(&cmd::UPDATE_PREEDIT_STRING));
        assert!(all.contains(&cmd::SHOW_PREEDIT_STRING));
        assert_eq!(
            hx.broker.contexts().get(id).unwrap().preedit_mode,
            PreeditMode::Floating
        );
    }
}
