//! Routing engine events to the client and the panel.
//!
//! Preedit goes to the client when it draws the preedit inline, to the
//! panel otherwise. Aux strings, candidate tables, properties and helpers
//! always go to the panel, and only for the focused context. Commits,
//! forwarded keys and beeps always go to the client.

use super::Broker;
use crate::engine::{Attribute, EngineEvent};
use crate::socket::headers;
use crate::socket::message::Message;

impl Broker {
    /// Apply what an engine call emitted for `context`.
    pub(crate) fn apply_events(&mut self, context: usize, events: Vec<EngineEvent>) {
        if events.is_empty() {
            return;
        }
        let focused = self.focused == Some(context);
        let opened = focused && self.panel.prepare(context);
        let mut preedit_dirty = false;
        for event in events {
            preedit_dirty |= self.apply_event(context, focused, event);
        }
        if preedit_dirty {
            self.flush_client_preedit(context);
        }
        if opened {
            self.panel.send();
        }
    }

    /// Returns `true` when the client-side preedit changed and needs an
    /// `update_preedit`.
    fn apply_event(&mut self, context: usize, focused: bool, event: EngineEvent) -> bool {
        let Some(ctx) = self.contexts.get_mut(context) else {
            return false;
        };
        let inline = ctx.preedit_mode.renders_in_client();
        let client_id = ctx.client;
        let mut to_client = Vec::new();
        let mut dirty = false;

        match event {
            EngineEvent::ShowPreedit => {
                ctx.preedit.shown = true;
                if inline {
                    to_client.push(
                        Message::new(headers::SET_PREEDIT_SHOWN)
                            .arg(context)
                            .arg(headers::flag(true)),
                    );
                    dirty = true;
                } else if focused {
                    self.panel.show_preedit_string();
                }
            }
            EngineEvent::HidePreedit => {
                ctx.preedit.shown = false;
                if inline {
                    to_client.push(
                        Message::new(headers::SET_PREEDIT_SHOWN)
                            .arg(context)
                            .arg(headers::flag(false)),
                    );
                    dirty = true;
                } else if focused {
                    self.panel.hide_preedit_string();
                }
            }
            EngineEvent::UpdatePreedit { text, attrs } => {
                if inline {
                    to_client.push(
                        Message::new(headers::SET_PREEDIT_STRING)
                            .arg(context)
                            .arg(&text),
                    );
                    to_client.push(attributes_message(context, &attrs));
                    dirty = true;
                } else if focused {
                    self.panel.update_preedit_string(&text, &attrs);
                }
                ctx.preedit.text = text;
                ctx.preedit.attrs = attrs;
            }
            EngineEvent::UpdatePreeditCaret(pos) => {
                ctx.preedit.caret = pos;
                if inline {
                    to_client.push(
                        Message::new(headers::SET_PREEDIT_CURSOR_POSITION)
                            .arg(context)
                            .arg(pos),
                    );
                    dirty = true;
                } else if focused {
                    self.panel.update_preedit_caret(pos);
                }
            }
            EngineEvent::Commit(text) => {
                to_client.push(Message::new(headers::COMMIT_STRING).arg(context).arg(text));
            }
            EngineEvent::ForwardKey(key) => {
                to_client.push(
                    Message::new(headers::FORWARD_KEY_EVENT)
                        .arg(context)
                        .args(key.to_wire()),
                );
            }
            EngineEvent::Beep => {
                to_client.push(Message::new(headers::BEEP).arg(context));
            }
            panel_only => {
                if focused {
                    self.apply_panel_event(panel_only);
                }
            }
        }

        if let Some(client) = self.clients.get_mut(&client_id) {
            for msg in &to_client {
                client.send(msg);
            }
        }
        dirty
    }

    fn apply_panel_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ShowAux => self.panel.show_aux_string(),
            EngineEvent::HideAux => self.panel.hide_aux_string(),
            EngineEvent::UpdateAux { text, attrs } => self.panel.update_aux_string(&text, &attrs),
            EngineEvent::ShowLookupTable => self.panel.show_lookup_table(),
            EngineEvent::HideLookupTable => self.panel.hide_lookup_table(),
            EngineEvent::UpdateLookupTable(table) => self.panel.update_lookup_table(&table),
            EngineEvent::RegisterProperties(props) => self.panel.register_properties(&props),
            EngineEvent::UpdateProperty(prop) => self.panel.update_property(&prop),
            EngineEvent::StartHelper(helper) => self.panel.start_helper(helper),
            EngineEvent::StopHelper(helper) => self.panel.stop_helper(helper),
            EngineEvent::SendHelperEvent { helper, payload } => {
                self.panel.send_helper_event(helper, &payload);
            }
            other => log::trace!("[broker] {other:?} is not a panel event"),
        }
    }

    /// Send `update_preedit` and open the window that holds back caret
    /// locations until the client acknowledges it.
    pub(crate) fn flush_client_preedit(&mut self, context: usize) {
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        let Some(client) = self.clients.get_mut(&ctx.client) else {
            return;
        };
        if client.is_closed() {
            return;
        }
        ctx.preedit_updates_in_flight += 1;
        client.send(&Message::new(headers::UPDATE_PREEDIT).arg(context));
    }

    /// Hide the preedit wherever the current mode draws it.
    pub(crate) fn hide_preedit_surface(&mut self, context: usize) {
        let focused = self.focused == Some(context);
        let Some(inline) = self
            .contexts
            .get(context)
            .map(|c| c.preedit_mode.renders_in_client())
        else {
            return;
        };
        if inline {
            self.send_to_owner(
                context,
                &Message::new(headers::SET_PREEDIT_SHOWN).arg(context).arg(headers::flag(false)),
            );
            self.flush_client_preedit(context);
        } else if focused {
            let opened = self.panel.prepare(context);
            self.panel.hide_preedit_string();
            if opened {
                self.panel.send();
            }
        }
    }

    /// Re-draw the remembered preedit under the current mode.
    pub(crate) fn show_preedit_surface(&mut self, context: usize) {
        let focused = self.focused == Some(context);
        let Some(ctx) = self.contexts.get(context) else {
            return;
        };
        let preedit = ctx.preedit.clone();
        if ctx.preedit_mode.renders_in_client() {
            self.send_to_owner(
                context,
                &Message::new(headers::SET_PREEDIT_STRING).arg(context).arg(&preedit.text),
            );
            self.send_to_owner(context, &attributes_message(context, &preedit.attrs));
            self.send_to_owner(
                context,
                &Message::new(headers::SET_PREEDIT_CURSOR_POSITION)
                    .arg(context)
                    .arg(preedit.caret),
            );
            self.send_to_owner(
                context,
                &Message::new(headers::SET_PREEDIT_SHOWN).arg(context).arg(headers::flag(true)),
            );
            self.flush_client_preedit(context);
        } else if focused {
            let opened = self.panel.prepare(context);
            self.panel.update_preedit_string(&preedit.text, &preedit.attrs);
            self.panel.update_preedit_caret(preedit.caret);
            self.panel.show_preedit_string();
            if opened {
                self.panel.send();
            }
        }
    }

    /// Send `msg` to the client owning `context`.
    pub(crate) fn send_to_owner(&mut self, context: usize, msg: &Message) {
        let Some(client_id) = self.contexts.get(context).map(|c| c.client) else {
            return;
        };
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.send(msg);
        }
    }
}

fn attributes_message(context: usize, attrs: &[Attribute]) -> Message {
    Message::new(headers::SET_PREEDIT_ATTRIBUTES)
        .arg(context)
        .args(attrs.iter().flat_map(Attribute::to_wire))
}
