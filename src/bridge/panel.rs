//! Panel command dispatch and resync.

use anyhow::{bail, Result};
use uuid::Uuid;

use super::Broker;
use crate::panel::commands as cmd;
use crate::panel::transaction::{CommandView, Transaction};
use crate::socket::headers;
use crate::socket::message::Message;

impl Broker {
    /// Dispatch everything the panel sent, then replay state if the panel
    /// just (re)connected.
    ///
    /// A malformed transaction drops the panel connection and reconnects.
    pub fn process_panel(&mut self) {
        while let Some(transaction) = self.panel.pop_inbound() {
            if let Err(e) = self.dispatch_panel(&transaction) {
                log::warn!("[panel] protocol error: {e:#}");
                self.panel.close();
                self.panel.discard_inbound();
                if let Err(e) = self.panel.connect() {
                    log::warn!("[panel] reconnect failed: {e:#}");
                }
                break;
            }
        }
        if self.panel.take_resync() {
            self.resync_panel();
        }
    }

    /// Handle one transaction from the panel.
    ///
    /// # Errors
    ///
    /// Fails on a malformed transaction or mistyped command data.
    pub(crate) fn dispatch_panel(&mut self, transaction: &Transaction) -> Result<()> {
        for command in transaction.commands()? {
            log::trace!("[panel] -> {}", cmd::name(command.code));
            match command.code {
                cmd::REQUEST | cmd::REPLY => {}
                cmd::RELOAD_CONFIG => self.reload_config(),
                cmd::EXIT => {
                    log::info!("[panel] panel requested exit");
                    self.exit_requested = true;
                }
                code if cmd::is_per_context(code) => {
                    let context = command.u32_at(0)? as usize;
                    if !self.contexts.contains(context) {
                        log::debug!("[panel] {} for unknown context {context}", cmd::name(code));
                        continue;
                    }
                    self.dispatch_context_command(context, &command)?;
                }
                other => bail!("unexpected panel command {other}"),
            }
        }
        Ok(())
    }

    fn dispatch_context_command(&mut self, context: usize, command: &CommandView<'_>) -> Result<()> {
        // A key focuses its context. Move focus while no batch is open so the
        // previous context's focus-out goes out under its own id.
        if command.code == cmd::PROCESS_KEY_EVENT {
            self.focus_in(context);
        }
        let opened = self.panel.prepare(context);
        let result = self.run_context_command(context, command);
        if opened {
            self.panel.send();
        }
        result
    }

    fn run_context_command(&mut self, context: usize, command: &CommandView<'_>) -> Result<()> {
        match command.code {
            cmd::LOOKUP_TABLE_PAGE_UP => {
                self.with_engine(context, |engine, host| engine.lookup_table_page_up(host));
            }
            cmd::LOOKUP_TABLE_PAGE_DOWN => {
                self.with_engine(context, |engine, host| engine.lookup_table_page_down(host));
            }
            cmd::UPDATE_LOOKUP_TABLE_PAGE_SIZE => {
                let size = command.u32_at(1)?;
                self.with_engine(context, |engine, host| {
                    engine.update_lookup_table_page_size(size, host);
                });
            }
            cmd::SELECT_CANDIDATE => {
                let index = command.u32_at(1)?;
                self.with_engine(context, |engine, host| engine.select_candidate(index, host));
            }
            cmd::MOVE_PREEDIT_CARET => {
                let pos = command.u32_at(1)?;
                self.with_engine(context, |engine, host| engine.move_preedit_caret(pos, host));
            }
            cmd::TRIGGER_PROPERTY => {
                let property = command.str_at(1)?;
                self.with_engine(context, |engine, host| engine.trigger_property(property, host));
            }
            cmd::PROCESS_HELPER_EVENT => {
                let helper = Uuid::parse_str(command.str_at(1)?)?;
                let payload = command.nested_at(2)?;
                self.with_engine(context, |engine, host| {
                    engine.process_helper_event(helper, payload, host);
                });
            }
            cmd::PROCESS_KEY_EVENT => {
                let key = command.key_at(1)?;
                if !self.handle_key(context, &key) {
                    self.send_to_owner(
                        context,
                        &Message::new(headers::FORWARD_KEY_EVENT)
                            .arg(context)
                            .args(key.to_wire()),
                    );
                }
            }
            cmd::COMMIT_STRING => {
                let text = command.str_at(1)?;
                self.send_to_owner(
                    context,
                    &Message::new(headers::COMMIT_STRING).arg(context).arg(text),
                );
            }
            cmd::REQUEST_HELP => {
                let info = self.factory_info_for(context);
                let help = self
                    .providers
                    .get(info.uuid)
                    .map(|f| f.help().to_string())
                    .unwrap_or_default();
                self.panel.show_help(&format!("{}\n\n{help}", info.name));
            }
            cmd::REQUEST_FACTORY_MENU => {
                let menu: Vec<_> = self
                    .providers
                    .iter()
                    .map(|f| self.factory_info(f.uuid()))
                    .collect();
                self.panel.show_factory_menu(&menu);
            }
            cmd::CHANGE_FACTORY => {
                let provider = Uuid::parse_str(command.str_at(1)?)?;
                self.change_factory(context, provider);
            }
            other => bail!("unhandled panel command {other}"),
        }
        Ok(())
    }

    /// Re-register every context and replay the focused one.
    pub(crate) fn resync_panel(&mut self) {
        log::info!("[panel] resync: {} contexts", self.contexts.len());
        let contexts: Vec<_> = self.contexts.iter().map(|c| (c.id, c.client)).collect();
        for (id, client) in contexts {
            let opened = self.panel.prepare(id);
            self.panel.register_input_context(client, id);
            if opened {
                self.panel.send();
            }
        }
        let Some(focused) = self.focused else {
            return;
        };
        let Some(ctx) = self.contexts.get(focused) else {
            return;
        };
        let enabled = ctx.enabled;
        let (x, y) = ctx.cursor;
        let info = self.factory_info_for(focused);
        let opened = self.panel.prepare(focused);
        self.panel.update_factory_info(&info);
        self.panel.focus_in(info.uuid);
        if enabled {
            self.panel.turn_on();
        } else {
            self.panel.turn_off();
        }
        self.panel.update_spot_location(x, y);
        if opened {
            self.panel.send();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::Harness;
    use super::*;
    use crate::config::BrokerConfig;
    use crate::engine::dummy::DUMMY_UUID;
    use crate::engine::key::KeyEvent;
    use crate::engine::KeyMask;
    use crate::panel::transaction::Item;
    use crate::socket::headers as h;

    fn panel_command(code: u32, data: Vec<Item>) -> Transaction {
        let mut t = Transaction::new();
        t.command(code);
        for item in data {
            t.push(item);
        }
        t
    }

    fn focused_enabled(hx: &mut Harness) -> super::super::test_support::TestClient {
        let mut a = hx.client();
        hx.send(&mut a, Message::new(h::REGISTER_IMCONTEXT));
        a.recv_until(h::IMCONTEXT_REGISTERED);
        hx.send(&mut a, Message::new(h::ENABLE_IMCONTEXT).arg(0));
        hx.send(&mut a, Message::new(h::CHANGE_FOCUS).arg(0));
        a.recv_until(h::FOCUS_CHANGED);
        hx.panel_batches();
        a
    }

    #[test]
    fn test_commit_string_reaches_client() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = focused_enabled(&mut hx);
        let t = panel_command(cmd::COMMIT_STRING, vec![Item::U32(0), Item::Str("héllo".into())]);
        hx.broker.dispatch_panel(&t).unwrap();
        let commit = a.recv_until(h::COMMIT_STRING);
        assert_eq!(commit.arguments(), ["0", "héllo"]);
    }

    #[test]
    fn test_unconsumed_panel_key_is_forwarded() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = focused_enabled(&mut hx);
        let key = KeyEvent::new(u32::from(b'z'), KeyMask::empty());
        let t = panel_command(cmd::PROCESS_KEY_EVENT, vec![Item::U32(0), Item::Key(key)]);
        hx.broker.dispatch_panel(&t).unwrap();
        let fwd = a.recv_until(h::FORWARD_KEY_EVENT);
        assert_eq!(fwd.get(1), Some(u32::from(b'z').to_string().as_str()));
    }

    #[test]
    fn test_select_candidate_commits_through_engine() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = focused_enabled(&mut hx);
        hx.send(
            &mut a,
            Message::new(h::HANDLE_KEY_EVENT).arg(0).arg(u32::from(b'4')).arg("true"),
        );
        a.recv_until(h::KEY_EVENT_HANDLED);
        let t = panel_command(cmd::SELECT_CANDIDATE, vec![Item::U32(0), Item::U32(1)]);
        hx.broker.dispatch_panel(&t).unwrap();
        let commit = a.recv_until(h::COMMIT_STRING);
        assert_eq!(commit.get(1), Some("A"));
    }

    #[test]
    fn test_factory_menu_lists_providers() {
        let mut hx = Harness::new(BrokerConfig::default());
        let _a = focused_enabled(&mut hx);
        let t = panel_command(cmd::REQUEST_FACTORY_MENU, vec![Item::U32(0)]);
        hx.broker.dispatch_panel(&t).unwrap();
        let batches = hx.panel_batches();
        let cmds = batches[0].commands().unwrap();
        assert_eq!(cmds[1].code, cmd::SHOW_FACTORY_MENU);
        let Item::StrList(flat) = &cmds[1].data[0] else {
            panic!("expected a string list");
        };
        assert_eq!(flat.len(), 8);
        assert_eq!(flat[0], DUMMY_UUID.to_string());
    }

    #[test]
    fn test_unknown_context_is_skipped() {
        let mut hx = Harness::new(BrokerConfig::default());
        let t = panel_command(cmd::SELECT_CANDIDATE, vec![Item::U32(42), Item::U32(0)]);
        assert!(hx.broker.dispatch_panel(&t).is_ok());
    }

    #[test]
    fn test_mistyped_data_is_an_error() {
        let mut hx = Harness::new(BrokerConfig::default());
        let _a = focused_enabled(&mut hx);
        let t = panel_command(cmd::SELECT_CANDIDATE, vec![Item::U32(0), Item::Str("one".into())]);
        assert!(hx.broker.dispatch_panel(&t).is_err());
    }

    #[test]
    fn test_exit_is_recorded() {
        let mut hx = Harness::new(BrokerConfig::default());
        hx.broker.dispatch_panel(&panel_command(cmd::EXIT, Vec::new())).unwrap();
        assert!(hx.broker.exit_requested());
    }

    #[test]
    fn test_resync_replays_contexts_and_focus() {
        let mut hx = Harness::new(BrokerConfig::default());
        let mut a = focused_enabled(&mut hx);
        hx.send(&mut a, Message::new(h::REGISTER_IMCONTEXT));
        a.recv_until(h::IMCONTEXT_REGISTERED);
        hx.panel_batches();

        hx.broker.resync_panel();
        let batches = hx.panel_batches();
        assert_eq!(batches.len(), 3);
        for batch in &batches[..2] {
            assert_eq!(batch.commands().unwrap()[1].code, cmd::REGISTER_INPUT_CONTEXT);
        }
        let last: Vec<u32> = batches[2].commands().unwrap().iter().map(|c| c.code).collect();
        assert!(last.contains(&cmd::FOCUS_IN));
        assert!(last.contains(&cmd::TURN_ON));
    }
}
