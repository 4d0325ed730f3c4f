//! Dedicated/shared engine policy and provider switching.
//!
//! ```text
//!              set_shared(true)
//!   Dedicated ──────────────────► Shared(sid)
//!       ▲                             │
//!       └─────────────────────────────┘
//!              set_shared(false)
//! ```
//!
//! Every context is re-pointed before any engine call that could emit
//! events, so an engine never sees a context that refers elsewhere.

use uuid::Uuid;

use super::{Broker, SharingPolicy};
use crate::config::BrokerConfig;
use crate::engine::session::SessionId;

impl Broker {
    /// Switch the engine-sharing policy. A no-op if already in effect.
    pub fn set_shared(&mut self, shared: bool) {
        match (self.policy, shared) {
            (SharingPolicy::Dedicated, true) => self.enter_shared(),
            (SharingPolicy::Shared(sid), false) => self.leave_shared(sid),
            _ => {}
        }
    }

    fn enter_shared(&mut self) {
        let focused = self.focused;
        if let Some(f) = focused {
            self.detach_focused_engine(f);
        }
        let shared =
            self.sessions
                .create(&self.providers, self.default_provider, &self.config.encoding);
        if let Some(enabled) = focused.and_then(|f| self.contexts.get(f)).map(|c| c.enabled) {
            self.shared_enabled = enabled;
        }
        for ctx in self.contexts.iter_mut() {
            if let Some(old) = ctx.session.replace(shared) {
                self.sessions.remove(old);
            }
        }
        self.policy = SharingPolicy::Shared(shared);
        log::info!("[broker] engines shared ({shared})");

        let provider = self
            .sessions
            .get(shared)
            .map_or(self.default_provider, |s| s.provider);
        let info = self.factory_info(provider);
        for id in self.contexts.ids() {
            let opened = self.panel.prepare(id);
            self.panel.update_factory_info(&info);
            if opened {
                self.panel.send();
            }
        }
        if let Some(f) = focused {
            self.attach_focused_engine(f);
        }
    }

    fn leave_shared(&mut self, shared: SessionId) {
        let focused = self.focused;
        if let Some(f) = focused {
            self.detach_focused_engine(f);
        }
        for ctx in self.contexts.iter_mut() {
            ctx.session = None;
        }
        self.sessions.remove(shared);
        self.policy = SharingPolicy::Dedicated;
        log::info!("[broker] engines dedicated");

        if let Some(f) = focused {
            self.ensure_session(f);
            let info = self.factory_info_for(f);
            let opened = self.panel.prepare(f);
            self.panel.update_factory_info(&info);
            if opened {
                self.panel.send();
            }
            self.attach_focused_engine(f);
        }
    }

    /// Focus-out the engine of the focused context before it is replaced.
    fn detach_focused_engine(&mut self, context: usize) {
        if !self.contexts.get(context).is_some_and(|c| c.enabled) {
            return;
        }
        let opened = self.panel.prepare(context);
        self.with_engine(context, |engine, host| engine.reset(host));
        self.with_engine(context, |engine, host| engine.focus_out(host));
        if opened {
            self.panel.send();
        }
    }

    /// Bring the new engine of the focused context up to date.
    fn attach_focused_engine(&mut self, context: usize) {
        let shared = matches!(self.policy, SharingPolicy::Shared(_));
        let shared_enabled = self.shared_enabled;
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        if shared {
            ctx.enabled = shared_enabled;
        }
        let enabled = ctx.enabled;
        if let Some(sid) = ctx.session {
            self.sessions.set_owner(sid, context);
        }
        self.sync_capabilities(context);
        if enabled {
            let opened = self.panel.prepare(context);
            self.with_engine(context, |engine, host| engine.focus_in(host));
            if opened {
                self.panel.send();
            }
        }
    }

    /// Switch `context` to `provider`.
    ///
    /// Dedicated: only this context's session is replaced. Shared: the
    /// shared session is replaced for everyone and `provider` becomes the
    /// default.
    pub(crate) fn change_factory(&mut self, context: usize, provider: Uuid) {
        if self.providers.get(provider).is_none() {
            log::warn!("[broker] change factory: no provider {provider}");
            return;
        }
        let focused = self.focused == Some(context);
        if focused {
            self.detach_focused_engine(context);
        }
        match self.policy {
            SharingPolicy::Dedicated => {
                let new = self
                    .sessions
                    .create(&self.providers, provider, &self.config.encoding);
                let Some(ctx) = self.contexts.get_mut(context) else {
                    self.sessions.remove(new);
                    return;
                };
                if let Some(old) = ctx.session.replace(new) {
                    self.sessions.remove(old);
                }
            }
            SharingPolicy::Shared(old) => {
                let new = self
                    .sessions
                    .create(&self.providers, provider, &self.config.encoding);
                for ctx in self.contexts.iter_mut() {
                    ctx.session = Some(new);
                }
                self.sessions.remove(old);
                self.policy = SharingPolicy::Shared(new);
                self.default_provider = provider;
            }
        }
        log::info!("[broker] context {context} switched to provider {provider}");

        let info = self.factory_info_for(context);
        if focused {
            let opened = self.panel.prepare(context);
            self.panel.update_factory_info(&info);
            if opened {
                self.panel.send();
            }
            self.attach_focused_engine(context);
        } else {
            self.sync_capabilities(context);
        }
    }

    /// Apply a freshly loaded configuration.
    ///
    /// Re-reads trigger keys and the default provider, re-applies the
    /// sharing policy, and asks every engine to reload its own settings.
    pub fn apply_config(&mut self, config: BrokerConfig) {
        self.trigger_keys = config.trigger_keys();
        self.default_provider = self.providers.default_provider(config.default_provider);
        let shared = config.shared_engines;
        self.config = config;
        self.set_shared(shared);
        for session in self.sessions.iter_mut() {
            session.engine.reload_config();
        }
        log::info!("[config] reloaded ({} trigger keys)", self.trigger_keys.len());
    }

    /// Reload `config.json` from disk.
    pub fn reload_config(&mut self) {
        match BrokerConfig::load() {
            Ok(config) => self.apply_config(config),
            Err(e) => log::warn!("[config] reload failed: {e:#}"),
        }
    }
}
