//! Bridge - the broker's state and dispatch core.
//!
//! The [`Broker`] owns every piece of mutable process state: client
//! connections, the panel connection, the context registry, engine sessions,
//! the provider table, the sharing policy and the focused context. The
//! reactor feeds it decoded messages; everything else happens here.
//!
//! # Architecture
//!
//! ```text
//!   client msg ──► dispatch_client ──┐
//!                                    ├──► InputContext ──► Engine (via host)
//!   panel txn  ──► dispatch_panel  ──┘          ▲               │
//!                                               │               ▼
//!                                   apply_events ◄──── EngineEvent queue
//!                                      │     │
//!                                      ▼     ▼
//!                                  client   panel batch
//! ```
//!
//! Engines never call back into the broker directly. During a call they see
//! a [`host::ContextHost`] that queues events and performs surrounding-text
//! round trips on the owning client's socket; the queued events are applied
//! once the engine call returns.
//!
//! # Modules
//!
//! - [`client`]: client message dispatch
//! - [`panel`]: panel command dispatch and resync
//! - [`events`]: routing engine events to client and panel
//! - [`sharing`]: dedicated/shared policy and provider switching
//! - [`host`]: the engine's view of the broker during a call

// Rust guideline compliant 2026-02

pub mod client;
pub mod events;
pub mod host;
pub mod panel;
pub mod sharing;

use std::collections::BTreeMap;
use std::os::unix::net::UnixStream;

use anyhow::Result;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::context::ContextRegistry;
use crate::engine::provider::ProviderTable;
use crate::engine::session::{SessionId, SessionTable};
use crate::engine::{Engine, EngineHost, KeyEvent};
use crate::panel::{FactoryInfo, PanelEndpoint};
use crate::socket::client_conn::{ClientEndpoint, ClientId};

use host::ContextHost;

/// Engine-sharing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingPolicy {
    /// Every context owns its own session, created on first focus.
    Dedicated,
    /// Every context refers to this one session.
    Shared(SessionId),
}

/// The broker's entire mutable state.
#[derive(Debug)]
pub struct Broker {
    config: BrokerConfig,
    trigger_keys: Vec<KeyEvent>,
    clients: BTreeMap<ClientId, ClientEndpoint>,
    next_client: u64,
    panel: PanelEndpoint,
    contexts: ContextRegistry,
    sessions: SessionTable,
    providers: ProviderTable,
    policy: SharingPolicy,
    shared_enabled: bool,
    default_provider: Uuid,
    focused: Option<usize>,
    exit_requested: bool,
}

impl Broker {
    /// Build a broker. Applies the configured sharing policy right away.
    pub fn new(config: BrokerConfig, providers: ProviderTable, panel: PanelEndpoint) -> Self {
        let default_provider = providers.default_provider(config.default_provider);
        let mut broker = Self {
            trigger_keys: config.trigger_keys(),
            shared_enabled: config.enabled_by_default,
            config,
            clients: BTreeMap::new(),
            next_client: 1,
            panel,
            contexts: ContextRegistry::new(),
            sessions: SessionTable::new(),
            providers,
            policy: SharingPolicy::Dedicated,
            default_provider,
            focused: None,
            exit_requested: false,
        };
        if broker.config.shared_engines {
            broker.set_shared(true);
        }
        log::info!(
            "[broker] default provider {}, {} engines",
            broker.default_provider,
            if broker.config.shared_engines { "shared" } else { "dedicated" }
        );
        broker
    }

    // ─── Accessors ──────────────────────────────────────────────────────────

    /// Active configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Context registry.
    pub fn contexts(&self) -> &ContextRegistry {
        &self.contexts
    }

    /// Live engine sessions.
    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Current sharing policy.
    pub fn policy(&self) -> SharingPolicy {
        self.policy
    }

    /// Focused context, if any.
    pub fn focused(&self) -> Option<usize> {
        self.focused
    }

    /// Provider used for new sessions.
    pub fn default_provider(&self) -> Uuid {
        self.default_provider
    }

    /// Panel connection.
    pub fn panel(&self) -> &PanelEndpoint {
        &self.panel
    }

    /// Panel connection, mutably (reactor readiness).
    pub fn panel_mut(&mut self) -> &mut PanelEndpoint {
        &mut self.panel
    }

    /// Whether the panel asked the broker to exit.
    pub fn exit_requested(&self) -> bool {
        self.exit_requested
    }

    // ─── Clients ────────────────────────────────────────────────────────────

    /// Adopt an accepted connection.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be made non-blocking.
    pub fn add_client(&mut self, stream: UnixStream) -> Result<ClientId> {
        let id = ClientId(self.next_client);
        self.next_client += 1;
        let endpoint = ClientEndpoint::new(id, stream)?;
        self.clients.insert(id, endpoint);
        Ok(id)
    }

    /// Connected client ids.
    pub fn client_ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    /// A client connection.
    pub fn client(&self, id: ClientId) -> Option<&ClientEndpoint> {
        self.clients.get(&id)
    }

    /// A client connection, mutably (reactor readiness).
    pub fn client_mut(&mut self, id: ClientId) -> Option<&mut ClientEndpoint> {
        self.clients.get_mut(&id)
    }

    /// Dispatch every queued message of `id`, then tear the client down if
    /// it is closed.
    ///
    /// Messages that arrived before a hang-up are still dispatched; a
    /// protocol error stops dispatch at once.
    pub fn process_client(&mut self, id: ClientId) {
        loop {
            let Some(client) = self.clients.get_mut(&id) else {
                return;
            };
            let Some(msg) = client.pop_inbound() else {
                break;
            };
            if let Err(e) = self.dispatch_client(id, &msg) {
                log::warn!("[broker] {id} protocol error on '{}': {e}", msg.header());
                if let Some(client) = self.clients.get_mut(&id) {
                    client.close();
                }
                break;
            }
        }
        if self.clients.get(&id).is_some_and(ClientEndpoint::is_closed) {
            self.teardown_client(id);
        }
    }

    /// Destroy every context `id` owns, then drop the connection.
    pub fn teardown_client(&mut self, id: ClientId) {
        let owned = self.contexts.owned_by(id);
        for context in owned {
            self.destroy_context(context);
        }
        if self.clients.remove(&id).is_some() {
            log::info!("[broker] {id} torn down");
        }
    }

    /// Tear down every client (shutdown).
    pub fn shutdown(&mut self) {
        for id in self.client_ids() {
            self.teardown_client(id);
        }
    }

    // ─── Engine calls ───────────────────────────────────────────────────────

    /// Run `call` against the engine of `context`, then apply what it emitted.
    ///
    /// Returns `None` if the context has no session. A reset that arrived
    /// during a round trip inside `call` is run after the events are applied.
    pub(crate) fn with_engine<R>(
        &mut self,
        context: usize,
        call: impl FnOnce(&mut dyn Engine, &mut dyn EngineHost) -> R,
    ) -> Option<R> {
        let timeout = self.config.round_trip_timeout();
        let ctx = self.contexts.get_mut(context)?;
        let session = self.sessions.get_mut(ctx.session?)?;
        let client_id = ctx.client;
        let mut host = ContextHost::new(
            context,
            self.clients.get_mut(&client_id),
            &mut ctx.counters,
            timeout,
        );
        let result = call(session.engine.as_mut(), &mut host);
        let (events, reset_requested) = host.finish();
        self.apply_events(context, events);
        if reset_requested {
            self.reset_engine(context);
        }
        Some(result)
    }

    /// Reset the engine of `context` without replying to anyone.
    pub(crate) fn reset_engine(&mut self, context: usize) {
        log::debug!("[broker] reset engine of context {context}");
        self.with_engine(context, |engine, host| engine.reset(host));
    }

    /// Tell the engine of `context` what the client can do.
    pub(crate) fn sync_capabilities(&mut self, context: usize) {
        let Some(caps) = self.contexts.get(context).map(|c| c.capabilities()) else {
            return;
        };
        self.with_engine(context, |engine, _| engine.update_client_capabilities(caps));
    }

    /// Attach a session to `context` if it has none.
    ///
    /// Shared policy attaches the shared session; dedicated policy creates
    /// one for the default provider.
    pub(crate) fn ensure_session(&mut self, context: usize) {
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        match self.policy {
            SharingPolicy::Shared(sid) => ctx.session = Some(sid),
            SharingPolicy::Dedicated => {
                if ctx.session.is_some_and(|sid| self.sessions.contains(sid)) {
                    return;
                }
                let sid =
                    self.sessions
                        .create(&self.providers, self.default_provider, &self.config.encoding);
                ctx.session = Some(sid);
                log::debug!("[broker] context {context} got dedicated {sid}");
                self.sync_capabilities(context);
            }
        }
    }

    /// Panel description of the provider behind `context`'s session.
    pub(crate) fn factory_info_for(&self, context: usize) -> FactoryInfo {
        let uuid = self
            .contexts
            .get(context)
            .and_then(|c| c.session)
            .and_then(|sid| self.sessions.get(sid))
            .map_or(self.default_provider, |s| s.provider);
        self.factory_info(uuid)
    }

    /// Panel description of a provider.
    pub(crate) fn factory_info(&self, uuid: Uuid) -> FactoryInfo {
        match self.providers.get(uuid) {
            Some(f) => FactoryInfo {
                uuid,
                name: f.name().to_string(),
                language: f.language().to_string(),
                icon: f.icon().to_string(),
            },
            None => FactoryInfo {
                uuid,
                name: String::new(),
                language: String::new(),
                icon: String::new(),
            },
        }
    }

    // ─── Focus ──────────────────────────────────────────────────────────────

    /// Focus `context`, focusing out the previous one first.
    ///
    /// The previous context's focus-out goes to the panel as its own batch
    /// before this context's batch is opened.
    pub(crate) fn focus_in(&mut self, context: usize) {
        if !self.contexts.contains(context) || self.focused == Some(context) {
            return;
        }
        if let Some(previous) = self.focused {
            self.focus_out(previous);
        }
        self.focused = Some(context);
        self.ensure_session(context);

        let shared = matches!(self.policy, SharingPolicy::Shared(_));
        let shared_enabled = self.shared_enabled;
        let Some(ctx) = self.contexts.get_mut(context) else {
            return;
        };
        if shared {
            ctx.enabled = shared_enabled;
        }
        let enabled = ctx.enabled;
        let (x, y) = ctx.cursor;
        if let Some(sid) = ctx.session {
            self.sessions.set_owner(sid, context);
        }
        log::debug!("[broker] focus in {context} (enabled: {enabled})");

        let info = self.factory_info_for(context);
        let opened = self.panel.prepare(context);
        self.panel.update_factory_info(&info);
        self.panel.focus_in(info.uuid);
        if enabled {
            self.panel.turn_on();
            self.sync_capabilities(context);
            self.with_engine(context, |engine, host| engine.focus_in(host));
        } else {
            self.panel.turn_off();
        }
        self.panel.update_spot_location(x, y);
        if opened {
            self.panel.send();
        }
    }

    /// Unfocus `context` if it is the focused one.
    pub(crate) fn focus_out(&mut self, context: usize) {
        if self.focused != Some(context) {
            return;
        }
        let enabled = self.contexts.get(context).is_some_and(|c| c.enabled);
        log::debug!("[broker] focus out {context}");
        let opened = self.panel.prepare(context);
        if enabled {
            self.with_engine(context, |engine, host| engine.focus_out(host));
        }
        self.panel.focus_out();
        if opened {
            self.panel.send();
        }
        self.focused = None;
    }

    // ─── Context lifecycle ──────────────────────────────────────────────────

    /// Destroy `context`: focus-out, tell the panel, drop a dedicated
    /// session, clear back-pointers.
    pub(crate) fn destroy_context(&mut self, context: usize) {
        if !self.contexts.contains(context) {
            return;
        }
        if self.focused == Some(context) {
            self.focus_out(context);
        }
        let opened = self.panel.prepare(context);
        self.panel.remove_input_context(context);
        if opened {
            self.panel.send();
        }
        let Some(ctx) = self.contexts.remove(context) else {
            return;
        };
        self.sessions.forget_owner(context);
        if let (SharingPolicy::Dedicated, Some(sid)) = (self.policy, ctx.session) {
            self.sessions.remove(sid);
        }
        log::debug!("[broker] context {context} destroyed");
    }

    /// Check the structural invariants between contexts, sessions and policy.
    ///
    /// # Errors
    ///
    /// Describes the first violation found.
    pub fn check_invariants(&self) -> Result<(), String> {
        if let Some(f) = self.focused {
            if !self.contexts.contains(f) {
                return Err(format!("focused context {f} is not registered"));
            }
        }
        let mut seen = BTreeMap::new();
        for ctx in self.contexts.iter() {
            let Some(sid) = ctx.session else {
                if let SharingPolicy::Shared(_) = self.policy {
                    return Err(format!("context {} has no session under shared policy", ctx.id));
                }
                continue;
            };
            if !self.sessions.contains(sid) {
                return Err(format!("context {} refers to dead {sid}", ctx.id));
            }
            match self.policy {
                SharingPolicy::Shared(shared) if shared != sid => {
                    return Err(format!("context {} refers to {sid}, not shared {shared}", ctx.id));
                }
                SharingPolicy::Dedicated => {
                    if let Some(other) = seen.insert(sid, ctx.id) {
                        return Err(format!("contexts {other} and {} share {sid}", ctx.id));
                    }
                }
                SharingPolicy::Shared(_) => {}
            }
        }
        if let SharingPolicy::Shared(sid) = self.policy {
            if !self.sessions.contains(sid) {
                return Err(format!("shared {sid} is not live"));
            }
        }
        for session in self.sessions.iter() {
            if let Some(owner) = session.owner {
                if !self.contexts.contains(owner) {
                    return Err(format!("{} points at destroyed context {owner}", session.id));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Broker wired to a socket pair client and a listening fake panel.

    use std::io::{BufRead, BufReader, Read, Write};
    use std::os::unix::net::{UnixListener, UnixStream};
    use std::time::Duration;

    use super::*;
    use crate::panel::transaction::{Transaction, TransactionDecoder};
    use crate::socket::message::Message;
    use crate::socket::{Endpoint, Interest};

    pub struct Harness {
        pub _tmp: tempfile::TempDir,
        pub broker: Broker,
        pub panel_peer: UnixStream,
        panel_decoder: TransactionDecoder,
    }

    pub struct TestClient {
        pub id: ClientId,
        pub reader: BufReader<UnixStream>,
        pub writer: UnixStream,
    }

    impl Harness {
        pub fn new(config: BrokerConfig) -> Self {
            let tmp = tempfile::TempDir::new().unwrap();
            let path = tmp.path().join("panel.sock");
            let listener = UnixListener::bind(&path).unwrap();
            let mut panel =
                PanelEndpoint::new(&path, None).with_connect_delay(Duration::from_millis(1));
            panel.connect().unwrap();
            panel.take_resync();
            let (panel_peer, _) = listener.accept().unwrap();
            panel_peer
                .set_read_timeout(Some(Duration::from_millis(200)))
                .unwrap();
            let broker = Broker::new(config, ProviderTable::with_builtin(), panel);
            Self {
                _tmp: tmp,
                broker,
                panel_peer,
                panel_decoder: TransactionDecoder::new(),
            }
        }

        pub fn client(&mut self) -> TestClient {
            let (ours, theirs) = UnixStream::pair().unwrap();
            let id = self.broker.add_client(ours).unwrap();
            theirs
                .set_read_timeout(Some(Duration::from_secs(2)))
                .unwrap();
            TestClient {
                id,
                reader: BufReader::new(theirs.try_clone().unwrap()),
                writer: theirs,
            }
        }

        /// Deliver `msg` from `client` and dispatch it.
        pub fn send(&mut self, client: &mut TestClient, msg: Message) {
            client.writer.write_all(&msg.encode()).unwrap();
            let ep = self.broker.client_mut(client.id).unwrap();
            let fd = ep.fd().unwrap();
            crate::socket::wait_fd(fd, Interest::READABLE, Duration::from_secs(2)).unwrap();
            ep.on_ready(Interest::READABLE);
            self.broker.process_client(client.id);
        }

        /// Everything the panel received so far.
        pub fn panel_batches(&mut self) -> Vec<Transaction> {
            let mut out = Vec::new();
            let mut buf = [0u8; 8192];
            loop {
                match self.panel_peer.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend(self.panel_decoder.feed(&buf[..n]).unwrap()),
                    Err(_) => break,
                }
            }
            out
        }
    }

    impl TestClient {
        pub fn recv(&mut self) -> Message {
            let mut line = String::new();
            self.reader.read_line(&mut line).unwrap();
            let mut dec = crate::socket::message::MessageDecoder::new();
            dec.feed(line.as_bytes()).unwrap().remove(0)
        }

        /// Read until a message with `header` arrives.
        pub fn recv_until(&mut self, header: &str) -> Message {
            loop {
                let msg = self.recv();
                if msg.header() == header {
                    return msg;
                }
            }
        }
    }
}
