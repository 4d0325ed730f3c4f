//! Broker-side panel connection.
//!
//! # Batching
//!
//! ```text
//! prepare(ctx) ──► REQUEST U32(ctx)
//!                  <command> <data>...      (appended by each operation)
//! send()       ──► one frame on the wire, batch closed
//! ```
//!
//! Only one batch is open at a time. `prepare` returns `true` only to the
//! caller that opened the batch, and only that caller sends it, so helpers
//! that prepare for themselves nest inside a caller's batch for free. Every
//! operation is silently dropped while no batch is open.
//!
//! # Lifecycle
//!
//! ```text
//! connect() ──► connect to panel socket (bounded attempts)
//!                    │ fail
//!                    ▼
//!               spawn panel ──► connect again (bounded attempts)
//!
//! I/O error / hang-up ──► close ──► connect() right away
//! still down          ──► retried from housekeeping, once per interval
//! ```
//!
//! After every successful connect the broker replays its contexts to the
//! panel (see [`PanelEndpoint::take_resync`]).

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use uuid::Uuid;

use super::commands as cmd;
use super::launcher::PanelLauncher;
use super::transaction::{Item, Transaction, TransactionDecoder};
use crate::constants::{
    PANEL_CONNECT_ATTEMPTS, PANEL_CONNECT_DELAY, PANEL_RECONNECT_INTERVAL,
    PANEL_SPAWN_CONNECT_ATTEMPTS, READ_CHUNK,
};
use crate::engine::{Attribute, LookupTable, Property};
use crate::socket::client_conn::ClientId;
use crate::socket::{Endpoint, Interest};

/// Provider description shown on the panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FactoryInfo {
    /// Provider identity.
    pub uuid: Uuid,
    /// Display name.
    pub name: String,
    /// Language tag.
    pub language: String,
    /// Icon path or name.
    pub icon: String,
}

/// The single connection to the panel process.
#[derive(Debug)]
pub struct PanelEndpoint {
    path: PathBuf,
    launcher: Option<PanelLauncher>,
    stream: Option<UnixStream>,
    decoder: TransactionDecoder,
    outbound: Vec<u8>,
    batch: Transaction,
    batch_context: Option<usize>,
    inbound: VecDeque<Transaction>,
    last_attempt: Option<Instant>,
    connect_delay: Duration,
    needs_resync: bool,
    spawned: Vec<Child>,
}

impl PanelEndpoint {
    /// Disconnected endpoint for the panel socket at `path`.
    ///
    /// With a launcher, a failed connect spawns the panel and retries.
    pub fn new(path: &Path, launcher: Option<PanelLauncher>) -> Self {
        Self {
            path: path.to_path_buf(),
            launcher,
            stream: None,
            decoder: TransactionDecoder::new(),
            outbound: Vec::new(),
            batch: Transaction::new(),
            batch_context: None,
            inbound: VecDeque::new(),
            last_attempt: None,
            connect_delay: PANEL_CONNECT_DELAY,
            needs_resync: false,
            spawned: Vec::new(),
        }
    }

    /// Override the delay between connect attempts.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Panel socket path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a panel is connected.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Connect, spawning the panel if nobody answers.
    ///
    /// # Errors
    ///
    /// Fails if no connection could be made, including after a spawn.
    pub fn connect(&mut self) -> Result<()> {
        self.last_attempt = Some(Instant::now());
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = match self.try_connect(PANEL_CONNECT_ATTEMPTS) {
            Ok(stream) => stream,
            Err(first) => {
                let Some(launcher) = &self.launcher else {
                    return Err(first);
                };
                log::info!("[panel] no panel at {}, spawning one", self.path.display());
                self.spawned.push(launcher.spawn()?);
                self.try_connect(PANEL_SPAWN_CONNECT_ATTEMPTS)
                    .context("panel did not come up after spawn")?
            }
        };
        stream
            .set_nonblocking(true)
            .context("set panel stream non-blocking")?;
        log::info!("[panel] connected to {}", self.path.display());
        self.stream = Some(stream);
        self.decoder = TransactionDecoder::new();
        self.outbound.clear();
        self.needs_resync = true;
        Ok(())
    }

    fn try_connect(&self, attempts: u32) -> Result<UnixStream> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            if attempt > 0 {
                std::thread::sleep(self.connect_delay);
            }
            match UnixStream::connect(&self.path) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        match last_err {
            Some(e) => Err(e).with_context(|| format!("connect to panel: {}", self.path.display())),
            None => bail!("connect to panel: {}", self.path.display()),
        }
    }

    /// Housekeeping: reconnect if down and the retry interval has passed.
    ///
    /// Returns `true` if a connection was (re)established.
    pub fn maybe_reconnect(&mut self, now: Instant) -> bool {
        self.reap_spawned();
        if self.stream.is_some() {
            return false;
        }
        if self
            .last_attempt
            .is_some_and(|t| now.duration_since(t) < PANEL_RECONNECT_INTERVAL)
        {
            return false;
        }
        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                log::debug!("[panel] reconnect failed: {e:#}");
                false
            }
        }
    }

    /// Collect spawned panels that have exited.
    fn reap_spawned(&mut self) {
        self.spawned.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                log::info!("[panel] pid {} exited: {status}", child.id());
                false
            }
            Ok(None) => true,
            Err(e) => {
                log::warn!("[panel] cannot wait on pid {}: {e}", child.id());
                false
            }
        });
    }

    /// Consume the "just connected" flag.
    pub fn take_resync(&mut self) -> bool {
        std::mem::take(&mut self.needs_resync)
    }

    /// Drop the connection. Queued commands and any open batch are lost;
    /// transactions already received stay queued for dispatch.
    pub fn close(&mut self) {
        if self.stream.take().is_some() {
            log::warn!("[panel] connection to {} closed", self.path.display());
        }
        self.outbound.clear();
        self.batch.clear();
        self.batch_context = None;
    }

    /// Forget every received transaction not yet dispatched.
    pub fn discard_inbound(&mut self) {
        self.inbound.clear();
    }

    fn close_and_reconnect(&mut self) {
        self.close();
        if let Err(e) = self.connect() {
            log::warn!("[panel] reconnect failed: {e:#}");
        }
    }

    // ── Batching ────────────────────────────────────────────────────────────

    /// Open a batch for `context`.
    ///
    /// Returns `true` if this call opened it; the caller must then call
    /// [`send`](Self::send). Returns `false` if a batch is already open.
    pub fn prepare(&mut self, context: usize) -> bool {
        if self.batch_context.is_some() {
            return false;
        }
        self.batch.clear();
        self.batch
            .command(cmd::REQUEST)
            .push(Item::U32(context as u32));
        self.batch_context = Some(context);
        true
    }

    /// Context of the open batch.
    pub fn batch_context(&self) -> Option<usize> {
        self.batch_context
    }

    /// Flush the open batch and close it.
    pub fn send(&mut self) {
        if self.batch_context.take().is_none() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        if self.stream.is_none() {
            return;
        }
        // A batch with nothing past the REQUEST header is not worth a frame.
        if batch.items().len() <= 2 {
            return;
        }
        self.outbound.extend_from_slice(&batch.encode());
        if let Err(e) = self.flush() {
            log::warn!("[panel] send failed: {e:#}");
            self.close_and_reconnect();
        }
    }

    fn flush(&mut self) -> Result<()> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        while !self.outbound.is_empty() {
            match stream.write(&self.outbound) {
                Ok(0) => bail!("panel stopped accepting data"),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("write to panel"),
            }
        }
        Ok(())
    }

    fn append(&mut self, code: u32, data: Vec<Item>) {
        if self.batch_context.is_none() {
            log::trace!("[panel] {} dropped, no open batch", cmd::name(code));
            return;
        }
        self.batch.command(code);
        for item in data {
            self.batch.push(item);
        }
    }

    // ── Operations ──────────────────────────────────────────────────────────

    /// Announce a context.
    pub fn register_input_context(&mut self, client: ClientId, context: usize) {
        self.append(
            cmd::REGISTER_INPUT_CONTEXT,
            vec![Item::U32(client.0 as u32), Item::U32(context as u32)],
        );
    }

    /// Forget a context.
    pub fn remove_input_context(&mut self, context: usize) {
        self.append(cmd::REMOVE_INPUT_CONTEXT, vec![Item::U32(context as u32)]);
    }

    /// The batch context gained focus with `provider`.
    pub fn focus_in(&mut self, provider: Uuid) {
        self.append(cmd::FOCUS_IN, vec![Item::Str(provider.to_string())]);
    }

    /// The batch context lost focus.
    pub fn focus_out(&mut self) {
        self.append(cmd::FOCUS_OUT, Vec::new());
    }

    /// Composition enabled.
    pub fn turn_on(&mut self) {
        self.append(cmd::TURN_ON, Vec::new());
    }

    /// Composition disabled.
    pub fn turn_off(&mut self) {
        self.append(cmd::TURN_OFF, Vec::new());
    }

    /// Describe the active provider.
    pub fn update_factory_info(&mut self, info: &FactoryInfo) {
        self.append(
            cmd::UPDATE_FACTORY_INFO,
            vec![
                Item::Str(info.uuid.to_string()),
                Item::Str(info.name.clone()),
                Item::Str(info.language.clone()),
                Item::Str(info.icon.clone()),
            ],
        );
    }

    /// Caret moved.
    pub fn update_spot_location(&mut self, x: i32, y: i32) {
        self.append(cmd::UPDATE_SPOT_LOCATION, vec![Item::I32(x), Item::I32(y)]);
    }

    /// Show the panel preedit.
    pub fn show_preedit_string(&mut self) {
        self.append(cmd::SHOW_PREEDIT_STRING, Vec::new());
    }

    /// Hide the panel preedit.
    pub fn hide_preedit_string(&mut self) {
        self.append(cmd::HIDE_PREEDIT_STRING, Vec::new());
    }

    /// Replace the panel preedit.
    pub fn update_preedit_string(&mut self, text: &str, attrs: &[Attribute]) {
        self.append(
            cmd::UPDATE_PREEDIT_STRING,
            vec![Item::Str(text.to_string()), Item::Attrs(attrs.to_vec())],
        );
    }

    /// Move the panel preedit caret.
    pub fn update_preedit_caret(&mut self, pos: u32) {
        self.append(cmd::UPDATE_PREEDIT_CARET, vec![Item::U32(pos)]);
    }

    /// Show the aux string.
    pub fn show_aux_string(&mut self) {
        self.append(cmd::SHOW_AUX_STRING, Vec::new());
    }

    /// Hide the aux string.
    pub fn hide_aux_string(&mut self) {
        self.append(cmd::HIDE_AUX_STRING, Vec::new());
    }

    /// Replace the aux string.
    pub fn update_aux_string(&mut self, text: &str, attrs: &[Attribute]) {
        self.append(
            cmd::UPDATE_AUX_STRING,
            vec![Item::Str(text.to_string()), Item::Attrs(attrs.to_vec())],
        );
    }

    /// Show the candidate table.
    pub fn show_lookup_table(&mut self) {
        self.append(cmd::SHOW_LOOKUP_TABLE, Vec::new());
    }

    /// Hide the candidate table.
    pub fn hide_lookup_table(&mut self) {
        self.append(cmd::HIDE_LOOKUP_TABLE, Vec::new());
    }

    /// Replace the candidate table.
    pub fn update_lookup_table(&mut self, table: &LookupTable) {
        self.append(cmd::UPDATE_LOOKUP_TABLE, vec![Item::Table(table.clone())]);
    }

    /// Replace the toolbar properties.
    pub fn register_properties(&mut self, props: &[Property]) {
        self.append(cmd::REGISTER_PROPERTIES, vec![Item::Props(props.to_vec())]);
    }

    /// Update one toolbar property.
    pub fn update_property(&mut self, prop: &Property) {
        self.append(cmd::UPDATE_PROPERTY, vec![Item::Prop(prop.clone())]);
    }

    /// Start a helper.
    pub fn start_helper(&mut self, helper: Uuid) {
        self.append(cmd::START_HELPER, vec![Item::Str(helper.to_string())]);
    }

    /// Stop a helper.
    pub fn stop_helper(&mut self, helper: Uuid) {
        self.append(cmd::STOP_HELPER, vec![Item::Str(helper.to_string())]);
    }

    /// Forward an event to a helper.
    pub fn send_helper_event(&mut self, helper: Uuid, payload: &Transaction) {
        self.append(
            cmd::SEND_HELPER_EVENT,
            vec![Item::Str(helper.to_string()), Item::Nested(payload.clone())],
        );
    }

    /// Show a help text.
    pub fn show_help(&mut self, text: &str) {
        self.append(cmd::SHOW_HELP, vec![Item::Str(text.to_string())]);
    }

    /// Show the provider menu.
    pub fn show_factory_menu(&mut self, menu: &[FactoryInfo]) {
        let flat = menu
            .iter()
            .flat_map(|f| {
                [
                    f.uuid.to_string(),
                    f.name.clone(),
                    f.language.clone(),
                    f.icon.clone(),
                ]
            })
            .collect();
        self.append(cmd::SHOW_FACTORY_MENU, vec![Item::StrList(flat)]);
    }

    // ── Inbound ─────────────────────────────────────────────────────────────

    /// Next transaction received from the panel.
    pub fn pop_inbound(&mut self) -> Option<Transaction> {
        self.inbound.pop_front()
    }

    fn fill(&mut self) -> Result<bool> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(false);
        };
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    let transactions = self.decoder.feed(&buf[..n])?;
                    self.inbound.extend(transactions);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(true),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("read from panel"),
            }
        }
    }
}

impl Endpoint for PanelEndpoint {
    fn fd(&self) -> Option<RawFd> {
        self.stream.as_ref().map(AsRawFd::as_raw_fd)
    }

    fn interest(&self) -> Interest {
        let mut interest = Interest::empty();
        if self.stream.is_some() {
            interest |= Interest::READABLE;
            if !self.outbound.is_empty() {
                interest |= Interest::WRITABLE;
            }
        }
        if !self.inbound.is_empty() {
            interest |= Interest::PENDING;
        }
        interest
    }

    /// Always `true`: a broken panel connection is re-established, never
    /// unregistered.
    fn on_ready(&mut self, ready: Interest) -> bool {
        if ready.contains(Interest::WRITABLE) {
            if let Err(e) = self.flush() {
                log::warn!("[panel] write failed: {e:#}");
                self.close_and_reconnect();
                return true;
            }
        }
        if ready.intersects(Interest::READABLE | Interest::ERROR) {
            match self.fill() {
                Ok(true) => {}
                Ok(false) => {
                    log::info!("[panel] panel hung up");
                    self.close_and_reconnect();
                }
                Err(e) => {
                    log::warn!("[panel] dropping connection: {e:#}");
                    self.close_and_reconnect();
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    fn listening_panel() -> (tempfile::TempDir, UnixListener, PanelEndpoint) {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("panel.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let panel = PanelEndpoint::new(&path, None).with_connect_delay(Duration::from_millis(1));
        (tmp, listener, panel)
    }

    fn read_transactions(peer: &mut UnixStream) -> Vec<Transaction> {
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut dec = TransactionDecoder::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = peer.read(&mut buf).unwrap();
            let got = dec.feed(&buf[..n]).unwrap();
            if !got.is_empty() && !dec.has_partial() {
                return got;
            }
        }
    }

    #[test]
    fn test_ops_without_batch_are_dropped() {
        let (_tmp, listener, mut panel) = listening_panel();
        panel.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        panel.focus_in(Uuid::nil());
        panel.send();
        assert!(panel.prepare(3));
        panel.turn_on();
        panel.send();

        let got = read_transactions(&mut peer);
        assert_eq!(got.len(), 1);
        let cmds = got[0].commands().unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].code, cmd::REQUEST);
        assert_eq!(cmds[0].u32_at(0).unwrap(), 3);
        assert_eq!(cmds[1].code, cmd::TURN_ON);
    }

    #[test]
    fn test_nested_prepare_is_noop() {
        let (_tmp, listener, mut panel) = listening_panel();
        panel.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        assert!(panel.prepare(1));
        assert!(!panel.prepare(2));
        assert_eq!(panel.batch_context(), Some(1));
        panel.focus_out();
        panel.send();
        assert_eq!(panel.batch_context(), None);

        let got = read_transactions(&mut peer);
        let cmds = got[0].commands().unwrap();
        assert_eq!(cmds[0].u32_at(0).unwrap(), 1);
        assert_eq!(cmds[1].code, cmd::FOCUS_OUT);
    }

    #[test]
    fn test_connect_without_panel_fails_without_launcher() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut panel = PanelEndpoint::new(&tmp.path().join("none.sock"), None)
            .with_connect_delay(Duration::from_millis(1));
        assert!(panel.connect().is_err());
        assert!(!panel.is_connected());
        assert_eq!(panel.fd(), None);
    }

    #[test]
    fn test_reconnect_is_rate_limited() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("panel.sock");
        let mut panel =
            PanelEndpoint::new(&path, None).with_connect_delay(Duration::from_millis(1));
        let start = Instant::now();
        assert!(!panel.maybe_reconnect(start));

        let _listener = UnixListener::bind(&path).unwrap();
        assert!(!panel.maybe_reconnect(Instant::now()));
        assert!(panel.maybe_reconnect(start + PANEL_RECONNECT_INTERVAL * 2));
        assert!(panel.take_resync());
        assert!(!panel.take_resync());
    }

    #[test]
    fn test_inbound_transactions_are_queued() {
        let (_tmp, listener, mut panel) = listening_panel();
        panel.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut t = Transaction::new();
        t.command(cmd::SELECT_CANDIDATE)
            .push(Item::U32(4))
            .push(Item::U32(1));
        peer.write_all(&t.encode()).unwrap();

        let fd = panel.fd().unwrap();
        crate::socket::wait_fd(fd, Interest::READABLE, Duration::from_secs(2)).unwrap();
        assert!(panel.on_ready(Interest::READABLE));
        assert!(panel.interest().contains(Interest::PENDING));
        assert_eq!(panel.pop_inbound(), Some(t));
    }

    #[test]
    fn test_last_words_before_hangup_survive() {
        let (_tmp, listener, mut panel) = listening_panel();
        panel.connect().unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        let mut exit = Transaction::new();
        exit.command(cmd::EXIT);
        peer.write_all(&exit.encode()).unwrap();
        drop(peer);
        drop(listener);

        let fd = panel.fd().unwrap();
        crate::socket::wait_fd(fd, Interest::READABLE, Duration::from_secs(2)).unwrap();
        assert!(panel.on_ready(Interest::READABLE));
        assert!(!panel.is_connected());
        assert!(panel.interest().contains(Interest::PENDING));
        assert_eq!(panel.pop_inbound(), Some(exit));
    }

    #[test]
    fn test_exited_panel_is_reaped() {
        let tmp = tempfile::TempDir::new().unwrap();
        let launcher = PanelLauncher {
            program: "true".to_string(),
            display: ":1".to_string(),
            config_name: "simple".to_string(),
        };
        let mut panel = PanelEndpoint::new(&tmp.path().join("none.sock"), Some(launcher))
            .with_connect_delay(Duration::from_millis(1));
        assert!(panel.connect().is_err());
        assert_eq!(panel.spawned.len(), 1);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !panel.spawned.is_empty() {
            assert!(Instant::now() < deadline, "spawned panel never reaped");
            std::thread::sleep(Duration::from_millis(10));
            panel.reap_spawned();
        }
    }

    #[test]
    fn test_hangup_triggers_reconnect() {
        let (_tmp, listener, mut panel) = listening_panel();
        panel.connect().unwrap();
        let (peer, _) = listener.accept().unwrap();
        panel.take_resync();
        drop(peer);

        let fd = panel.fd().unwrap();
        crate::socket::wait_fd(fd, Interest::READABLE, Duration::from_secs(2)).unwrap();
        assert!(panel.on_ready(Interest::READABLE));
        // The listener is still there, so the reconnect succeeded.
        assert!(panel.is_connected());
        assert!(panel.take_resync());
        assert!(listener.accept().is_ok());
    }
}
