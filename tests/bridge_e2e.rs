//! End-to-end tests: real sockets, the reactor, a fake panel and line clients.
//!
//! Run with: cargo test --test bridge_e2e

use std::io::{BufRead, BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use imbroker::context::RoundTripKind;
use imbroker::engine::key::{keysym, KeyEvent, KeyMask};
use imbroker::engine::provider::ProviderTable;
use imbroker::panel::commands as cmd;
use imbroker::panel::{Item, PanelEndpoint, Transaction, TransactionDecoder};
use imbroker::socket::headers as h;
use imbroker::socket::listener::ListenerEndpoint;
use imbroker::socket::message::{Message, MessageDecoder};
use imbroker::{Broker, BrokerConfig, Reactor};
use tempfile::TempDir;

/// Broker behind a real listener, with the test holding the panel side.
struct Daemon {
    _tmp: TempDir,
    reactor: Reactor,
    socket: PathBuf,
    panel: UnixStream,
    decoder: TransactionDecoder,
}

impl Daemon {
    fn start(config: BrokerConfig) -> Self {
        let tmp = TempDir::new().unwrap();
        let panel_path = tmp.path().join("panel.sock");
        let panel_listener = UnixListener::bind(&panel_path).unwrap();
        let mut endpoint =
            PanelEndpoint::new(&panel_path, None).with_connect_delay(Duration::from_millis(1));
        endpoint.connect().unwrap();
        let (panel, _) = panel_listener.accept().unwrap();
        panel
            .set_read_timeout(Some(Duration::from_millis(200)))
            .unwrap();

        let socket = tmp.path().join("broker.sock");
        let listener = ListenerEndpoint::bind(&socket).unwrap();
        let broker = Broker::new(config, ProviderTable::with_builtin(), endpoint);
        Self {
            _tmp: tmp,
            reactor: Reactor::new(Some(listener), broker),
            socket,
            panel,
            decoder: TransactionDecoder::new(),
        }
    }

    fn connect(&mut self) -> Client {
        let stream = UnixStream::connect(&self.socket).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        let before = self.reactor.broker().client_ids().len();
        self.pump_until(|b| b.client_ids().len() > before);
        Client::new(stream)
    }

    fn broker(&self) -> &Broker {
        self.reactor.broker()
    }

    /// A few reactor cycles, enough to read and dispatch what was written.
    fn settle(&mut self) {
        for _ in 0..5 {
            self.reactor.run_once(Duration::from_millis(5)).unwrap();
        }
    }

    fn pump_until(&mut self, done: impl Fn(&Broker) -> bool) {
        let deadline = Instant::now() + Duration::from_secs(3);
        while !done(self.reactor.broker()) {
            assert!(Instant::now() < deadline, "broker never reached the expected state");
            self.reactor.run_once(Duration::from_millis(10)).unwrap();
        }
    }

    /// Send `msg` and return the first reply carrying `header`.
    fn request(&mut self, client: &mut Client, msg: &Message, header: &str) -> Message {
        client.send(msg);
        self.settle();
        client.recv_until(header)
    }

    /// Write a transaction from the panel side.
    fn panel_sends(&mut self, transaction: &Transaction) {
        self.panel.write_all(&transaction.encode()).unwrap();
    }

    /// Transactions the panel has received since the last call.
    fn panel_batches(&mut self) -> Vec<Transaction> {
        let mut out = Vec::new();
        let mut buf = [0u8; 8192];
        loop {
            match self.panel.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => out.extend(self.decoder.feed(&buf[..n]).unwrap()),
            }
        }
        out
    }
}

/// One client connection speaking the line protocol.
struct Client {
    reader: BufReader<UnixStream>,
    writer: UnixStream,
    decoder: MessageDecoder,
}

impl Client {
    fn new(stream: UnixStream) -> Self {
        Self {
            reader: BufReader::new(stream.try_clone().unwrap()),
            writer: stream,
            decoder: MessageDecoder::new(),
        }
    }

    fn send(&mut self, msg: &Message) {
        self.writer.write_all(&msg.encode()).unwrap();
    }

    fn recv(&mut self) -> Message {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).unwrap();
        assert!(n > 0, "broker closed the connection");
        self.decoder.feed(line.as_bytes()).unwrap().remove(0)
    }

    fn recv_until(&mut self, header: &str) -> Message {
        loop {
            let msg = self.recv();
            if msg.header() == header {
                return msg;
            }
        }
    }
}

fn register(daemon: &mut Daemon, client: &mut Client) -> usize {
    let reply = daemon.request(
        client,
        &Message::new(h::REGISTER_IMCONTEXT),
        h::IMCONTEXT_REGISTERED,
    );
    reply.get(0).unwrap().parse().unwrap()
}

/// `(context, opcodes)` per batch.
fn summarize(batches: &[Transaction]) -> Vec<(u32, Vec<u32>)> {
    batches
        .iter()
        .map(|t| {
            let cmds = t.commands().unwrap();
            assert_eq!(cmds[0].code, cmd::REQUEST);
            let context = cmds[0].u32_at(0).unwrap();
            (context, cmds[1..].iter().map(|c| c.code).collect())
        })
        .collect()
}

fn position(codes: &[u32], code: u32) -> Option<usize> {
    codes.iter().position(|c| *c == code)
}

// ============================================================================
// Ordering scenarios
// ============================================================================

#[test]
fn test_enable_then_focus_reaches_panel_as_one_batch() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut a = daemon.connect();
    let mut last = 0;
    for _ in 0..8 {
        last = register(&mut daemon, &mut a);
    }
    assert_eq!(last, 7);
    daemon.panel_batches();

    daemon.request(
        &mut a,
        &Message::new(h::ENABLE_IMCONTEXT).arg(7),
        h::IMCONTEXT_ENABLED,
    );
    daemon.request(&mut a, &Message::new(h::CHANGE_FOCUS).arg(7), h::FOCUS_CHANGED);

    let batches = summarize(&daemon.panel_batches());
    assert!(!batches.is_empty());
    assert!(batches.iter().all(|(ctx, _)| *ctx == 7), "{batches:?}");
    let (_, codes) = batches
        .iter()
        .find(|(_, codes)| codes.contains(&cmd::FOCUS_IN))
        .unwrap();
    let focus_in = position(codes, cmd::FOCUS_IN).unwrap();
    let turn_on = position(codes, cmd::TURN_ON).unwrap();
    assert!(focus_in < turn_on);
}

#[test]
fn test_focus_out_precedes_next_focus_in() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut a = daemon.connect();
    for _ in 0..5 {
        register(&mut daemon, &mut a);
    }
    daemon.request(&mut a, &Message::new(h::CHANGE_FOCUS).arg(3), h::FOCUS_CHANGED);
    daemon.panel_batches();

    daemon.request(&mut a, &Message::new(h::CHANGE_FOCUS).arg(4), h::FOCUS_CHANGED);
    let batches = summarize(&daemon.panel_batches());
    let out = batches
        .iter()
        .position(|(ctx, codes)| *ctx == 3 && codes.contains(&cmd::FOCUS_OUT))
        .expect("focus-out of 3");
    let into = batches
        .iter()
        .position(|(ctx, codes)| *ctx == 4 && codes.contains(&cmd::FOCUS_IN))
        .expect("focus-in of 4");
    assert!(out < into);
    assert_eq!(daemon.broker().focused(), Some(4));
}

#[test]
fn test_dropping_connection_destroys_its_contexts() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut a = daemon.connect();
    let mut b = daemon.connect();
    for _ in 0..3 {
        register(&mut daemon, &mut b);
    }
    let three = register(&mut daemon, &mut a);
    let four = register(&mut daemon, &mut a);
    assert_eq!((three, four), (3, 4));
    daemon.request(&mut a, &Message::new(h::CHANGE_FOCUS).arg(3), h::FOCUS_CHANGED);
    daemon.panel_batches();

    drop(a);
    daemon.pump_until(|b| b.client_ids().len() == 1);
    assert_eq!(daemon.broker().contexts().len(), 3);
    assert!(!daemon.broker().contexts().contains(3));
    assert!(!daemon.broker().contexts().contains(4));
    assert_eq!(daemon.broker().focused(), None);

    let batches = summarize(&daemon.panel_batches());
    let out = batches
        .iter()
        .position(|(ctx, codes)| *ctx == 3 && codes.contains(&cmd::FOCUS_OUT))
        .expect("focus-out of 3");
    let removed: Vec<usize> = batches
        .iter()
        .enumerate()
        .filter(|(_, (_, codes))| codes.contains(&cmd::REMOVE_INPUT_CONTEXT))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(removed.len(), 2);
    assert!(out < removed[0]);

    // The survivor keeps working.
    let again = register(&mut daemon, &mut b);
    assert_eq!(again, 3);
}

#[test]
fn test_interleaved_focus_from_two_connections() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut a = daemon.connect();
    let mut b = daemon.connect();
    let ours = [register(&mut daemon, &mut a), register(&mut daemon, &mut a)];
    let theirs = [register(&mut daemon, &mut b), register(&mut daemon, &mut b)];
    daemon.panel_batches();

    let order = [ours[0], theirs[0], theirs[1], ours[1], ours[0], theirs[1]];
    for ctx in order {
        let client = if ours.contains(&ctx) { &mut a } else { &mut b };
        client.send(&Message::new(h::CHANGE_FOCUS).arg(ctx));
    }
    daemon.settle();

    // Replay the panel's view: focus-in only ever lands on an unfocused panel.
    let mut focused: Option<u32> = None;
    for (ctx, codes) in summarize(&daemon.panel_batches()) {
        for code in codes {
            match code {
                cmd::FOCUS_OUT => {
                    assert_eq!(focused, Some(ctx));
                    focused = None;
                }
                cmd::FOCUS_IN => {
                    assert_eq!(focused, None, "two contexts focused at once");
                    focused = Some(ctx);
                }
                _ => {}
            }
        }
    }
    assert_eq!(focused, Some(theirs[1] as u32));
    assert_eq!(daemon.broker().focused(), Some(theirs[1]));
}

#[test]
fn test_panel_key_for_unfocused_context_moves_focus_cleanly() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut a = daemon.connect();
    let first = register(&mut daemon, &mut a);
    let second = register(&mut daemon, &mut a);
    daemon.request(&mut a, &Message::new(h::CHANGE_FOCUS).arg(first), h::FOCUS_CHANGED);
    daemon.panel_batches();

    let mut key = Transaction::new();
    key.command(cmd::PROCESS_KEY_EVENT)
        .push(Item::U32(second as u32))
        .push(Item::Key(KeyEvent::new(0x61, KeyMask::empty())));
    daemon.panel_sends(&key);
    daemon.settle();

    // Disabled context: the key goes back to the client.
    let forwarded = a.recv_until(h::FORWARD_KEY_EVENT);
    assert_eq!(forwarded.get(0), Some(second.to_string().as_str()));
    assert_eq!(daemon.broker().focused(), Some(second));

    let batches = summarize(&daemon.panel_batches());
    for (ctx, codes) in &batches {
        if codes.contains(&cmd::FOCUS_OUT) {
            assert_eq!(*ctx, first as u32, "focus-out filed under {ctx}: {batches:?}");
        }
        if codes.contains(&cmd::FOCUS_IN) {
            assert_eq!(*ctx, second as u32, "focus-in filed under {ctx}: {batches:?}");
        }
    }
    let out = batches
        .iter()
        .position(|(_, codes)| codes.contains(&cmd::FOCUS_OUT))
        .expect("focus-out of the first context");
    let into = batches
        .iter()
        .position(|(_, codes)| codes.contains(&cmd::FOCUS_IN))
        .expect("focus-in of the second context");
    assert!(out < into);
}

#[test]
fn test_panel_exit_right_before_hangup_is_honoured() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let mut exit = Transaction::new();
    exit.command(cmd::EXIT);
    daemon.panel_sends(&exit);
    daemon.panel.shutdown(Shutdown::Both).unwrap();

    daemon.pump_until(Broker::exit_requested);
    assert!(!daemon.broker().panel().is_connected());
}

// ============================================================================
// Surrounding-text round trips
// ============================================================================

fn shift_backspace(ctx: usize) -> Message {
    Message::new(h::HANDLE_KEY_EVENT)
        .arg(ctx)
        .arg(keysym::BACKSPACE)
        .arg("true")
        .arg("shift")
}

/// Drive the reactor until the scripted client thread finishes.
fn run_script(daemon: &mut Daemon, script: thread::JoinHandle<()>) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !script.is_finished() {
        assert!(Instant::now() < deadline, "client script stalled");
        daemon.reactor.run_once(Duration::from_millis(10)).unwrap();
    }
    script.join().unwrap();
}

fn prepare_focused(client: &mut Client) {
    client.send(&Message::new(h::REGISTER_IMCONTEXT));
    client.recv_until(h::IMCONTEXT_REGISTERED);
    client.send(&Message::new(h::ENABLE_IMCONTEXT).arg(0));
    client.recv_until(h::IMCONTEXT_ENABLED);
    client.send(&Message::new(h::CHANGE_FOCUS).arg(0));
    client.recv_until(h::FOCUS_CHANGED);
}

#[test]
fn test_reconvert_round_trips_through_client() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let stream = UnixStream::connect(&daemon.socket).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let script = thread::spawn(move || {
        let mut c = Client::new(stream);
        prepare_focused(&mut c);

        c.send(&shift_backspace(0));
        let get = c.recv_until(h::GET_SURROUNDING_TEXT);
        assert_eq!(get.arguments(), ["0", "1", "0"]);
        c.send(
            &Message::new(h::SURROUNDING_TEXT_GOTTEN)
                .arg(0)
                .arg("true")
                .arg(2)
                .arg("xA"),
        );
        let delete = c.recv_until(h::DELETE_SURROUNDING_TEXT);
        assert_eq!(delete.arguments(), ["0", "-1", "1"]);
        c.send(&Message::new(h::SURROUNDING_TEXT_DELETED).arg(0).arg("true"));

        let preedit = c.recv_until(h::SET_PREEDIT_STRING);
        assert_eq!(preedit.get(1), Some("U+41"));
        let handled = c.recv_until(h::KEY_EVENT_HANDLED);
        assert_eq!(handled.get(0), Some("true"));
    });
    run_script(&mut daemon, script);
}

#[test]
fn test_late_reply_is_never_delivered() {
    let mut daemon = Daemon::start(BrokerConfig {
        round_trip_timeout_ms: 100,
        ..BrokerConfig::default()
    });
    let stream = UnixStream::connect(&daemon.socket).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let script = thread::spawn(move || {
        let mut c = Client::new(stream);
        prepare_focused(&mut c);

        // Ignore the first request: the engine gets no answer.
        c.send(&shift_backspace(0));
        c.recv_until(h::GET_SURROUNDING_TEXT);
        let handled = c.recv_until(h::KEY_EVENT_HANDLED);
        assert_eq!(handled.get(0), Some("false"));

        // Answer it late, then answer the next request properly.
        c.send(
            &Message::new(h::SURROUNDING_TEXT_GOTTEN)
                .arg(0)
                .arg("true")
                .arg(2)
                .arg("xA"),
        );
        c.send(&shift_backspace(0));
        c.recv_until(h::GET_SURROUNDING_TEXT);
        c.send(
            &Message::new(h::SURROUNDING_TEXT_GOTTEN)
                .arg(0)
                .arg("true")
                .arg(2)
                .arg("xB"),
        );
        c.recv_until(h::DELETE_SURROUNDING_TEXT);
        c.send(&Message::new(h::SURROUNDING_TEXT_DELETED).arg(0).arg("true"));

        let preedit = c.recv_until(h::SET_PREEDIT_STRING);
        assert_eq!(preedit.get(1), Some("U+42"));
        let handled = c.recv_until(h::KEY_EVENT_HANDLED);
        assert_eq!(handled.get(0), Some("true"));
    });
    run_script(&mut daemon, script);

    let ctx = daemon.broker().contexts().get(0).unwrap();
    assert_eq!(ctx.counters.pending(RoundTripKind::GetSurroundingText), 0);
}

#[test]
fn test_reset_during_round_trip_is_acknowledged() {
    let mut daemon = Daemon::start(BrokerConfig::default());
    let stream = UnixStream::connect(&daemon.socket).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let script = thread::spawn(move || {
        let mut c = Client::new(stream);
        prepare_focused(&mut c);

        c.send(&shift_backspace(0));
        c.recv_until(h::GET_SURROUNDING_TEXT);
        c.send(&Message::new(h::RESET_IMCONTEXT).arg(0));
        let reset = c.recv_until(h::IMCONTEXT_RESETED);
        assert_eq!(reset.get(0), Some("0"));
        c.send(
            &Message::new(h::SURROUNDING_TEXT_GOTTEN)
                .arg(0)
                .arg("true")
                .arg(1)
                .arg("z"),
        );
        c.recv_until(h::DELETE_SURROUNDING_TEXT);
        c.send(&Message::new(h::SURROUNDING_TEXT_DELETED).arg(0).arg("true"));
        c.recv_until(h::KEY_EVENT_HANDLED);
    });
    run_script(&mut daemon, script);
    assert!(daemon.broker().check_invariants().is_ok());
}
