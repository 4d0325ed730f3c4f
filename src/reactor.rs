//! Single-threaded readiness loop.
//!
//! ```text
//! loop:
//!   collect interest of listener, panel, every client
//!   poll (zero timeout if anything has PENDING work)
//!   on_ready for each ready endpoint; drop the ones that say so
//!   adopt accepted streams
//!   dispatch queued client messages, then panel transactions
//!   housekeeping tick: panel reconnect + resync, shutdown flag
//! ```
//!
//! Nothing blocks except `poll` itself and the time-boxed round-trip wait
//! inside an engine call.

// Rust guideline compliant 2026-02

use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::bridge::Broker;
use crate::constants::HOUSEKEEPING_INTERVAL;
use crate::socket::client_conn::ClientId;
use crate::socket::listener::ListenerEndpoint;
use crate::socket::{poll_fds, Endpoint, Interest};

/// What a polled descriptor belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Listener,
    Panel,
    Client(ClientId),
}

/// Owns the listener and the broker and drives both.
#[derive(Debug)]
pub struct Reactor {
    listener: Option<ListenerEndpoint>,
    broker: Broker,
    last_housekeeping: Instant,
}

impl Reactor {
    /// Reactor over an already bound listener.
    pub fn new(listener: Option<ListenerEndpoint>, broker: Broker) -> Self {
        Self {
            listener,
            broker,
            last_housekeeping: Instant::now(),
        }
    }

    /// The broker.
    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    /// The broker, mutably.
    pub fn broker_mut(&mut self) -> &mut Broker {
        &mut self.broker
    }

    /// Whether the listener is still accepting.
    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    /// Run until `shutdown` is set or the panel asks to exit. Every client
    /// is torn down on the way out, including when `poll` fails.
    ///
    /// # Errors
    ///
    /// Fails if `poll` itself fails.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        log::info!("[reactor] running");
        let mut this = scopeguard::guard(self, |reactor| {
            log::info!("[reactor] shutting down");
            reactor.broker.shutdown();
        });
        while !shutdown.load(Ordering::SeqCst) && !this.broker.exit_requested() {
            this.run_once(HOUSEKEEPING_INTERVAL)?;
        }
        Ok(())
    }

    /// One poll-and-dispatch cycle, waiting at most `max_wait`.
    ///
    /// # Errors
    ///
    /// Fails if `poll` itself fails.
    pub fn run_once(&mut self, max_wait: Duration) -> Result<()> {
        let mut slots = Vec::new();
        let mut fds = Vec::new();
        let mut pending = false;

        if let Some(listener) = &self.listener {
            pending |= watch(&mut slots, &mut fds, Slot::Listener, listener);
        }
        pending |= watch(&mut slots, &mut fds, Slot::Panel, self.broker.panel());
        for id in self.broker.client_ids() {
            if let Some(client) = self.broker.client(id) {
                pending |= watch(&mut slots, &mut fds, Slot::Client(id), client);
            }
        }

        let timeout = if pending { Duration::ZERO } else { max_wait };
        poll_fds(&mut fds, timeout).context("poll")?;

        for (slot, pollfd) in slots.iter().zip(&fds) {
            let ready = Interest::from_revents(pollfd.revents);
            if ready.is_empty() {
                continue;
            }
            match *slot {
                Slot::Listener => {
                    let keep = self.listener.as_mut().is_some_and(|l| l.on_ready(ready));
                    if !keep {
                        log::error!("[reactor] listener failed, no longer accepting clients");
                        self.listener = None;
                    }
                }
                Slot::Panel => {
                    self.broker.panel_mut().on_ready(ready);
                }
                Slot::Client(id) => {
                    if let Some(client) = self.broker.client_mut(id) {
                        client.on_ready(ready);
                    }
                }
            }
        }

        if let Some(listener) = self.listener.as_mut() {
            for stream in listener.take_accepted() {
                if let Err(e) = self.broker.add_client(stream) {
                    log::warn!("[reactor] rejected connection: {e:#}");
                }
            }
        }

        for id in self.broker.client_ids() {
            self.broker.process_client(id);
        }
        self.broker.process_panel();

        let now = Instant::now();
        if now.duration_since(self.last_housekeeping) >= HOUSEKEEPING_INTERVAL {
            self.last_housekeeping = now;
            self.housekeeping(now);
        }
        Ok(())
    }

    fn housekeeping(&mut self, now: Instant) {
        if self.broker.panel_mut().maybe_reconnect(now) {
            self.broker.process_panel();
        }
    }
}

/// Register `endpoint` for polling. Returns whether it has pending work.
fn watch(
    slots: &mut Vec<Slot>,
    fds: &mut Vec<libc::pollfd>,
    slot: Slot,
    endpoint: &dyn Endpoint,
) -> bool {
    let interest = endpoint.interest();
    if let Some(fd) = endpoint.fd() {
        slots.push(slot);
        fds.push(pollfd(fd, interest));
    }
    interest.contains(Interest::PENDING)
}

fn pollfd(fd: RawFd, interest: Interest) -> libc::pollfd {
    libc::pollfd {
        fd,
        events: interest.to_poll_events(),
        revents: 0,
    }
}
