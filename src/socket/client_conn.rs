//! Per-connection state for client processes.
//!
//! Each accepted connection gets a `ClientEndpoint` that owns the
//! non-blocking stream, the line decoder, a FIFO of decoded messages not yet
//! dispatched, and the unflushed outbound bytes.
//!
//! # Round trips
//!
//! Engines ask for surrounding text synchronously. [`ClientEndpoint::round_trip`]
//! sends the request and then waits on this one socket with a hard deadline,
//! flushing and reading in short slices. Messages that arrive meanwhile are
//! sorted:
//!
//! - the matching reply ends the wait (unless it is owed to a request that
//!   already timed out, in which case it is dropped)
//! - a reset of the same context is acknowledged at once and reported back
//! - anything else is queued for the reactor

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use super::headers;
use super::message::{Message, MessageDecoder};
use super::{wait_fd, Endpoint, Interest};
use crate::constants::{READ_CHUNK, ROUND_TRIP_POLL_SLICE};
use crate::context::round_trip::{RoundTripCounters, RoundTripKind};
use crate::error::ProtocolError;

/// Process-unique identifier of a client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// Result of a round trip.
#[derive(Debug, Default)]
pub struct RoundTripOutcome {
    /// The matching reply, or `None` on timeout or disconnect.
    pub reply: Option<Message>,
    /// A reset for the same context arrived (and was acknowledged) while
    /// waiting.
    pub reset_requested: bool,
}

/// Broker-side connection state for one client process.
pub struct ClientEndpoint {
    id: ClientId,
    stream: UnixStream,
    decoder: MessageDecoder,
    inbound: VecDeque<Message>,
    outbound: Vec<u8>,
    closed: bool,
}

impl fmt::Debug for ClientEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEndpoint")
            .field("id", &self.id)
            .field("queued", &self.inbound.len())
            .field("unflushed", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl ClientEndpoint {
    /// Wrap an accepted stream.
    ///
    /// # Errors
    ///
    /// Fails if the stream cannot be switched to non-blocking mode.
    pub fn new(id: ClientId, stream: UnixStream) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .context("set client stream non-blocking")?;
        log::info!("[client] {id} connected");
        Ok(Self {
            id,
            stream,
            decoder: MessageDecoder::new(),
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            closed: false,
        })
    }

    /// Connection identifier.
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Whether the connection is dead and must be torn down.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the connection dead (protocol error).
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Queue a message and try to flush it right away.
    pub fn send(&mut self, msg: &Message) {
        if self.closed {
            return;
        }
        log::trace!("[client] {} <- {}", self.id, msg.header());
        self.outbound.extend_from_slice(&msg.encode());
        if let Err(e) = self.flush() {
            log::warn!("[client] {} write failed: {e:#}", self.id);
            self.closed = true;
        }
    }

    /// Write as much buffered output as the socket takes without blocking.
    ///
    /// # Errors
    ///
    /// Returns an error on a non-transient write failure.
    pub fn flush(&mut self) -> Result<()> {
        while !self.outbound.is_empty() {
            match self.stream.write(&self.outbound) {
                Ok(0) => anyhow::bail!("peer stopped accepting data"),
                Ok(n) => {
                    self.outbound.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("write to client"),
            }
        }
        Ok(())
    }

    /// Next decoded message awaiting dispatch.
    pub fn pop_inbound(&mut self) -> Option<Message> {
        self.inbound.pop_front()
    }

    /// Whether decoded messages are queued.
    pub fn has_pending(&self) -> bool {
        !self.inbound.is_empty()
    }

    /// Whether output is still buffered.
    pub fn has_unflushed(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Read everything available and decode it.
    ///
    /// Sets the closed flag on EOF. Bytes left without a terminator at EOF
    /// are reported as a truncated frame.
    ///
    /// # Errors
    ///
    /// Returns an error on a read failure or a malformed frame.
    fn fill(&mut self) -> Result<Vec<Message>> {
        let mut messages = Vec::new();
        let mut buf = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    if let Err(e) = self.decoder.finish() {
                        log::warn!("[client] {} closed mid-frame: {e}", self.id);
                    }
                    log::info!("[client] {} disconnected", self.id);
                    return Ok(messages);
                }
                Ok(n) => {
                    let decoded = self
                        .decoder
                        .feed(&buf[..n])
                        .map_err(|e| ProtocolError::codec(&e))?;
                    messages.extend(decoded);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(messages),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e).context("read from client"),
            }
        }
    }

    /// Send `request` and wait for the matching reply on this socket.
    ///
    /// Replies still owed for earlier timed-out requests of the same kind
    /// are discarded first, whether already queued or arriving during the
    /// wait. On timeout the owed counter is bumped and no answer is returned.
    pub fn round_trip(
        &mut self,
        context: usize,
        request: &Message,
        kind: RoundTripKind,
        counters: &mut RoundTripCounters,
        timeout: Duration,
    ) -> RoundTripOutcome {
        let mut outcome = RoundTripOutcome::default();
        if self.closed {
            return outcome;
        }

        // Stale replies or a reset may already be sitting in the queue.
        let queued = std::mem::take(&mut self.inbound);
        for msg in queued {
            if is_for(&msg, kind.reply_header(), context) && counters.take_stale(kind) {
                log::debug!("[client] {} dropped stale {}", self.id, msg.header());
            } else if is_for(&msg, headers::RESET_IMCONTEXT, context) {
                self.ack_reset(context, &mut outcome);
            } else {
                self.inbound.push_back(msg);
            }
        }

        self.send(request);
        let deadline = Instant::now() + timeout;

        while !self.closed && outcome.reply.is_none() {
            if let Err(e) = self.flush() {
                log::warn!("[client] {} write failed during round trip: {e:#}", self.id);
                self.closed = true;
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let mut want = Interest::READABLE;
            if self.has_unflushed() {
                want |= Interest::WRITABLE;
            }
            let slice = (deadline - now).min(ROUND_TRIP_POLL_SLICE);
            let ready = match wait_fd(self.stream.as_raw_fd(), want, slice) {
                Ok(ready) => ready,
                Err(e) => {
                    log::warn!("[client] {} poll failed during round trip: {e}", self.id);
                    self.closed = true;
                    break;
                }
            };
            if !ready.intersects(Interest::READABLE | Interest::ERROR) {
                continue;
            }
            let arrived = match self.fill() {
                Ok(arrived) => arrived,
                Err(e) => {
                    log::warn!("[client] {} read failed during round trip: {e:#}", self.id);
                    self.closed = true;
                    break;
                }
            };
            for msg in arrived {
                if outcome.reply.is_none() && is_for(&msg, kind.reply_header(), context) {
                    if counters.take_stale(kind) {
                        log::debug!("[client] {} dropped stale {}", self.id, msg.header());
                    } else {
                        outcome.reply = Some(msg);
                    }
                } else if is_for(&msg, headers::RESET_IMCONTEXT, context) {
                    self.ack_reset(context, &mut outcome);
                } else {
                    self.inbound.push_back(msg);
                }
            }
        }

        if outcome.reply.is_none() && !self.closed {
            log::warn!(
                "[client] {} {} for context {context} timed out",
                self.id,
                kind.request_header()
            );
            counters.suppress(kind);
        }
        outcome
    }

    fn ack_reset(&mut self, context: usize, outcome: &mut RoundTripOutcome) {
        log::debug!("[client] {} reset of {context} during round trip", self.id);
        self.send(&Message::new(headers::IMCONTEXT_RESETED).arg(context));
        outcome.reset_requested = true;
    }
}

fn is_for(msg: &Message, header: &str, context: usize) -> bool {
    msg.header() == header && msg.get(0).and_then(|s| s.parse::<usize>().ok()) == Some(context)
}

impl Endpoint for ClientEndpoint {
    fn fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }

    fn interest(&self) -> Interest {
        let mut interest = Interest::READABLE;
        if self.has_unflushed() {
            interest |= Interest::WRITABLE;
        }
        if self.has_pending() {
            interest |= Interest::PENDING;
        }
        interest
    }

    fn on_ready(&mut self, ready: Interest) -> bool {
        if ready.contains(Interest::WRITABLE) {
            if let Err(e) = self.flush() {
                log::warn!("[client] {} write failed: {e:#}", self.id);
                self.closed = true;
            }
        }
        if ready.intersects(Interest::READABLE | Interest::ERROR) && !self.closed {
            match self.fill() {
                Ok(messages) => self.inbound.extend(messages),
                Err(e) => {
                    log::warn!("[client] {} dropped: {e:#}", self.id);
                    self.closed = true;
                }
            }
        }
        !self.closed
    }
}
