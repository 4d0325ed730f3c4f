//! Socket endpoints multiplexed by the reactor.
//!
//! Every endpoint owns one file descriptor, declares which readiness events
//! it wants, and handles them when they fire. The reactor polls the union of
//! all interests and drops an endpoint as soon as its handler says so.
//!
//! # Architecture
//!
//! ```text
//! Client processes                         imbroker
//! ┌──────────────┐                ┌───────────────────────────┐
//! │ text field A │◄──lines──────► │ ClientEndpoint (A)        │
//! │ text field B │◄──lines──────► │ ClientEndpoint (B)        │
//! └──────────────┘                │ ListenerEndpoint          │
//!        connect ───────────────► │  (rendezvous socket)      │
//!                                 └───────────────────────────┘
//! ```
//!
//! # Wire Protocol
//!
//! Newline-terminated, space-separated, escaped text. See [`message`].

pub mod client_conn;
pub mod headers;
pub mod listener;
pub mod message;

use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

bitflags::bitflags! {
    /// Readiness events an endpoint is interested in (or that fired).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interest: u8 {
        /// Bytes can be read (or a connection accepted).
        const READABLE = 1 << 0;
        /// Buffered output can be written.
        const WRITABLE = 1 << 1;
        /// Peer hang-up or socket error.
        const ERROR = 1 << 2;
        /// Decoded messages are queued from an earlier cycle.
        ///
        /// Software-only: never handed to `poll`, but forces a zero timeout
        /// so queued work is drained before the reactor blocks again.
        const PENDING = 1 << 3;
    }
}

impl Interest {
    /// Translate to `poll(2)` request bits.
    pub fn to_poll_events(self) -> libc::c_short {
        let mut events = 0;
        if self.contains(Self::READABLE) {
            events |= libc::POLLIN;
        }
        if self.contains(Self::WRITABLE) {
            events |= libc::POLLOUT;
        }
        events
    }

    /// Translate `poll(2)` result bits.
    pub fn from_revents(revents: libc::c_short) -> Self {
        let mut ready = Self::empty();
        if revents & libc::POLLIN != 0 {
            ready |= Self::READABLE;
        }
        if revents & libc::POLLOUT != 0 {
            ready |= Self::WRITABLE;
        }
        if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
            ready |= Self::ERROR;
        }
        ready
    }
}

/// Uniform view over the listener, client and panel sockets.
pub trait Endpoint {
    /// Descriptor to poll, or `None` while disconnected.
    fn fd(&self) -> Option<RawFd>;

    /// Events this endpoint currently wants.
    fn interest(&self) -> Interest;

    /// Handle fired events. Returns `false` if the endpoint must be dropped.
    fn on_ready(&mut self, ready: Interest) -> bool;
}

/// Block in `poll(2)` for at most `timeout`.
///
/// `EINTR` is reported as zero ready descriptors.
pub fn poll_fds(fds: &mut [libc::pollfd], timeout: Duration) -> io::Result<usize> {
    let millis = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    // SAFETY: `fds` is a valid, exclusively borrowed slice of pollfd structs
    // and its length is passed alongside the pointer.
    let n = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, millis) };
    if n < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(err);
    }
    Ok(n as usize)
}

/// Wait for a single descriptor.
pub fn wait_fd(fd: RawFd, interest: Interest, timeout: Duration) -> io::Result<Interest> {
    let mut pollfd = [libc::pollfd {
        fd,
        events: interest.to_poll_events(),
        revents: 0,
    }];
    if poll_fds(&mut pollfd, timeout)? == 0 {
        return Ok(Interest::empty());
    }
    Ok(Interest::from_revents(pollfd[0].revents))
}
