//! Rendezvous socket listener.
//!
//! Binds the well-known client socket and hands every accepted stream to the
//! reactor. On startup a path left behind by a crashed daemon is detected
//! with a short connect probe and replaced; a path answered by a live daemon
//! aborts startup.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::{Endpoint, Interest};
use crate::constants::{MAX_SOCK_PATH, PROBE_ATTEMPTS, PROBE_INTERVAL};

/// Outcome of probing an existing rendezvous path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Nothing exists at the path.
    Absent,
    /// A socket file exists but nobody accepts on it.
    Stale,
    /// Another daemon accepted the probe connection.
    Live,
}

/// Probe `path` up to `attempts` times.
///
/// A single successful connect means a live owner. Only when every attempt
/// is refused is the path considered stale.
pub fn probe(path: &Path, attempts: u32, interval: Duration) -> ProbeResult {
    if !path.exists() {
        return ProbeResult::Absent;
    }
    for attempt in 0..attempts.max(1) {
        match UnixStream::connect(path) {
            Ok(_) => return ProbeResult::Live,
            Err(e) => {
                log::debug!(
                    "[listener] probe {}/{} of {} failed: {e}",
                    attempt + 1,
                    attempts,
                    path.display()
                );
            }
        }
        std::thread::sleep(interval);
    }
    ProbeResult::Stale
}

/// Listening endpoint for the rendezvous socket.
#[derive(Debug)]
pub struct ListenerEndpoint {
    listener: UnixListener,
    path: PathBuf,
    /// Streams accepted during the last readiness cycle.
    accepted: Vec<UnixStream>,
}

impl ListenerEndpoint {
    /// Bind the rendezvous path.
    ///
    /// Validates the path length, creates the parent directory (0700),
    /// probes and removes a stale socket, binds, and restricts the socket
    /// file to its owner (0600).
    ///
    /// # Errors
    ///
    /// Fails if a live daemon already owns the path, or if binding fails.
    pub fn bind(path: &Path) -> Result<Self> {
        let path_len = path.as_os_str().len();
        if path_len >= MAX_SOCK_PATH {
            bail!(
                "Socket path too long ({path_len} bytes, max {}): {}",
                MAX_SOCK_PATH - 1,
                path.display()
            );
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create socket dir: {}", parent.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(parent, std::fs::Permissions::from_mode(0o700))
                {
                    log::warn!("[listener] cannot restrict {}: {e}", parent.display());
                }
            }
        }

        match probe(path, PROBE_ATTEMPTS, PROBE_INTERVAL) {
            ProbeResult::Live => {
                bail!("another broker is already listening on {}", path.display())
            }
            ProbeResult::Stale => {
                log::warn!("[listener] removing stale socket {}", path.display());
                std::fs::remove_file(path)
                    .with_context(|| format!("remove stale socket: {}", path.display()))?;
            }
            ProbeResult::Absent => {}
        }

        let listener = UnixListener::bind(path)
            .with_context(|| format!("bind socket: {}", path.display()))?;
        listener
            .set_nonblocking(true)
            .context("set listener non-blocking")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        log::info!("[listener] listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
            accepted: Vec::new(),
        })
    }

    /// Path of the bound socket.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the streams accepted since the last call.
    pub fn take_accepted(&mut self) -> Vec<UnixStream> {
        std::mem::take(&mut self.accepted)
    }

    /// Accept until the backlog is empty.
    ///
    /// Returns `false` on a non-transient accept error.
    fn accept_pending(&mut self) -> bool {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => self.accepted.push(stream),
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) =>
                {
                    if e.kind() == io::ErrorKind::Interrupted {
                        log::debug!("[listener] accept interrupted");
                    }
                    return true;
                }
                Err(e) => {
                    log::error!("[listener] accept failed: {e}");
                    return false;
                }
            }
        }
    }
}

impl Endpoint for ListenerEndpoint {
    fn fd(&self) -> Option<RawFd> {
        Some(self.listener.as_raw_fd())
    }

    fn interest(&self) -> Interest {
        Interest::READABLE
    }

    fn on_ready(&mut self, ready: Interest) -> bool {
        if ready.contains(Interest::ERROR) && !ready.contains(Interest::READABLE) {
            log::error!("[listener] socket error on {}", self.path.display());
            return false;
        }
        if ready.contains(Interest::READABLE) {
            return self.accept_pending();
        }
        true
    }
}

impl Drop for ListenerEndpoint {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}
