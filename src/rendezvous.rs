//! Rendezvous socket paths.
//!
//! Both sockets live in a per-user directory under `/tmp`:
//!
//! ```text
//! /tmp/imbroker-<euid>/<version>@<host>:<display>.<screen>   (clients)
//! /tmp/imbroker-<euid>/panel@<host>:<display>                 (panel)
//! ```
//!
//! Distinct display sessions of one user never share a path, and a client
//! built against another protocol version never finds this broker.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::constants::{MAX_SOCK_PATH, PROTOCOL_VERSION};

/// Environment variable overriding the panel socket path.
pub const PANEL_SOCKET_ENV: &str = "IMBROKER_PANEL_SOCKET";

/// A parsed `DISPLAY` value: `[host]:display[.screen]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayInfo {
    /// Host part, or the local host name when the display names none.
    pub host: String,
    /// Display number.
    pub display: u32,
    /// Screen number (0 when absent).
    pub screen: u32,
    /// The unparsed value, handed to the panel on spawn.
    pub raw: String,
}

impl DisplayInfo {
    /// Parse a display string.
    ///
    /// # Errors
    ///
    /// Fails if the colon or the display number is missing or not numeric.
    pub fn parse(raw: &str) -> Result<Self> {
        let (host, rest) = raw
            .rsplit_once(':')
            .with_context(|| format!("display '{raw}' has no ':'"))?;
        let (display, screen) = match rest.split_once('.') {
            Some((d, s)) => (d, Some(s)),
            None => (rest, None),
        };
        let display = display
            .parse::<u32>()
            .with_context(|| format!("display '{raw}' has an invalid display number"))?;
        let screen = match screen {
            Some(s) => s
                .parse::<u32>()
                .with_context(|| format!("display '{raw}' has an invalid screen number"))?,
            None => 0,
        };
        let host = if host.is_empty() {
            local_host_name()
        } else {
            host.to_string()
        };
        Ok(Self {
            host,
            display,
            screen,
            raw: raw.to_string(),
        })
    }

    /// Resolve from an explicit value, `$DISPLAY`, or `:0`.
    ///
    /// # Errors
    ///
    /// Fails if the chosen value does not parse.
    pub fn resolve(explicit: Option<&str>) -> Result<Self> {
        match explicit {
            Some(raw) => Self::parse(raw),
            None => {
                let raw = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
                Self::parse(&raw)
            }
        }
    }
}

fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// Per-user socket directory, `/tmp/imbroker-<euid>`.
pub fn socket_dir() -> PathBuf {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    PathBuf::from(format!("/tmp/imbroker-{euid}"))
}

/// Client rendezvous path inside `dir`.
///
/// # Errors
///
/// Fails if the resulting path exceeds the socket path limit.
pub fn client_socket_path_in(dir: &Path, info: &DisplayInfo) -> Result<PathBuf> {
    let name = format!(
        "{PROTOCOL_VERSION}@{}:{}.{}",
        info.host, info.display, info.screen
    );
    checked(dir.join(name))
}

/// Client rendezvous path for `info`.
///
/// # Errors
///
/// Fails if the resulting path exceeds the socket path limit.
pub fn client_socket_path(info: &DisplayInfo) -> Result<PathBuf> {
    client_socket_path_in(&socket_dir(), info)
}

/// Panel socket path for `info`, honouring [`PANEL_SOCKET_ENV`].
///
/// # Errors
///
/// Fails if the resulting path exceeds the socket path limit.
pub fn panel_socket_path(info: &DisplayInfo) -> Result<PathBuf> {
    if let Ok(explicit) = std::env::var(PANEL_SOCKET_ENV) {
        if !explicit.is_empty() {
            return checked(PathBuf::from(explicit));
        }
    }
    checked(socket_dir().join(format!("panel@{}:{}", info.host, info.display)))
}

fn checked(path: PathBuf) -> Result<PathBuf> {
    let len = path.as_os_str().len();
    if len > MAX_SOCK_PATH {
        bail!(
            "socket path too long ({len} > {MAX_SOCK_PATH}): {}",
            path.display()
        );
    }
    Ok(path)
}
