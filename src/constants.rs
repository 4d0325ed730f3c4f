//! Application-wide constants for imbroker.
//!
//! This module centralizes the timeouts, limits and protocol identifiers
//! shared by the reactor, the endpoints and the round-trip machinery.
//!
//! # Categories
//!
//! - **Protocol**: compatibility version baked into the rendezvous path
//! - **Timeouts**: round trips, connect probes, panel reconnects
//! - **Polling**: reactor housekeeping and round-trip poll slices
//! - **Limits**: frame and path size caps

use std::time::Duration;

// ============================================================================
// Protocol
// ============================================================================

/// Client protocol compatibility version.
///
/// Part of the rendezvous path so a client built against an incompatible
/// protocol never reaches this broker.
pub const PROTOCOL_VERSION: &str = "0.4";

/// Text encoding every engine session is created with.
pub const DEFAULT_ENCODING: &str = "UTF-8";

// ============================================================================
// Timeouts
// ============================================================================

/// Hard deadline for a round-trip text operation (surrounding text).
///
/// Past this the engine is told "no answer" and the late reply is suppressed.
pub const ROUND_TRIP_TIMEOUT: Duration = Duration::from_secs(3);

/// Connect timeout of a single liveness probe against an existing
/// rendezvous path.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Number of liveness probes before a rendezvous path is declared stale.
pub const PROBE_ATTEMPTS: u32 = 3;

/// Connect attempts against the panel socket before spawning the panel.
pub const PANEL_CONNECT_ATTEMPTS: u32 = 3;

/// Connect attempts against the panel socket after spawning the panel.
pub const PANEL_SPAWN_CONNECT_ATTEMPTS: u32 = 20;

/// Delay between panel connect attempts.
pub const PANEL_CONNECT_DELAY: Duration = Duration::from_millis(100);

/// Minimum spacing between background panel reconnect attempts.
pub const PANEL_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Polling
// ============================================================================

/// Reactor housekeeping tick.
///
/// The reactor never blocks longer than this, so the shutdown flag and the
/// panel reconnect timer are checked at least this often.
pub const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for a single poll slice inside a round-trip wait.
pub const ROUND_TRIP_POLL_SLICE: Duration = Duration::from_millis(20);

// ============================================================================
// Limits
// ============================================================================

/// Maximum size of a single client message frame (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Maximum size of a panel transaction payload (16 MB).
pub const MAX_TRANSACTION_SIZE: u32 = 16 * 1024 * 1024;

/// How deep helper transactions may nest inside one another.
pub const MAX_TRANSACTION_NESTING: usize = 16;

/// Maximum path length for a Unix domain socket (macOS kernel limit).
pub const MAX_SOCK_PATH: usize = 104;

/// Read buffer size for socket reads.
pub const READ_CHUNK: usize = 16 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_deadline_exceeds_poll_slice() {
        assert!(ROUND_TRIP_TIMEOUT > ROUND_TRIP_POLL_SLICE);
    }

    #[test]
    fn test_housekeeping_is_shorter_than_reconnect_interval() {
        assert!(HOUSEKEEPING_INTERVAL < PANEL_RECONNECT_INTERVAL);
    }
}
