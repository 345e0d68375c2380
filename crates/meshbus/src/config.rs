// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Meshbus global configuration - single source of truth.
//!
//! This module centralizes every wire and timing constant used by the
//! discovery protocol and the node-shared runtime, plus the environment
//! variables the core consumes. **Never hardcode these elsewhere.**

use std::net::Ipv4Addr;
use std::time::Duration;

// =======================================================================
// Discovery wire contract
// =======================================================================

/// UDP port every peer listens on for discovery datagrams.
pub const DISCOVERY_PORT: u16 = 11319;

/// Multicast group used for discovery announcements.
pub const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 7);

/// Discovery packet protocol version. A header packed with version 0 is
/// invalid on the wire.
pub const PACKET_VERSION: u16 = 1;

/// Longest discovery datagram we will receive.
pub const MAX_DATAGRAM_SIZE: usize = 65536;

// =======================================================================
// Timing
// =======================================================================

/// Default interval between heartbeat broadcasts.
pub const DEF_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(1000);

/// Default maximum silence tolerated from a peer before its entries are
/// evicted (3x heartbeat).
pub const DEF_SILENCE_INTERVAL: Duration = Duration::from_millis(3000);

/// Default interval between liveness sweeps over the activity table.
pub const DEF_ACTIVITY_INTERVAL: Duration = Duration::from_millis(100);

/// Default interval between re-advertisements of a beaconed topic.
pub const DEF_ADVERTISE_INTERVAL: Duration = Duration::from_millis(1000);

/// Poll timeout of both reception loops (discovery UDP and node-shared
/// stream sockets). Bounds how fast the threads observe the exit flag.
pub const RECEPTION_TIMEOUT: Duration = Duration::from_millis(250);

/// Settle delay after an asynchronous stream connect before the first
/// routed send. The transport completes connects in the background; a
/// send issued earlier than this can be silently unroutable.
pub const CONNECT_SETTLE: Duration = Duration::from_millis(300);

// =======================================================================
// Stream socket options
// =======================================================================

/// Linger (ms) for the long-lived sockets: discard unsent frames on
/// close so teardown never hangs.
pub const SOCKET_LINGER_MS: i32 = 0;

/// Linger (ms) for transient control/notification sockets: long enough
/// to flush the handful of queued frames through a still-handshaking
/// connect.
pub const TRANSIENT_LINGER_MS: i32 = 200;

/// Placeholder type name carried in advertisements whose payload type is
/// not known at advertise time.
pub const UNKNOWN_TYPE_NAME: &str = "unknown";

// =======================================================================
// Environment
// =======================================================================

/// `IGN_IP`: when set and non-empty, overrides host IP selection.
pub fn ip_override() -> Option<String> {
    match std::env::var("IGN_IP") {
        Ok(v) if !v.is_empty() => Some(v),
        Ok(_) => {
            log::warn!("[config] ignoring empty IGN_IP");
            None
        }
        Err(_) => None,
    }
}

/// `IGN_VERBOSE`: `"1"` enables per-event logging.
pub fn verbose() -> bool {
    std::env::var("IGN_VERBOSE").map(|v| v == "1").unwrap_or(false)
}

/// `IGN_PARTITION`: default partition applied at the facade boundary.
/// Validation happens in the facade; this just reads the raw value.
pub fn default_partition() -> Option<String> {
    std::env::var("IGN_PARTITION").ok().filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_is_a_multiple_of_heartbeat() {
        assert_eq!(
            DEF_SILENCE_INTERVAL.as_millis(),
            3 * DEF_HEARTBEAT_INTERVAL.as_millis()
        );
    }

    #[test]
    fn multicast_group_is_multicast() {
        assert!(MULTICAST_GROUP.is_multicast());
    }
}
