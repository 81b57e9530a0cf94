//! Path-MTU estimation by Don't-Fragment echo probing.
//!
//! The probe transport (ICMP echo) is an injected capability; this module
//! owns only the walk over the canonical packet sizes.

use std::net::IpAddr;

use crate::consts::{ICMP_HEADER_SIZE, IP_HEADER_SIZE};

use super::SocketError;

/// Standard MTUs, largest first
const PACKET_MAXIMUMS: &[u16] = &[
    65535, // Theoretical maximum, Hyperchannel
    32000, // Nothing
    17914, // 16Mb IBM Token Ring
    8166,  // IEEE 802.4
    4352,  // FDDI
    2002,  // IEEE 802.5 (4Mb recommended)
    1492,  // IEEE 802.3
    1006,  // SLIP, ARPANET
    508,   // IEEE 802/Source-Rt Bridge, ARCNET
    296,   // Point-to-Point (low delay)
    68,    // Official minimum
];

/// Result of one echo probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingOutcome {
    /// Echo reply received
    Reply,
    /// Probe was rejected as too large for the path
    TooLarge,
    /// Probe could not be carried out
    Failed,
}

/// Echo-probe capability used by the MTU walk.
pub trait Pinger {
    /// Probe `ip` with an echo of `payload_len` bytes; `dont_fragment`
    /// controls the DF bit.
    fn ping(&self, ip: IpAddr, payload_len: usize, dont_fragment: bool) -> PingOutcome;
}

/// Walk the canonical sizes downward; the first size whose probe is not
/// rejected as too large is the estimate.
pub(crate) fn walk(ip: IpAddr, pinger: &dyn Pinger) -> Result<u16, SocketError> {
    for &size in PACKET_MAXIMUMS {
        let payload = size as usize - IP_HEADER_SIZE - ICMP_HEADER_SIZE;
        match pinger.ping(ip, payload, true) {
            PingOutcome::Reply => return Ok(size),
            PingOutcome::TooLarge => continue,
            PingOutcome::Failed => return Err(SocketError::Other(-1)),
        }
    }
    Err(SocketError::Other(-1))
}
