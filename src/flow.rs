//! Directed connection identifiers.
//!
//! A [`FlowKey`] identifies one direction of a TCP connection. The sender of a
//! packet owns the `src` half and the recipient owns the `dst` half; the
//! opposite direction is reached via [`FlowKey::reverse`]. Two directed keys
//! are siblings of the same connection iff one is the reverse of the other.

use std::fmt;
use std::net::Ipv4Addr;

/// Directed (src, dst) 4-tuple identifying one direction of a TCP/IPv4 flow.
///
/// Equality and hashing are defined bitwise over all four fields: unlike a
/// canonicalized 5-tuple, `FlowKey` does not collapse the two directions of a
/// connection into one value. The connection tracker relies on this to store
/// both directed keys for a single connection object (see
/// [`crate::tracker::ConnectionTracker`]).
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct FlowKey {
    pub src_ip: Ipv4Addr,
    pub src_port: u16,
    pub dst_ip: Ipv4Addr,
    pub dst_port: u16,
}

impl FlowKey {
    /// Creates a new directed flow key.
    pub fn new(src_ip: Ipv4Addr, src_port: u16, dst_ip: Ipv4Addr, dst_port: u16) -> Self {
        FlowKey {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        }
    }

    /// Returns the key for the opposite direction of this flow.
    #[inline]
    pub fn reverse(&self) -> FlowKey {
        FlowKey {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}
