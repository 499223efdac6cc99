//! Handshake hijack detector (§4.3).
//!
//! A genuine three-way handshake produces exactly one SYN-ACK carrying the
//! ack value recorded at SYN time (`hijack_next_ack`). A second SYN-ACK
//! carrying that same ack value means a second responder is racing the
//! first to complete the handshake and steal the session.

use crate::conn::Direction;
use crate::packet::PacketManifest;
use crate::seqno::diff;

/// Number of packets after entering `DataTransfer` during which the caller
/// should keep consulting this detector; beyond that, a duplicate SYN-ACK is
/// indistinguishable from unrelated retransmission noise.
pub const FIRST_FEW_PACKETS: u32 = 12;

/// Returns `true` if `pkt` looks like a second, racing SYN-ACK.
pub fn check(hijack_next_ack: u32, dir: Direction, pkt: &PacketManifest) -> bool {
    if dir != Direction::ServerToClient {
        return false;
    }
    if !(pkt.syn() && pkt.ack_set()) {
        return false;
    }
    diff(hijack_next_ack, pkt.ack) == 0
}
