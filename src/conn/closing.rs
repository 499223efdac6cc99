//! `Closing` step (§4.5.2): the four-way close, tracked as two independent
//! half-states.
//!
//! spec.md's prose swaps the "closer side" / "remote side" headers relative
//! to which direction's *incoming* packets drive each state set; the
//! transition rules beneath each header are internally consistent with each
//! other and with scenario S6 (a client-initiated graceful close), so this
//! module implements the rules by content rather than by the (swapped)
//! headers. See DESIGN.md for the full writeup.
//!
//! `active_half` belongs to `closing_flow` (whoever sent the first FIN, the
//! active closer: `FinWait1` -> `FinWait2` -> `TimeWait`, or the simultaneous
//! `Closing` half-state). `passive_half` belongs to the other direction (the
//! passive closer: `CloseWait` -> `LastAck`).

use super::{Connection, Direction};
use crate::packet::PacketManifest;
use crate::seqno::diff;

/// Half-state of one side of a closing connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CloseHalfState {
    /// Not yet participating in the close (connection isn't `Closing` yet).
    None,
    FinWait1,
    FinWait2,
    TimeWait,
    /// Simultaneous close: this side's FIN crossed the peer's FIN+ACK.
    Closing,
    CloseWait,
    LastAck,
}

pub(super) fn step(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    let next = conn.next_seq(dir);
    if diff(pkt.seq, next) != 0 {
        log::debug!(
            "{}: out-of-order packet during close (seq={}, expected={}), dropping",
            conn.flow_for(dir),
            pkt.seq,
            next
        );
        return;
    }

    let closing_flow = match conn.closing_flow {
        Some(f) => f,
        None => {
            log::error!("Closing state with no closing_flow recorded, dropping");
            return;
        }
    };

    if conn.flow_for(dir) == closing_flow {
        step_from_active_closer(conn, dir, pkt);
    } else {
        step_from_passive_closer(conn, dir, pkt);
    }
}

/// A packet arriving from the active closer (`closing_flow`). The only
/// state this can resolve is the passive closer's `LastAck` -> done.
fn step_from_active_closer(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    match conn.passive_half {
        CloseHalfState::LastAck => {
            let expected_ack = conn.next_seq(dir.opposite());
            if pkt.ack_set() && !pkt.fin() && !pkt.syn() && diff(expected_ack, pkt.ack) == 0 {
                conn.passive_half = CloseHalfState::None;
                conn.state = super::ConnState::Closed;
            } else {
                log::debug!(
                    "{}: expected pure ACK completing LastAck, dropping mismatched packet",
                    conn.flow_for(dir)
                );
            }
        }
        CloseHalfState::CloseWait => {
            log::debug!(
                "{}: protocol anomaly, active closer sent a packet while peer is still in CloseWait",
                conn.flow_for(dir)
            );
        }
        _ => {
            log::debug!(
                "{}: unexpected passive half-state {:?} for packet from active closer",
                conn.flow_for(dir),
                conn.passive_half
            );
        }
    }
}

/// A packet arriving from the passive closer. Drives the active closer's
/// `FinWait1` -> `FinWait2` -> `TimeWait` progression (and sets the passive
/// closer's own half-state, since the same packet is also that closer's
/// outgoing FIN/ACK).
fn step_from_passive_closer(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    let expected_ack = conn.next_seq(dir.opposite());
    let ack_matches = pkt.ack_set() && diff(expected_ack, pkt.ack) == 0;

    match conn.active_half {
        CloseHalfState::FinWait1 => {
            if pkt.fin() && ack_matches {
                advance_on_fin(conn, dir, pkt);
                conn.active_half = CloseHalfState::Closing;
                conn.passive_half = CloseHalfState::LastAck;
            } else if ack_matches && !pkt.fin() {
                conn.active_half = CloseHalfState::FinWait2;
            } else {
                log::debug!(
                    "{}: expected ACK (and optionally FIN) of active closer's FIN, dropping",
                    conn.flow_for(dir)
                );
            }
        }
        CloseHalfState::FinWait2 => {
            if pkt.fin() && ack_matches {
                advance_on_fin(conn, dir, pkt);
                conn.active_half = CloseHalfState::TimeWait;
                conn.passive_half = CloseHalfState::LastAck;
            } else {
                log::debug!(
                    "{}: expected FIN+ACK completing FinWait2, dropping mismatched packet",
                    conn.flow_for(dir)
                );
            }
        }
        CloseHalfState::TimeWait | CloseHalfState::Closing => {
            log::debug!(
                "{}: packet received while active closer is in {:?}, no transition defined",
                conn.flow_for(dir),
                conn.active_half
            );
        }
        _ => {
            log::debug!(
                "{}: unexpected active half-state {:?} for packet from passive closer",
                conn.flow_for(dir),
                conn.active_half
            );
        }
    }
}

fn advance_on_fin(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    let advance = pkt.payload_len() as u32 + 1;
    conn.set_next_seq(dir, pkt.seq.wrapping_add(advance));
}

impl Direction {
    fn opposite(self) -> Direction {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }
}
