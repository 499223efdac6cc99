//! `DataTransfer` step (§4.5.1): reassembly, the injection detector, and the
//! transition into `Closing`.

use super::closing::CloseHalfState;
use super::{Connection, ConnState, Direction};
use crate::detect::injection::{self, InjectionOutcome};
use crate::packet::PacketManifest;
use crate::seqno::diff;

pub(super) fn step(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    let next = conn.next_seq(dir);
    let d = diff(pkt.seq, next);

    if d > 0 {
        overlap(conn, dir, pkt);
        return;
    }
    if d < 0 {
        log::debug!(
            "{}: future out-of-order segment (seq={}, expected={}), ignoring",
            conn.flow_for(dir),
            pkt.seq,
            next
        );
        return;
    }

    // d == 0: contiguous.
    if pkt.rst() {
        conn.state = ConnState::Closed;
        return;
    }
    if pkt.fin() {
        let advance = pkt.payload_len() as u32 + 1;
        conn.set_next_seq(dir, pkt.seq.wrapping_add(advance));
        conn.closing_flow = Some(conn.flow_for(dir));
        conn.active_half = CloseHalfState::FinWait1;
        conn.passive_half = CloseHalfState::CloseWait;
        conn.state = ConnState::Closing;
        return;
    }
    if !pkt.payload.is_empty() {
        let seq = pkt.seq;
        let payload = pkt.payload.clone();
        conn.set_next_seq(dir, seq.wrapping_add(payload.len() as u32));
        conn.sender_ring(dir).push(seq, payload);
    }
}

fn overlap(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    let flow = conn.flow_for(dir);
    let outcome = injection::check(conn.sender_ring(dir), pkt.seq, &pkt.payload);
    match outcome {
        InjectionOutcome::NoEvidence => {
            log::debug!(
                "{flow}: overlap at seq {} but no ring evidence, retrospective analysis not possible",
                pkt.seq
            );
        }
        InjectionOutcome::BenignRetransmission => {
            log::debug!("{flow}: benign retransmission at seq {}", pkt.seq);
        }
        InjectionOutcome::Injection(overlap) => {
            let start_seq = pkt.seq.wrapping_add(overlap.payload_start_offset as u32);
            let end_seq = start_seq
                .wrapping_add((overlap.payload_end_offset - overlap.payload_start_offset) as u32)
                .wrapping_sub(1);
            conn.report_injection(
                &flow,
                &pkt.payload,
                &overlap.overlap_bytes,
                start_seq,
                end_seq,
                overlap.payload_start_offset,
                overlap.payload_end_offset,
            );
        }
    }
}
