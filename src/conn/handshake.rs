//! `Listen` / `ConnReq` / `ConnEst` transitions (the three-way handshake).

use super::{Connection, ConnState, Direction};
use crate::packet::PacketManifest;
use crate::seqno::diff;

/// `Listen`: the first packet of a connection must be a bare SYN. Anything
/// else is a handshake anomaly and is silently dropped (§7) — a passive
/// observer may simply have missed earlier packets.
pub(super) fn on_listen(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    if dir != Direction::ClientToServer || !pkt.syn() || pkt.ack_set() {
        log::debug!("Listen: expected bare SYN from client, dropping anomalous packet");
        return;
    }
    let next = pkt.seq.wrapping_add(pkt.payload_len() as u32).wrapping_add(1);
    conn.client_next_seq = next;
    conn.hijack_next_ack = next;
    conn.state = ConnState::ConnReq;
}

/// `ConnReq`: waiting for the server's SYN-ACK.
pub(super) fn on_conn_req(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    if dir != Direction::ServerToClient || !pkt.syn() || !pkt.ack_set() {
        log::debug!("ConnReq: expected SYN-ACK from server, dropping anomalous packet");
        return;
    }
    if diff(conn.client_next_seq, pkt.ack) != 0 {
        log::debug!("ConnReq: SYN-ACK ack does not match client's ISN+1, dropping");
        return;
    }
    conn.server_next_seq = pkt.seq.wrapping_add(pkt.payload_len() as u32).wrapping_add(1);
    conn.state = ConnState::ConnEst;
}

/// `ConnEst`: waiting for the client's final ACK. The hijack detector has
/// already been consulted by the caller (see [`Connection::receive_packet`])
/// before this runs.
pub(super) fn on_conn_est(conn: &mut Connection, dir: Direction, pkt: &PacketManifest) {
    if dir != Direction::ClientToServer || pkt.syn() || !pkt.ack_set() {
        return;
    }
    if diff(conn.client_next_seq, pkt.seq) == 0 && diff(conn.server_next_seq, pkt.ack) == 0 {
        conn.state = ConnState::DataTransfer;
    }
}
