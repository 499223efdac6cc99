//! Per-connection TCP state machine.
//!
//! A [`Connection`] tracks one bidirectional TCP flow end to end: the
//! three-way handshake, data transfer (with reassembly and the overlap/hijack
//! detectors wired in), and the four-way close. It is driven entirely by
//! [`Connection::receive_packet`]; nothing here performs I/O or spawns
//! threads (see the concurrency model in the crate's design notes).

mod closing;
mod data_transfer;
mod handshake;

pub use closing::CloseHalfState;

use crate::detect::hijack::FIRST_FEW_PACKETS;
use crate::flow::FlowKey;
use crate::logger::{AttackLogger, ConnectionPacketLogger};
use crate::packet::PacketManifest;
use crate::ring::SegmentRing;

use std::rc::Rc;

/// Connection-wide state, per §3/§4.5 of the design.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnState {
    Listen,
    ConnReq,
    ConnEst,
    DataTransfer,
    Closing,
    Closed,
}

/// Which side of the connection a packet belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// A tracked TCP connection.
///
/// Rings are named by *sender*: `client_ring` holds bytes the client has
/// sent, `server_ring` holds bytes the server has sent. This departs from a
/// literal "write into the opposite direction's ring" reading in favor of
/// the unambiguous naming the design notes call for; detectors always query
/// "the sender's own ring".
pub struct Connection {
    pub client_flow: FlowKey,
    pub server_flow: FlowKey,
    pub state: ConnState,

    pub(crate) client_next_seq: u32,
    pub(crate) server_next_seq: u32,
    pub(crate) hijack_next_ack: u32,

    pub(crate) packet_count: u64,
    data_transfer_packet_count: u32,

    pub(crate) closing_flow: Option<FlowKey>,
    pub(crate) active_half: CloseHalfState,
    pub(crate) passive_half: CloseHalfState,

    pub(crate) client_ring: SegmentRing,
    pub(crate) server_ring: SegmentRing,

    first_few_packets: u32,
    attack_log: Rc<dyn AttackLogger>,
    packet_log: Option<Box<dyn ConnectionPacketLogger>>,
}

impl Connection {
    /// Creates a connection in `Listen`, to be advanced by the first SYN via
    /// [`Connection::receive_packet`]. `client_flow`/`server_flow` are
    /// provisional until the first SYN sets them definitively in
    /// [`handshake::on_listen`].
    pub fn new(
        client_flow: FlowKey,
        ring_capacity: usize,
        first_few_packets: u32,
        attack_log: Rc<dyn AttackLogger>,
        packet_log: Option<Box<dyn ConnectionPacketLogger>>,
    ) -> Self {
        let server_flow = client_flow.reverse();
        Connection {
            client_flow,
            server_flow,
            state: ConnState::Listen,
            client_next_seq: 0,
            server_next_seq: 0,
            hijack_next_ack: 0,
            packet_count: 0,
            data_transfer_packet_count: 0,
            closing_flow: None,
            active_half: CloseHalfState::None,
            passive_half: CloseHalfState::None,
            client_ring: SegmentRing::new(ring_capacity),
            server_ring: SegmentRing::new(ring_capacity),
            first_few_packets,
            attack_log,
            packet_log,
        }
    }

    /// Returns `true` once the connection has reached `Closed` and should be
    /// removed from the tracker.
    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub(crate) fn direction_of(&self, flow: &FlowKey) -> Option<Direction> {
        if *flow == self.client_flow {
            Some(Direction::ClientToServer)
        } else if *flow == self.server_flow {
            Some(Direction::ServerToClient)
        } else {
            None
        }
    }

    fn next_seq(&self, dir: Direction) -> u32 {
        match dir {
            Direction::ClientToServer => self.client_next_seq,
            Direction::ServerToClient => self.server_next_seq,
        }
    }

    fn set_next_seq(&mut self, dir: Direction, value: u32) {
        match dir {
            Direction::ClientToServer => self.client_next_seq = value,
            Direction::ServerToClient => self.server_next_seq = value,
        }
    }

    fn sender_ring(&mut self, dir: Direction) -> &mut SegmentRing {
        match dir {
            Direction::ClientToServer => &mut self.client_ring,
            Direction::ServerToClient => &mut self.server_ring,
        }
    }

    fn flow_for(&self, dir: Direction) -> FlowKey {
        match dir {
            Direction::ClientToServer => self.client_flow,
            Direction::ServerToClient => self.server_flow,
        }
    }

    /// Feeds one packet, already known to belong to `flow`'s direction, into
    /// the state machine. This is total: it never returns an error and never
    /// panics on malformed-but-well-typed input (§7).
    pub fn receive_packet(&mut self, flow: &FlowKey, pkt: &PacketManifest) {
        let Some(dir) = self.direction_of(flow) else {
            log::warn!(
                "{}: packet direction does not match either known flow, dropping",
                flow
            );
            return;
        };

        self.packet_count += 1;
        if let Some(logger) = self.packet_log.as_mut() {
            logger.write_packet(&pkt.payload, flow);
        }

        match self.state {
            ConnState::Listen => handshake::on_listen(self, dir, pkt),
            ConnState::ConnReq => handshake::on_conn_req(self, dir, pkt),
            ConnState::ConnEst => {
                self.maybe_hijack(dir, pkt);
                handshake::on_conn_est(self, dir, pkt);
                if self.state == ConnState::DataTransfer {
                    self.data_transfer_packet_count = 0;
                }
            }
            ConnState::DataTransfer => {
                self.data_transfer_packet_count += 1;
                self.maybe_hijack(dir, pkt);
                data_transfer::step(self, dir, pkt);
            }
            ConnState::Closing => closing::step(self, dir, pkt),
            ConnState::Closed => {
                log::debug!("{flow}: packet received after Closed, dropping");
            }
        }
    }

    /// Runs the hijack detector if we're still within the post-handshake
    /// observation window (§4.3).
    fn maybe_hijack(&mut self, dir: Direction, pkt: &PacketManifest) {
        let within_window =
            self.state != ConnState::DataTransfer || self.data_transfer_packet_count <= self.first_few_packets;
        if !within_window {
            return;
        }
        if crate::detect::hijack::check(self.hijack_next_ack, dir, pkt) {
            let flow = self.flow_for(dir);
            self.attack_log.report_hijack(self.packet_count, &flow);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn report_injection(
        &self,
        flow: &FlowKey,
        new_payload: &[u8],
        overlap_bytes: &[u8],
        start_seq: u32,
        end_seq: u32,
        payload_start_offset: usize,
        payload_end_offset: usize,
    ) {
        self.attack_log.report_injection(
            self.packet_count,
            flow,
            new_payload,
            overlap_bytes,
            start_seq,
            end_seq,
            payload_start_offset,
            payload_end_offset,
        );
    }

    /// Closes the connection's log sinks. Called by the tracker when it
    /// removes this connection; the connection holds no reference back to
    /// the tracker (see the design notes on circular references).
    pub fn close(&mut self) {
        self.attack_log.close();
        if let Some(logger) = self.packet_log.as_mut() {
            logger.close();
        }
    }
}

// `FIRST_FEW_PACKETS` is re-exported here purely so callers constructing a
// `Connection` with the crate default don't need to import from `detect`.
pub const DEFAULT_FIRST_FEW_PACKETS: u32 = FIRST_FEW_PACKETS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullAttackLogger;
    use crate::packet::{ACK, FIN, RST, SYN};
    use std::net::Ipv4Addr;

    fn client_flow() -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            40000,
            Ipv4Addr::new(10, 0, 0, 2),
            80,
        )
    }

    fn new_conn() -> Connection {
        Connection::new(
            client_flow(),
            crate::ring::MAX_CONN_PACKETS,
            FIRST_FEW_PACKETS,
            Rc::new(NullAttackLogger),
            None,
        )
    }

    fn handshake(conn: &mut Connection) {
        let c = client_flow();
        let s = c.reverse();
        conn.receive_packet(&c, &PacketManifest::new(100, 0, SYN, vec![]));
        conn.receive_packet(&s, &PacketManifest::new(500, 101, SYN | ACK, vec![]));
        conn.receive_packet(&c, &PacketManifest::new(101, 501, ACK, vec![]));
    }

    #[test]
    fn s1_clean_handshake() {
        let mut conn = new_conn();
        handshake(&mut conn);
        assert_eq!(conn.state, ConnState::DataTransfer);
        assert_eq!(conn.client_next_seq, 101);
        assert_eq!(conn.server_next_seq, 501);
    }

    #[test]
    fn unexpected_direction_in_listen_is_dropped_silently() {
        let mut conn = new_conn();
        let unrelated = FlowKey::new(
            Ipv4Addr::new(192, 168, 0, 1),
            1,
            Ipv4Addr::new(192, 168, 0, 2),
            2,
        );
        conn.receive_packet(&unrelated, &PacketManifest::new(1, 0, SYN, vec![]));
        assert_eq!(conn.state, ConnState::Listen);
    }

    #[test]
    fn rst_during_data_transfer_closes_connection() {
        let mut conn = new_conn();
        handshake(&mut conn);
        let c = client_flow();
        conn.receive_packet(&c, &PacketManifest::new(101, 501, ACK | RST, vec![]));
        assert_eq!(conn.state, ConnState::Closed);
        assert!(conn.is_closed());
    }

    #[test]
    fn s2_duplicate_synack_during_data_transfer_is_a_hijack() {
        let mut conn = new_conn();
        handshake(&mut conn);
        let s = client_flow().reverse();
        conn.receive_packet(&s, &PacketManifest::new(999, 101, SYN | ACK, vec![]));
        assert_eq!(conn.state, ConnState::DataTransfer);
        // No observable hijack counter on Connection itself; NullAttackLogger
        // swallows the report, so this just asserts the packet didn't
        // perturb the data-transfer sequence counters.
        assert_eq!(conn.server_next_seq, 501);
    }

    #[test]
    fn s6_graceful_close() {
        let mut conn = new_conn();
        handshake(&mut conn);
        let c = client_flow();
        let s = c.reverse();

        conn.receive_packet(&c, &PacketManifest::new(101, 501, ACK | FIN, vec![]));
        assert_eq!(conn.state, ConnState::Closing);
        assert_eq!(conn.active_half, CloseHalfState::FinWait1);
        assert_eq!(conn.passive_half, CloseHalfState::CloseWait);

        conn.receive_packet(&s, &PacketManifest::new(501, 102, ACK | FIN, vec![]));
        assert_eq!(conn.state, ConnState::Closing);
        assert_eq!(conn.passive_half, CloseHalfState::LastAck);

        conn.receive_packet(&c, &PacketManifest::new(102, 502, ACK, vec![]));
        assert_eq!(conn.state, ConnState::Closed);
    }
}
