//! Connection lifecycle owner.
//!
//! Maps each directed [`FlowKey`] it has seen to the shared [`Connection`]
//! object for that flow pair — per the spec invariant, exactly two directed
//! keys ever point at the same connection. A connection is created only on a
//! bare SYN and destroyed when it reaches `Closed` or when the tracker is
//! drained at shutdown. The map is the only state shared across workers if a
//! caller decides to run one `ConnectionTracker` per thread; connection
//! internals (rings, sequence counters) are never touched from more than one
//! thread at a time (§5).

use crate::config::Config;
use crate::conn::{Connection, ConnState};
use crate::flow::FlowKey;
use crate::logger::{AttackLogger, ConnectionPacketLogger};
use crate::packet::PacketManifest;

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Builds a per-connection packet logger on demand. Returning `None` means
/// "don't archive this connection's raw packets".
pub type PacketLoggerFactory = Box<dyn Fn(&FlowKey) -> Option<Box<dyn ConnectionPacketLogger>>>;

pub struct ConnectionTracker {
    table: HashMap<FlowKey, Rc<RefCell<Connection>>>,
    config: Config,
    attack_log: Rc<dyn AttackLogger>,
    packet_log_factory: Option<PacketLoggerFactory>,
    total_packets: u64,
    last_seen: HashMap<FlowKey, u64>,
}

impl ConnectionTracker {
    pub fn new(config: Config, attack_log: Rc<dyn AttackLogger>) -> Self {
        ConnectionTracker {
            table: HashMap::new(),
            config,
            attack_log,
            packet_log_factory: None,
            total_packets: 0,
            last_seen: HashMap::new(),
        }
    }

    /// Installs a factory that builds a packet logger for each newly
    /// created connection.
    pub fn with_packet_logger(mut self, factory: PacketLoggerFactory) -> Self {
        self.packet_log_factory = Some(factory);
        self
    }

    /// Number of distinct connections currently tracked.
    pub fn connection_count(&self) -> usize {
        self.last_seen.len()
    }

    /// Feeds one packet, addressed by its directed `flow`, into the
    /// tracker: looks up the owning connection (creating one on a bare SYN),
    /// dispatches the packet, and removes the connection if it has reached
    /// `Closed`.
    pub fn process(&mut self, flow: &FlowKey, pkt: PacketManifest) {
        self.total_packets += 1;

        if let Some(conn_rc) = self.table.get(flow).cloned() {
            let (client_flow, server_flow, closed) = {
                let mut conn = conn_rc.borrow_mut();
                conn.receive_packet(flow, &pkt);
                (conn.client_flow, conn.server_flow, conn.is_closed())
            };
            self.last_seen.insert(client_flow, self.total_packets);
            if closed {
                self.remove(&client_flow, &server_flow);
            }
            return;
        }

        if pkt.syn() && !pkt.ack_set() {
            self.create_and_dispatch(flow, pkt);
        } else {
            log::debug!(
                "{flow}: no tracked connection and packet is not a bare SYN, dropping"
            );
        }
    }

    fn create_and_dispatch(&mut self, flow: &FlowKey, pkt: PacketManifest) {
        let packet_logger = self
            .packet_log_factory
            .as_ref()
            .and_then(|factory| factory(flow));
        let conn = Connection::new(
            *flow,
            self.config.ring_capacity,
            self.config.first_few_packets,
            Rc::clone(&self.attack_log),
            packet_logger,
        );
        let conn = Rc::new(RefCell::new(conn));
        let client_flow = *flow;
        let server_flow = flow.reverse();
        self.table.insert(client_flow, Rc::clone(&conn));
        self.table.insert(server_flow, Rc::clone(&conn));

        let closed = {
            let mut c = conn.borrow_mut();
            c.receive_packet(flow, &pkt);
            c.is_closed()
        };
        self.last_seen.insert(client_flow, self.total_packets);
        if closed {
            self.remove(&client_flow, &server_flow);
        }
    }

    fn remove(&mut self, client_flow: &FlowKey, server_flow: &FlowKey) {
        let removed_client = self.table.remove(client_flow);
        let removed_server = self.table.remove(server_flow);
        debug_assert!(
            removed_client.is_some() && removed_server.is_some(),
            "connection must be reachable via exactly both of its directed keys on removal"
        );
        if let Some(conn) = removed_client.or(removed_server) {
            conn.borrow_mut().close();
        }
        self.last_seen.remove(client_flow);
    }

    /// Force-closes any connection stranded in `Closing` (i.e. past the
    /// handshake, not yet `Closed`) for more than
    /// `config.inactivity_timeout_packets` packets. This resolves the
    /// "TimeWait / Closing / CloseWait timers" open question with a
    /// packet-count based reaper rather than a wall-clock 2*MSL timer, since
    /// the core has no independent clock (see DESIGN.md).
    pub fn check_inactive(&mut self) {
        let Some(timeout) = self.config.inactivity_timeout_packets else {
            return;
        };
        let total_packets = self.total_packets;
        let aged_out: Vec<FlowKey> = self
            .last_seen
            .iter()
            .filter(|&(_, &last)| total_packets.saturating_sub(last) > timeout)
            .map(|(&client_flow, _)| client_flow)
            .collect();

        let stranded: Vec<(FlowKey, FlowKey)> = aged_out
            .into_iter()
            .filter_map(|client_flow| {
                self.table.get(&client_flow).and_then(|conn| {
                    let c = conn.borrow();
                    if c.state == ConnState::Closing {
                        Some((c.client_flow, c.server_flow))
                    } else {
                        None
                    }
                })
            })
            .collect();

        for (client_flow, server_flow) in stranded {
            log::info!("{client_flow}: reaping connection stranded past inactivity timeout");
            self.remove(&client_flow, &server_flow);
        }
    }

    /// Drains every remaining connection on shutdown, closing each one's log
    /// sinks exactly once.
    pub fn drain(&mut self) {
        log::info!("draining connection table ({} connections)", self.connection_count());
        let mut seen = HashSet::new();
        for conn in self.table.values() {
            if seen.insert(conn.borrow().client_flow) {
                conn.borrow_mut().close();
            }
        }
        self.table.clear();
        self.last_seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::NullAttackLogger;
    use crate::packet::{ACK, SYN};
    use std::net::Ipv4Addr;

    fn client_flow() -> FlowKey {
        FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            40000,
            Ipv4Addr::new(10, 0, 0, 2),
            80,
        )
    }

    #[test]
    fn creates_connection_on_bare_syn_only() {
        let mut tracker = ConnectionTracker::new(Config::default(), Rc::new(NullAttackLogger));
        let c = client_flow();
        tracker.process(&c, PacketManifest::new(100, 0, ACK, vec![]));
        assert_eq!(tracker.connection_count(), 0);

        tracker.process(&c, PacketManifest::new(100, 0, SYN, vec![]));
        assert_eq!(tracker.connection_count(), 1);
    }

    #[test]
    fn connection_reachable_via_both_directed_keys() {
        let mut tracker = ConnectionTracker::new(Config::default(), Rc::new(NullAttackLogger));
        let c = client_flow();
        let s = c.reverse();
        tracker.process(&c, PacketManifest::new(100, 0, SYN, vec![]));
        assert!(tracker.table.contains_key(&c));
        assert!(tracker.table.contains_key(&s));
    }

    #[test]
    fn removed_on_rst() {
        let mut tracker = ConnectionTracker::new(Config::default(), Rc::new(NullAttackLogger));
        let c = client_flow();
        let s = c.reverse();
        tracker.process(&c, PacketManifest::new(100, 0, SYN, vec![]));
        tracker.process(&s, PacketManifest::new(500, 101, SYN | ACK, vec![]));
        tracker.process(&c, PacketManifest::new(101, 501, ACK, vec![]));
        tracker.process(&c, PacketManifest::new(101, 501, ACK | crate::packet::RST, vec![]));
        assert_eq!(tracker.connection_count(), 0);
        assert!(!tracker.table.contains_key(&c));
        assert!(!tracker.table.contains_key(&s));
    }

    #[test]
    fn drain_closes_every_connection_exactly_once() {
        let mut tracker = ConnectionTracker::new(Config::default(), Rc::new(NullAttackLogger));
        let c = client_flow();
        tracker.process(&c, PacketManifest::new(100, 0, SYN, vec![]));
        tracker.drain();
        assert_eq!(tracker.connection_count(), 0);
    }
}
