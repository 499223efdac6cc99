//! Offline packet source: reads Ethernet/IPv4/TCP frames out of a pcap file
//! and turns each one into a directed [`FlowKey`] plus [`PacketManifest`].
//!
//! This is the one concrete header-parsing implementation the crate ships,
//! used only by [`crate::bin`]'s offline driver; the core state machine in
//! [`crate::conn`] never sees raw bytes. Parsing is plain safe slice
//! indexing rather than the teacher's `repr(C, packed)` + DPDK mbuf
//! approach, since there's no mbuf to borrow from here (see DESIGN.md).

use crate::error::InquisitorError;
use crate::flow::FlowKey;
use crate::packet::PacketManifest;

use std::net::Ipv4Addr;
use std::path::Path;

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPV4_PROTOCOL_TCP: u8 = 6;
const IPV4_MF_FLAG: u16 = 0x2000;
const IPV4_FRAG_OFFSET_MASK: u16 = 0x1FFF;

/// Reads frames from an offline pcap file, one [`pcap::Capture`] at a time.
pub struct PacketSource {
    cap: pcap::Capture<pcap::Offline>,
}

impl PacketSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, InquisitorError> {
        let path = path.as_ref();
        let cap = pcap::Capture::from_file(path).map_err(|source| InquisitorError::PcapOpen {
            path: path.display().to_string(),
            source,
        })?;
        Ok(PacketSource { cap })
    }

    /// Returns the next parseable TCP/IPv4 packet, skipping anything else
    /// (non-IPv4, non-TCP, fragmented, or truncated frames) with a debug
    /// log. Returns `None` once the file is exhausted.
    pub fn next_packet(&mut self) -> Option<(FlowKey, PacketManifest)> {
        loop {
            let raw = match self.cap.next_packet() {
                Ok(pkt) => pkt.data.to_vec(),
                Err(pcap::Error::NoMorePackets) => return None,
                Err(e) => {
                    log::warn!("error reading next packet from pcap file: {e}");
                    return None;
                }
            };
            match parse_frame(&raw) {
                Some(parsed) => return Some(parsed),
                None => continue,
            }
        }
    }
}

fn parse_frame(frame: &[u8]) -> Option<(FlowKey, PacketManifest)> {
    if frame.len() < ETHERNET_HEADER_LEN + 20 {
        log::debug!("frame too short to hold an Ethernet+IPv4 header, dropping");
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }
    parse_ipv4(&frame[ETHERNET_HEADER_LEN..])
}

fn parse_ipv4(ip_frame: &[u8]) -> Option<(FlowKey, PacketManifest)> {
    if ip_frame.len() < 20 {
        return None;
    }
    let version = ip_frame[0] >> 4;
    if version != 4 {
        return None;
    }
    let ihl = ((ip_frame[0] & 0x0f) as usize) * 4;
    if ihl < 20 || ip_frame.len() < ihl {
        log::debug!("malformed IPv4 header length {ihl}, dropping");
        return None;
    }

    let flags_frag = u16::from_be_bytes([ip_frame[6], ip_frame[7]]);
    let is_first_fragment = flags_frag & IPV4_FRAG_OFFSET_MASK == 0;
    let more_fragments = flags_frag & IPV4_MF_FLAG != 0;
    if !is_first_fragment || more_fragments {
        log::debug!("fragmented IPv4 datagram, dropping (reassembly out of scope)");
        return None;
    }

    let protocol = ip_frame[9];
    if protocol != IPV4_PROTOCOL_TCP {
        return None;
    }

    let total_length = u16::from_be_bytes([ip_frame[2], ip_frame[3]]) as usize;
    let src_ip = Ipv4Addr::new(ip_frame[12], ip_frame[13], ip_frame[14], ip_frame[15]);
    let dst_ip = Ipv4Addr::new(ip_frame[16], ip_frame[17], ip_frame[18], ip_frame[19]);

    if ip_frame.len() < total_length || total_length < ihl {
        log::debug!("IPv4 total length inconsistent with captured bytes, dropping");
        return None;
    }

    parse_tcp(&ip_frame[ihl..total_length], src_ip, dst_ip)
}

fn parse_tcp(tcp_frame: &[u8], src_ip: Ipv4Addr, dst_ip: Ipv4Addr) -> Option<(FlowKey, PacketManifest)> {
    if tcp_frame.len() < 20 {
        log::debug!("frame too short to hold a TCP header, dropping");
        return None;
    }
    let src_port = u16::from_be_bytes([tcp_frame[0], tcp_frame[1]]);
    let dst_port = u16::from_be_bytes([tcp_frame[2], tcp_frame[3]]);
    let seq = u32::from_be_bytes([tcp_frame[4], tcp_frame[5], tcp_frame[6], tcp_frame[7]]);
    let ack = u32::from_be_bytes([tcp_frame[8], tcp_frame[9], tcp_frame[10], tcp_frame[11]]);
    let data_offset = ((tcp_frame[12] & 0xf0) >> 4) as usize * 4;
    let flags = tcp_frame[13];

    if data_offset < 20 || tcp_frame.len() < data_offset {
        log::debug!("malformed TCP data offset {data_offset}, dropping");
        return None;
    }
    let payload = tcp_frame[data_offset..].to_vec();

    let flow = FlowKey::new(src_ip, src_port, dst_ip, dst_port);
    let manifest = PacketManifest::new(seq, ack, flags, payload);
    Some((flow, manifest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{ACK, SYN};

    fn ipv4_tcp_frame(seq: u32, ack: u32, flags: u8, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0u8; ETHERNET_HEADER_LEN];
        frame[12] = 0x08;
        frame[13] = 0x00;

        let tcp_len = 20 + payload.len();
        let total_length = 20 + tcp_len;

        let mut ip = vec![0u8; 20];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&(total_length as u16).to_be_bytes());
        ip[8] = 64;
        ip[9] = IPV4_PROTOCOL_TCP;
        ip[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&1234u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        tcp[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp[8..12].copy_from_slice(&ack.to_be_bytes());
        tcp[12] = 5 << 4;
        tcp[13] = flags;
        tcp.extend_from_slice(payload);

        frame.extend_from_slice(&ip);
        frame.extend_from_slice(&tcp);
        frame
    }

    #[test]
    fn parses_a_well_formed_syn() {
        let frame = ipv4_tcp_frame(100, 0, SYN, &[]);
        let (flow, pkt) = parse_frame(&frame).expect("should parse");
        assert_eq!(flow.src_ip, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(flow.dst_ip, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(flow.src_port, 1234);
        assert_eq!(flow.dst_port, 80);
        assert_eq!(pkt.seq, 100);
        assert!(pkt.syn());
    }

    #[test]
    fn parses_payload_bytes() {
        let frame = ipv4_tcp_frame(101, 501, ACK, b"hello");
        let (_, pkt) = parse_frame(&frame).expect("should parse");
        assert_eq!(pkt.payload, b"hello");
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = ipv4_tcp_frame(100, 0, SYN, &[]);
        frame[12] = 0x86;
        frame[13] = 0xdd;
        assert!(parse_frame(&frame).is_none());
    }

    #[test]
    fn rejects_truncated_frame() {
        let frame = vec![0u8; 10];
        assert!(parse_frame(&frame).is_none());
    }
}
