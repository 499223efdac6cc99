//! Segment veto / content injection detector (§4.4).
//!
//! Triggered when a new segment's sequence range overlaps bytes the sender
//! has already sent. Compares the previously-observed bytes for that range
//! to the new segment's payload; a mismatch is an injection, an exact match
//! is a benign retransmission, and no prior evidence is logged but not
//! reported (the ring may simply have rotated the relevant cell out).

use crate::ring::{Overlap, SegmentRing};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionOutcome {
    /// The ring holds no segment overlapping the new one's range.
    NoEvidence,
    /// The overlapping bytes match exactly.
    BenignRetransmission,
    /// The overlapping bytes differ: a likely injection.
    Injection(Overlap),
}

/// Compares `payload` (starting at `seq`) against what `ring` has already
/// recorded for the sender, the ring must belong to the *same* sender whose
/// segment is being checked (§9 design notes: rings are named by sender).
pub fn check(ring: &SegmentRing, seq: u32, payload: &[u8]) -> InjectionOutcome {
    match ring.extract_overlap(seq, payload) {
        None => InjectionOutcome::NoEvidence,
        Some(overlap) => {
            let new_slice = &payload[overlap.payload_start_offset..overlap.payload_end_offset];
            if new_slice == overlap.overlap_bytes.as_slice() {
                InjectionOutcome::BenignRetransmission
            } else {
                InjectionOutcome::Injection(overlap)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_retransmission_is_benign() {
        let mut ring = SegmentRing::new(40);
        ring.push(101, b"HELLO".to_vec());
        assert_eq!(
            check(&ring, 101, b"HELLO"),
            InjectionOutcome::BenignRetransmission
        );
    }

    #[test]
    fn differing_payload_is_an_injection() {
        let mut ring = SegmentRing::new(40);
        ring.push(101, b"HELLO".to_vec());
        let outcome = check(&ring, 101, b"HXLLO");
        match outcome {
            InjectionOutcome::Injection(overlap) => {
                assert_eq!(overlap.overlap_bytes, b"HELLO");
                assert_eq!(overlap.payload_start_offset, 0);
                assert_eq!(overlap.payload_end_offset, 5);
            }
            other => panic!("expected Injection, got {other:?}"),
        }
    }

    #[test]
    fn empty_ring_yields_no_evidence() {
        let ring = SegmentRing::new(40);
        assert_eq!(check(&ring, 101, b"HELLO"), InjectionOutcome::NoEvidence);
    }
}
