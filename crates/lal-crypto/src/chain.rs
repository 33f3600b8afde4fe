use std::fmt;

use lal_types::{Block, Digest, ZERO_HASH};

use crate::hasher::{ContentHasher, HasherError};

/// Trait for records that participate in a hash chain.
pub trait ChainLink {
    /// Position claimed by the record within its chain.
    fn sequence_index(&self) -> u64;
    /// The record's stored hash.
    fn current_hash(&self) -> Digest;
    /// The stored hash of the preceding record ([`ZERO_HASH`] for genesis).
    fn previous_hash(&self) -> Digest;
    /// Recompute the record's hash from its stored content.
    fn recompute_hash(&self) -> Result<Digest, HasherError>;
}

impl ChainLink for Block {
    fn sequence_index(&self) -> u64 {
        self.sequence_index
    }

    fn current_hash(&self) -> Digest {
        self.current_hash
    }

    fn previous_hash(&self) -> Digest {
        self.previous_hash
    }

    fn recompute_hash(&self) -> Result<Digest, HasherError> {
        ContentHasher::hash_block(self)
    }
}

/// Hash chain integrity verifier.
///
/// Walks a chain in order with `expected_previous` starting at
/// [`ZERO_HASH`] and stops at the first record that fails. Per record:
/// 1. The recomputed hash must equal the stored `current_hash`
/// 2. The stored `previous_hash` must equal `expected_previous`
/// 3. The claimed `sequence_index` must equal the record's position
pub struct HashChainVerifier;

impl HashChainVerifier {
    /// Verify a chain of records, returning the first fault found.
    pub fn verify_chain<L: ChainLink>(links: &[L]) -> Result<(), ChainFault> {
        let mut expected_previous = ZERO_HASH;

        for (position, link) in links.iter().enumerate() {
            let fault = |kind| ChainFault {
                position,
                sequence_index: position as u64,
                claimed_index: link.sequence_index(),
                kind,
            };

            // An unhashable record cannot reproduce its stored hash.
            match link.recompute_hash() {
                Ok(computed) if computed == link.current_hash() => {}
                _ => return Err(fault(FaultKind::ContentAltered)),
            }

            if link.previous_hash() != expected_previous {
                return Err(fault(FaultKind::LinkBroken));
            }

            if link.sequence_index() != position as u64 {
                return Err(fault(FaultKind::SequenceMismatch));
            }

            expected_previous = link.current_hash();
        }

        Ok(())
    }
}

/// First point of divergence found in a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at position {position} (sequence index {sequence_index})")]
pub struct ChainFault {
    /// Zero-based position of the failing record in the replayed sequence.
    pub position: usize,
    /// Index the failing record should carry. Derived from its position,
    /// never from the record, so a forged index cannot move the fault.
    pub sequence_index: u64,
    /// The `sequence_index` stored on the failing record.
    pub claimed_index: u64,
    pub kind: FaultKind,
}

/// What kind of divergence was detected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// The record's own content no longer hashes to its stored hash.
    ContentAltered,
    /// The link to the predecessor is wrong: altered, removed, or reordered.
    LinkBroken,
    /// The stored sequence index does not match the record's position.
    SequenceMismatch,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentAltered => write!(f, "content altered"),
            Self::LinkBroken => write!(f, "broken link"),
            Self::SequenceMismatch => write!(f, "sequence mismatch"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test record for chain verification.
    struct TestLink {
        seq: u64,
        hash: Digest,
        prev: Digest,
        payload: Vec<u8>,
    }

    impl TestLink {
        fn compute(payload: &[u8], prev: Digest) -> Digest {
            let mut data = prev.as_bytes().to_vec();
            data.extend_from_slice(payload);
            ContentHasher::new("lal-test-v1").hash(&data)
        }
    }

    impl ChainLink for TestLink {
        fn sequence_index(&self) -> u64 {
            self.seq
        }
        fn current_hash(&self) -> Digest {
            self.hash
        }
        fn previous_hash(&self) -> Digest {
            self.prev
        }
        fn recompute_hash(&self) -> Result<Digest, HasherError> {
            Ok(Self::compute(&self.payload, self.prev))
        }
    }

    fn build_chain(count: usize) -> Vec<TestLink> {
        let mut chain = Vec::new();
        let mut prev = ZERO_HASH;
        for i in 0..count {
            let payload = format!("event-{i}").into_bytes();
            let hash = TestLink::compute(&payload, prev);
            chain.push(TestLink {
                seq: i as u64,
                hash,
                prev,
                payload,
            });
            prev = hash;
        }
        chain
    }

    #[test]
    fn empty_chain_is_valid() {
        let chain: Vec<TestLink> = vec![];
        assert!(HashChainVerifier::verify_chain(&chain).is_ok());
    }

    #[test]
    fn multi_link_chain_is_valid() {
        assert!(HashChainVerifier::verify_chain(&build_chain(10)).is_ok());
    }

    #[test]
    fn genesis_must_link_to_zero_hash() {
        let mut chain = build_chain(2);
        chain[0].prev = Digest::from_hash([1; 32]);
        chain[0].hash = TestLink::compute(&chain[0].payload, chain[0].prev);
        let fault = HashChainVerifier::verify_chain(&chain).unwrap_err();
        assert_eq!(fault.kind, FaultKind::LinkBroken);
        assert_eq!(fault.position, 0);
    }

    #[test]
    fn tampered_payload_detected() {
        let mut chain = build_chain(3);
        chain[1].payload = b"tampered".to_vec();
        let fault = HashChainVerifier::verify_chain(&chain).unwrap_err();
        assert_eq!(
            fault,
            ChainFault {
                position: 1,
                sequence_index: 1,
                claimed_index: 1,
                kind: FaultKind::ContentAltered
            }
        );
    }

    #[test]
    fn removed_link_detected() {
        let mut chain = build_chain(4);
        chain.remove(2);
        let fault = HashChainVerifier::verify_chain(&chain).unwrap_err();
        assert_eq!(fault.kind, FaultKind::LinkBroken);
        assert_eq!(fault.position, 2);
        assert_eq!(fault.sequence_index, 2);
        assert_eq!(fault.claimed_index, 3);
    }

    #[test]
    fn relabelled_sequence_detected() {
        let mut chain = build_chain(3);
        chain[2].seq = 7;
        let fault = HashChainVerifier::verify_chain(&chain).unwrap_err();
        assert_eq!(fault.kind, FaultKind::SequenceMismatch);
        assert_eq!(fault.sequence_index, 2);
        assert_eq!(fault.claimed_index, 7);
    }

    #[test]
    fn forged_index_reports_the_true_position() {
        let mut chain = build_chain(4);
        chain[1].seq = 9;
        let fault = HashChainVerifier::verify_chain(&chain).unwrap_err();
        assert_eq!(fault.kind, FaultKind::SequenceMismatch);
        assert_eq!(fault.position, 1);
        assert_eq!(fault.sequence_index, 1);
        assert_eq!(fault.claimed_index, 9);
    }

    #[test]
    fn fault_display_names_the_index() {
        let fault = ChainFault {
            position: 4,
            sequence_index: 4,
            claimed_index: 4,
            kind: FaultKind::LinkBroken,
        };
        assert_eq!(
            fault.to_string(),
            "broken link at position 4 (sequence index 4)"
        );
    }
}
