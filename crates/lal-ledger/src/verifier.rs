use lal_crypto::{FaultKind, HashChainVerifier};
use lal_store::BlockStore;
use lal_types::ParcelKey;
use serde::Serialize;
use tracing::{debug, error};

use crate::error::LedgerError;

/// Outcome of replaying one parcel chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub parcel_key: ParcelKey,
    pub valid: bool,
    /// `sequence_index` of the first block that failed.
    pub first_bad_sequence: Option<u64>,
    pub fault: Option<FaultKind>,
    /// Blocks examined, including the failing one.
    pub blocks_checked: usize,
    /// Blocks whose `is_valid` flag was flipped by this run.
    pub invalidated: usize,
}

/// Replays stored chains and flags the first divergence.
///
/// On failure the failing block and every later block of the chain are
/// marked invalid. `is_valid` is the only thing this ever writes.
///
/// Blocks appended while a failed chain is being marked are picked up by
/// re-reading the chain until it stops growing. A block appended after the
/// run returns is left valid until the next run.
pub struct IntegrityVerifier<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: BlockStore + ?Sized> IntegrityVerifier<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub fn verify(&self, parcel: &ParcelKey) -> Result<VerificationResult, LedgerError> {
        let history = self.store.history(parcel)?;

        let fault = match HashChainVerifier::verify_chain(&history) {
            Ok(()) => {
                debug!(%parcel, blocks = history.len(), "chain verified");
                return Ok(VerificationResult {
                    parcel_key: parcel.clone(),
                    valid: true,
                    first_bad_sequence: None,
                    fault: None,
                    blocks_checked: history.len(),
                    invalidated: 0,
                });
            }
            Err(fault) => fault,
        };

        let mut invalidated = 0;
        let mut marked_from = fault.position;
        let mut chain = history;
        while marked_from < chain.len() {
            for block in &chain[marked_from..] {
                if self.store.mark_invalid(&block.block_id)? {
                    invalidated += 1;
                }
            }
            marked_from = chain.len();
            chain = self.store.history(parcel)?;
        }

        error!(
            %parcel,
            seq = fault.sequence_index,
            fault = %fault.kind,
            invalidated,
            "integrity alert: chain diverges from stored hashes"
        );

        Ok(VerificationResult {
            parcel_key: parcel.clone(),
            valid: false,
            first_bad_sequence: Some(fault.sequence_index),
            fault: Some(fault.kind),
            blocks_checked: fault.position + 1,
            invalidated,
        })
    }

    /// Verify every parcel chain in the store, in parcel key order.
    pub fn verify_all(&self) -> Result<Vec<VerificationResult>, LedgerError> {
        self.store
            .parcels()?
            .iter()
            .map(|parcel| self.verify(parcel))
            .collect()
    }
}
