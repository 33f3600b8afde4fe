use lal_store::BlockStore;
use lal_types::{Block, ParcelKey};
use tracing::{debug, warn};

use crate::error::LedgerError;

/// Appends blocks onto a parcel's tail, retrying lost races.
///
/// Each attempt reads the current tail, lets the caller build a block
/// against it, and appends. A `Conflict` from the store means another
/// writer took the position first; the tail is re-read and the block
/// rebuilt, up to `conflict_retries` times.
pub struct ChainWriter<'a, S: ?Sized> {
    store: &'a S,
    conflict_retries: u32,
}

impl<'a, S: BlockStore + ?Sized> ChainWriter<'a, S> {
    pub fn new(store: &'a S, conflict_retries: u32) -> Self {
        Self {
            store,
            conflict_retries,
        }
    }

    /// Build against the tail and append.
    ///
    /// `build` returns `Ok(None)` to skip the write entirely, which ends the
    /// loop without touching the store.
    pub fn append_with<F>(&self, parcel: &ParcelKey, mut build: F) -> Result<Option<Block>, LedgerError>
    where
        F: FnMut(Option<&Block>) -> Result<Option<Block>, LedgerError>,
    {
        let attempts = self.conflict_retries.saturating_add(1);
        for attempt in 1..=attempts {
            let tail = self.store.latest(parcel)?;
            let Some(block) = build(tail.as_ref())? else {
                return Ok(None);
            };

            match self.store.append(&block) {
                Ok(()) => {
                    debug!(
                        %parcel,
                        seq = block.sequence_index,
                        event = %block.event_type,
                        attempt,
                        "block appended"
                    );
                    return Ok(Some(block));
                }
                Err(e) if e.is_conflict() => {
                    debug!(%parcel, seq = block.sequence_index, attempt, "append lost race; retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        warn!(%parcel, attempts, "conflict retries exhausted");
        Err(LedgerError::ConflictRetriesExhausted {
            parcel_key: parcel.clone(),
            attempts,
        })
    }
}
