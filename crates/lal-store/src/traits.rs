use std::sync::Arc;

use lal_types::{Block, BlockId, EventType, ParcelKey, ProjectId};

use crate::error::StoreResult;

/// Persistence for ordered, append-only parcel chains.
///
/// All implementations must satisfy these invariants:
/// - `append` writes a block only if its `sequence_index` is exactly one past
///   the chain's current tail (0 for an empty chain). An occupied position
///   yields `Conflict`; a skipped one yields `SequenceGap`.
/// - Written blocks are never changed except for `is_valid`, which only ever
///   moves from `true` to `false`.
/// - Reads return owned copies; callers cannot mutate stored blocks.
pub trait BlockStore: Send + Sync {
    /// Persist a new block at the tail of its parcel's chain.
    fn append(&self, block: &Block) -> StoreResult<()>;

    /// The highest-`sequence_index` block for the parcel, if any.
    fn latest(&self, parcel: &ParcelKey) -> StoreResult<Option<Block>>;

    /// Every block for the parcel in ascending `sequence_index` order.
    fn history(&self, parcel: &ParcelKey) -> StoreResult<Vec<Block>>;

    /// Every block for the project across parcels, ordered by `occurred_at`.
    ///
    /// Ties are broken by parcel key, then sequence index.
    fn by_project(&self, project: &ProjectId) -> StoreResult<Vec<Block>>;

    /// Every block of the given event type, ordered by `occurred_at`.
    fn by_event_type(&self, event_type: EventType) -> StoreResult<Vec<Block>>;

    /// Look up a block by id.
    fn get(&self, block_id: &BlockId) -> StoreResult<Option<Block>>;

    /// Flip `is_valid` to `false`.
    ///
    /// Returns `true` if the flag changed, `false` if the block was already
    /// invalid. Unknown ids are an error.
    fn mark_invalid(&self, block_id: &BlockId) -> StoreResult<bool>;

    /// All parcel keys with at least one block, sorted.
    fn parcels(&self) -> StoreResult<Vec<ParcelKey>>;

    /// Number of blocks in the parcel's chain.
    fn chain_len(&self, parcel: &ParcelKey) -> StoreResult<u64> {
        Ok(self.history(parcel)?.len() as u64)
    }
}

impl<S: BlockStore + ?Sized> BlockStore for Arc<S> {
    fn append(&self, block: &Block) -> StoreResult<()> {
        (**self).append(block)
    }

    fn latest(&self, parcel: &ParcelKey) -> StoreResult<Option<Block>> {
        (**self).latest(parcel)
    }

    fn history(&self, parcel: &ParcelKey) -> StoreResult<Vec<Block>> {
        (**self).history(parcel)
    }

    fn by_project(&self, project: &ProjectId) -> StoreResult<Vec<Block>> {
        (**self).by_project(project)
    }

    fn by_event_type(&self, event_type: EventType) -> StoreResult<Vec<Block>> {
        (**self).by_event_type(event_type)
    }

    fn get(&self, block_id: &BlockId) -> StoreResult<Option<Block>> {
        (**self).get(block_id)
    }

    fn mark_invalid(&self, block_id: &BlockId) -> StoreResult<bool> {
        (**self).mark_invalid(block_id)
    }

    fn parcels(&self) -> StoreResult<Vec<ParcelKey>> {
        (**self).parcels()
    }

    fn chain_len(&self, parcel: &ParcelKey) -> StoreResult<u64> {
        (**self).chain_len(parcel)
    }
}
