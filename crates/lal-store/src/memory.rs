use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use lal_types::{Block, BlockId, EventType, ParcelKey, ProjectId};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlockStore;

/// In-memory block store for tests, local demos, and embedding.
///
/// A single `RwLock` guards the chains and their indexes, so the
/// position check in [`BlockStore::append`] and the insert happen under one
/// write lock. Readers never observe a half-indexed block.
///
/// Appends to different parcels never conflict with each other. They do
/// queue on that lock for one check-and-insert, which does no I/O.
#[derive(Default)]
pub struct InMemoryBlockStore {
    inner: RwLock<StoreState>,
}

/// Location of a block: parcel chain plus position within it.
type Slot = (ParcelKey, usize);

#[derive(Default)]
struct StoreState {
    chains: HashMap<ParcelKey, Vec<Block>>,
    by_id: HashMap<BlockId, Slot>,
    by_project: HashMap<ProjectId, Vec<Slot>>,
    by_event_type: HashMap<EventType, Vec<Slot>>,
}

impl StoreState {
    fn check_append(&self, block: &Block) -> StoreResult<()> {
        if self.by_id.contains_key(&block.block_id) {
            return Err(StoreError::DuplicateBlockId(block.block_id));
        }

        let expected = self
            .chains
            .get(&block.parcel_key)
            .and_then(|chain| chain.last())
            .map_or(0, |tail| tail.sequence_index + 1);

        if block.sequence_index < expected {
            return Err(StoreError::Conflict {
                parcel_key: block.parcel_key.clone(),
                sequence_index: block.sequence_index,
            });
        }
        if block.sequence_index > expected {
            return Err(StoreError::SequenceGap {
                parcel_key: block.parcel_key.clone(),
                expected,
                found: block.sequence_index,
            });
        }
        Ok(())
    }

    fn insert(&mut self, block: Block) {
        let chain = self.chains.entry(block.parcel_key.clone()).or_default();
        let slot = (block.parcel_key.clone(), chain.len());

        self.by_id.insert(block.block_id, slot.clone());
        self.by_project
            .entry(block.project_id.clone())
            .or_default()
            .push(slot.clone());
        self.by_event_type
            .entry(block.event_type)
            .or_default()
            .push(slot);
        chain.push(block);
    }

    fn resolve(&self, slot: &Slot) -> Option<&Block> {
        self.chains.get(&slot.0).and_then(|chain| chain.get(slot.1))
    }

    fn collect_sorted<'a>(&self, slots: impl Iterator<Item = &'a Slot>) -> Vec<Block> {
        let mut blocks: Vec<Block> = slots
            .filter_map(|slot| self.resolve(slot))
            .cloned()
            .collect();
        blocks.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then_with(|| a.parcel_key.cmp(&b.parcel_key))
                .then_with(|| a.sequence_index.cmp(&b.sequence_index))
        });
        blocks
    }
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, StoreState>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Poisoned("block store"))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, StoreState>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Poisoned("block store"))
    }

    /// Run the append position checks without writing anything.
    pub(crate) fn check_append(&self, block: &Block) -> StoreResult<()> {
        self.read()?.check_append(block)
    }

    /// Index a block that was already accepted by [`Self::check_append`].
    pub(crate) fn insert_checked(&self, block: Block) -> StoreResult<()> {
        self.write()?.insert(block);
        Ok(())
    }

    /// Index a block replayed from durable storage.
    ///
    /// Blocks are kept in log order whatever their `sequence_index` says, so
    /// an edited index surfaces in chain verification instead of hiding the
    /// blocks after it. Only a repeated id is refused.
    pub(crate) fn insert_recovered(&self, block: Block) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.by_id.contains_key(&block.block_id) {
            return Err(StoreError::DuplicateBlockId(block.block_id));
        }
        state.insert(block);
        Ok(())
    }

    /// Returns `true` if the block exists and is still valid.
    pub(crate) fn is_valid(&self, block_id: &BlockId) -> StoreResult<bool> {
        let state = self.read()?;
        let slot = state
            .by_id
            .get(block_id)
            .ok_or(StoreError::BlockNotFound(*block_id))?;
        Ok(state.resolve(slot).is_some_and(|block| block.is_valid))
    }

    /// Total number of blocks across all parcels.
    pub fn block_count(&self) -> StoreResult<usize> {
        Ok(self.read()?.by_id.len())
    }
}

impl BlockStore for InMemoryBlockStore {
    fn append(&self, block: &Block) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_append(block)?;
        state.insert(block.clone());
        debug!(parcel = %block.parcel_key, seq = block.sequence_index, "block appended");
        Ok(())
    }

    fn latest(&self, parcel: &ParcelKey) -> StoreResult<Option<Block>> {
        let state = self.read()?;
        Ok(state
            .chains
            .get(parcel)
            .and_then(|chain| chain.last())
            .cloned())
    }

    fn history(&self, parcel: &ParcelKey) -> StoreResult<Vec<Block>> {
        let state = self.read()?;
        Ok(state.chains.get(parcel).cloned().unwrap_or_default())
    }

    fn by_project(&self, project: &ProjectId) -> StoreResult<Vec<Block>> {
        let state = self.read()?;
        Ok(state
            .by_project
            .get(project)
            .map(|slots| state.collect_sorted(slots.iter()))
            .unwrap_or_default())
    }

    fn by_event_type(&self, event_type: EventType) -> StoreResult<Vec<Block>> {
        let state = self.read()?;
        Ok(state
            .by_event_type
            .get(&event_type)
            .map(|slots| state.collect_sorted(slots.iter()))
            .unwrap_or_default())
    }

    fn get(&self, block_id: &BlockId) -> StoreResult<Option<Block>> {
        let state = self.read()?;
        Ok(state
            .by_id
            .get(block_id)
            .and_then(|slot| state.resolve(slot))
            .cloned())
    }

    fn mark_invalid(&self, block_id: &BlockId) -> StoreResult<bool> {
        let mut state = self.write()?;
        let (parcel, position) = state
            .by_id
            .get(block_id)
            .cloned()
            .ok_or(StoreError::BlockNotFound(*block_id))?;
        let block = state
            .chains
            .get_mut(&parcel)
            .and_then(|chain| chain.get_mut(position))
            .ok_or(StoreError::BlockNotFound(*block_id))?;

        if !block.is_valid {
            return Ok(false);
        }
        block.is_valid = false;
        debug!(%parcel, seq = block.sequence_index, "block marked invalid");
        Ok(true)
    }

    fn parcels(&self) -> StoreResult<Vec<ParcelKey>> {
        let state = self.read()?;
        let mut keys: Vec<ParcelKey> = state.chains.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    fn chain_len(&self, parcel: &ParcelKey) -> StoreResult<u64> {
        let state = self.read()?;
        Ok(state.chains.get(parcel).map_or(0, |chain| chain.len() as u64))
    }
}
