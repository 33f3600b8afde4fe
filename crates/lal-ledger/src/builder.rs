use chrono::{DateTime, Utc};
use lal_crypto::ContentHasher;
use lal_types::{
    ActorId, Block, BlockId, EventType, Metadata, ParcelKey, ProjectId, ZERO_HASH,
};

use crate::error::LedgerError;

/// Caller-supplied content of a block that has not been linked yet.
#[derive(Clone, Debug, PartialEq)]
pub struct EventDraft {
    pub parcel_key: ParcelKey,
    pub event_type: EventType,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub project_id: ProjectId,
}

/// Constructs the next block of a parcel chain.
///
/// Pure apart from block id generation; never touches a store.
pub struct ChainBuilder;

impl ChainBuilder {
    /// Link `draft` onto `prior`, the current chain tail (or `None` for an
    /// empty chain), and compute its hash.
    pub fn build_next(prior: Option<&Block>, draft: &EventDraft) -> Result<Block, LedgerError> {
        let (sequence_index, previous_hash) = match prior {
            None => (0, ZERO_HASH),
            Some(tail) if tail.parcel_key != draft.parcel_key => {
                return Err(LedgerError::ParcelMismatch {
                    expected: draft.parcel_key.clone(),
                    found: tail.parcel_key.clone(),
                });
            }
            Some(tail) => (tail.sequence_index + 1, tail.current_hash),
        };

        let mut block = Block {
            block_id: BlockId::new(),
            parcel_key: draft.parcel_key.clone(),
            sequence_index,
            event_type: draft.event_type,
            actor_id: draft.actor_id.clone(),
            occurred_at: draft.occurred_at,
            metadata: draft.metadata.clone(),
            previous_hash,
            current_hash: ZERO_HASH,
            project_id: draft.project_id.clone(),
            is_valid: true,
        };
        block.current_hash = ContentHasher::hash_block(&block)?;
        Ok(block)
    }
}
