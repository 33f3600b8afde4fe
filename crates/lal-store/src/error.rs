use lal_types::{BlockId, ParcelKey};

/// Errors from block store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another writer already occupies this chain position.
    #[error("conflict: {parcel_key} already has a block at sequence index {sequence_index}")]
    Conflict {
        parcel_key: ParcelKey,
        sequence_index: u64,
    },

    /// The block would leave a hole in the chain.
    #[error("sequence gap for {parcel_key}: expected index {expected}, got {found}")]
    SequenceGap {
        parcel_key: ParcelKey,
        expected: u64,
        found: u64,
    },

    /// A block with this id was already written.
    #[error("duplicate block id: {0}")]
    DuplicateBlockId(BlockId),

    /// The requested block was not found.
    #[error("block not found: {0}")]
    BlockNotFound(BlockId),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal lock was poisoned by a panicking writer.
    #[error("store lock poisoned: {0}")]
    Poisoned(&'static str),
}

impl StoreError {
    /// Returns `true` if the failure was a lost append race.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
