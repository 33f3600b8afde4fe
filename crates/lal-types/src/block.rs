use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::block_id::BlockId;
use crate::digest::Digest;
use crate::event::EventType;
use crate::identity::{ActorId, ParcelKey, ProjectId};

/// Event-specific key/value payload. Keys are kept sorted.
pub type Metadata = BTreeMap<String, Value>;

/// One immutable, hash-linked event in a parcel's history.
///
/// Blocks are built by the chain builder and never modified afterwards,
/// with one exception: a verification run may flip `is_valid` to `false`
/// through the block store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub block_id: BlockId,
    pub parcel_key: ParcelKey,
    pub sequence_index: u64,
    pub event_type: EventType,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
    pub metadata: Metadata,
    pub previous_hash: Digest,
    pub current_hash: Digest,
    pub project_id: ProjectId,
    pub is_valid: bool,
}

impl Block {
    /// The hashed portion of this block: every field except `current_hash`
    /// and `is_valid`.
    pub fn header(&self) -> BlockHeader<'_> {
        BlockHeader {
            block_id: &self.block_id,
            parcel_key: &self.parcel_key,
            sequence_index: self.sequence_index,
            event_type: self.event_type,
            actor_id: &self.actor_id,
            occurred_at: &self.occurred_at,
            metadata: &self.metadata,
            previous_hash: &self.previous_hash,
            project_id: &self.project_id,
        }
    }

    /// Returns `true` for the first block of a chain.
    pub fn is_genesis(&self) -> bool {
        self.sequence_index == 0
    }

    /// String-valued metadata entry, if present.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    /// Numeric metadata entry, if present.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(Value::as_f64)
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}#{} {} [{}]",
            self.parcel_key,
            self.sequence_index,
            self.event_type,
            self.current_hash.short_hex()
        )
    }
}

/// Canonical view of the hashed block fields.
///
/// Field order is fixed by declaration order; it is part of the hash format
/// and must not be reordered.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BlockHeader<'a> {
    pub block_id: &'a BlockId,
    pub parcel_key: &'a ParcelKey,
    pub sequence_index: u64,
    pub event_type: EventType,
    pub actor_id: &'a ActorId,
    pub occurred_at: &'a DateTime<Utc>,
    pub metadata: &'a Metadata,
    pub previous_hash: &'a Digest,
    pub project_id: &'a ProjectId,
}
