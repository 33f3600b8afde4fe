use lal_crypto::{FaultKind, HasherError};
use lal_store::StoreError;
use lal_types::{EventType, ParcelKey};

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("gave up on {parcel_key} after {attempts} conflicting append attempts")]
    ConflictRetriesExhausted { parcel_key: ParcelKey, attempts: u32 },

    #[error("chain for {parcel_key} is broken at sequence index {sequence_index}: {fault}")]
    BrokenChain {
        parcel_key: ParcelKey,
        sequence_index: u64,
        fault: FaultKind,
    },

    #[error("live record for {parcel_key} is unavailable: {reason}")]
    LiveRecordUnavailable { parcel_key: ParcelKey, reason: String },

    #[error("no live record exists for {0}")]
    LiveRecordNotFound(ParcelKey),

    #[error("malformed metadata for {event_type}: {reason}")]
    MalformedMetadata { event_type: EventType, reason: String },

    #[error("{0} is written by the ledger itself and cannot be appended directly")]
    ReservedEventType(EventType),

    #[error("prior block belongs to {found}, not {expected}")]
    ParcelMismatch { expected: ParcelKey, found: ParcelKey },

    #[error("hashing failed: {0}")]
    Hashing(#[from] HasherError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl LedgerError {
    /// Returns `true` for failures a caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConflictRetriesExhausted { .. } | Self::LiveRecordUnavailable { .. }
        ) || matches!(self, Self::Store(e) if e.is_conflict())
    }

    /// Returns `true` for tamper-evidence failures that must be escalated.
    pub fn is_integrity_alert(&self) -> bool {
        matches!(self, Self::BrokenChain { .. })
    }
}
