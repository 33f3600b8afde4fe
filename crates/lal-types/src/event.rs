use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Kind of lifecycle event recorded in a parcel chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Joint measurement of the parcel was recorded.
    MeasurementRecorded,
    /// A statutory notice was generated for the parcel.
    NoticeGenerated,
    /// A supporting document was uploaded.
    DocumentUploaded,
    /// Compensation payment was initiated.
    PaymentInitiated,
    /// Compensation payment completed.
    PaymentCompleted,
    /// Ownership details were updated (supersedes earlier values).
    OwnershipUpdated,
    /// Compensation award was declared.
    AwardDeclared,
    /// Ledger was reconciled against the live record.
    SnapshotReconciled,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 8] = [
        Self::MeasurementRecorded,
        Self::NoticeGenerated,
        Self::DocumentUploaded,
        Self::PaymentInitiated,
        Self::PaymentCompleted,
        Self::OwnershipUpdated,
        Self::AwardDeclared,
        Self::SnapshotReconciled,
    ];

    /// The wire name, e.g. `MEASUREMENT_RECORDED`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeasurementRecorded => "MEASUREMENT_RECORDED",
            Self::NoticeGenerated => "NOTICE_GENERATED",
            Self::DocumentUploaded => "DOCUMENT_UPLOADED",
            Self::PaymentInitiated => "PAYMENT_INITIATED",
            Self::PaymentCompleted => "PAYMENT_COMPLETED",
            Self::OwnershipUpdated => "OWNERSHIP_UPDATED",
            Self::AwardDeclared => "AWARD_DECLARED",
            Self::SnapshotReconciled => "SNAPSHOT_RECONCILED",
        }
    }

    /// Returns `true` for event types only the ledger itself may write.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::SnapshotReconciled)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| TypeError::UnknownEventType(s.to_string()))
    }
}
