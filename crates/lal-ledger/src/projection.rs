use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lal_store::BlockStore;
use lal_types::{ActorId, Block, BlockId, Digest, EventType, ParcelKey, ProjectId};
use serde::Serialize;
use serde_json::Value;

use crate::error::LedgerError;
use crate::reconcile::RecordedSnapshot;

/// Row in a parcel's audit timeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineEntry {
    pub sequence_index: u64,
    pub block_id: BlockId,
    pub event_type: EventType,
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
    pub current_hash: Digest,
    pub is_valid: bool,
    pub summary: String,
}

/// Immutable sequence of block summaries for audit.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimelineProjection {
    pub parcel_key: ParcelKey,
    pub entries: Vec<TimelineEntry>,
}

/// Compensation payment progress of a parcel.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PaymentState {
    #[default]
    NotStarted,
    Initiated {
        amount: f64,
    },
    Completed {
        amount: f64,
        reference: Option<String>,
    },
}

/// Latest known parcel state folded from its valid blocks.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ParcelStateProjection {
    pub parcel_key: Option<ParcelKey>,
    pub project_id: Option<ProjectId>,
    pub chain_length: u64,
    pub invalid_blocks: u64,
    pub owner_name: Option<String>,
    pub measured_area: Option<f64>,
    pub notice_number: Option<String>,
    pub documents: u64,
    pub payment: PaymentState,
    pub award_amount: Option<f64>,
    pub last_snapshot_digest: Option<Digest>,
    pub last_event: Option<EventType>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Per-project roll-up used by dashboards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ProjectSummary {
    pub project_id: ProjectId,
    pub parcels: usize,
    pub blocks: usize,
    pub invalid_blocks: usize,
    pub events_by_type: BTreeMap<EventType, usize>,
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Deterministic projection builders.
pub struct ProjectionBuilder;

impl ProjectionBuilder {
    pub fn timeline<S: BlockStore + ?Sized>(
        store: &S,
        parcel: &ParcelKey,
    ) -> Result<TimelineProjection, LedgerError> {
        let entries = store
            .history(parcel)?
            .iter()
            .map(|block| TimelineEntry {
                sequence_index: block.sequence_index,
                block_id: block.block_id,
                event_type: block.event_type,
                actor_id: block.actor_id.clone(),
                occurred_at: block.occurred_at,
                current_hash: block.current_hash,
                is_valid: block.is_valid,
                summary: summarize(block),
            })
            .collect();

        Ok(TimelineProjection {
            parcel_key: parcel.clone(),
            entries,
        })
    }

    /// Fold the chain into the latest parcel state.
    ///
    /// Blocks flagged invalid are counted but contribute nothing.
    pub fn parcel_state<S: BlockStore + ?Sized>(
        store: &S,
        parcel: &ParcelKey,
    ) -> Result<ParcelStateProjection, LedgerError> {
        let history = store.history(parcel)?;
        let mut state = ParcelStateProjection {
            parcel_key: Some(parcel.clone()),
            chain_length: history.len() as u64,
            ..ParcelStateProjection::default()
        };

        for block in &history {
            if !block.is_valid {
                state.invalid_blocks += 1;
                continue;
            }
            apply(&mut state, block);
        }
        Ok(state)
    }

    pub fn project_summary<S: BlockStore + ?Sized>(
        store: &S,
        project: &ProjectId,
    ) -> Result<ProjectSummary, LedgerError> {
        let blocks = store.by_project(project)?;
        let parcels: BTreeSet<&ParcelKey> = blocks.iter().map(|b| &b.parcel_key).collect();

        let mut events_by_type = BTreeMap::new();
        for block in &blocks {
            *events_by_type.entry(block.event_type).or_insert(0) += 1;
        }

        Ok(ProjectSummary {
            project_id: project.clone(),
            parcels: parcels.len(),
            blocks: blocks.len(),
            invalid_blocks: blocks.iter().filter(|b| !b.is_valid).count(),
            events_by_type,
            first_event_at: blocks.first().map(|b| b.occurred_at),
            last_event_at: blocks.last().map(|b| b.occurred_at),
        })
    }
}

fn apply(state: &mut ParcelStateProjection, block: &Block) {
    match block.event_type {
        EventType::MeasurementRecorded => state.measured_area = block.metadata_f64("area"),
        EventType::NoticeGenerated => {
            if let Some(number) = block.metadata_str("notice_number") {
                state.notice_number = Some(number.to_string());
            }
        }
        EventType::DocumentUploaded => state.documents += 1,
        EventType::PaymentInitiated => {
            state.payment = PaymentState::Initiated {
                amount: block.metadata_f64("amount").unwrap_or_default(),
            };
        }
        EventType::PaymentCompleted => {
            state.payment = PaymentState::Completed {
                amount: block.metadata_f64("amount").unwrap_or_default(),
                reference: block.metadata_str("reference").map(str::to_string),
            };
        }
        EventType::OwnershipUpdated => {
            state.owner_name = block.metadata_str("owner_name").map(str::to_string);
        }
        EventType::AwardDeclared => state.award_amount = block.metadata_f64("award_amount"),
        EventType::SnapshotReconciled => {
            state.last_snapshot_digest =
                RecordedSnapshot::from_block(block).map(|s| s.content_digest);
        }
    }
    state.project_id = Some(block.project_id.clone());
    state.last_event = Some(block.event_type);
    state.last_updated = Some(block.occurred_at);
}

fn summarize(block: &Block) -> String {
    let number = |key: &str| block.metadata_f64(key).map(|n| n.to_string());
    match block.event_type {
        EventType::MeasurementRecorded => {
            format!("measured area {}", number("area").unwrap_or_else(|| "?".into()))
        }
        EventType::NoticeGenerated => match block.metadata_str("notice_number") {
            Some(n) => format!("notice {n} generated"),
            None => "notice generated".into(),
        },
        EventType::DocumentUploaded => format!(
            "document {}",
            block.metadata_str("document_url").unwrap_or("?")
        ),
        EventType::PaymentInitiated => format!(
            "payment of {} initiated",
            number("amount").unwrap_or_else(|| "?".into())
        ),
        EventType::PaymentCompleted => format!(
            "payment of {} completed",
            number("amount").unwrap_or_else(|| "?".into())
        ),
        EventType::OwnershipUpdated => format!(
            "owner set to {}",
            block.metadata_str("owner_name").unwrap_or("?")
        ),
        EventType::AwardDeclared => format!(
            "award of {} declared",
            number("award_amount").unwrap_or_else(|| "?".into())
        ),
        EventType::SnapshotReconciled => {
            let changed: Vec<&str> = match block.metadata.get("changed_fields") {
                Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            let digest = RecordedSnapshot::from_block(block)
                .map(|s| s.content_digest.short_hex())
                .unwrap_or_else(|| "?".into());
            if changed.is_empty() {
                format!("snapshot {digest}")
            } else {
                format!("snapshot {digest} ({} changed)", changed.join(", "))
            }
        }
    }
}
