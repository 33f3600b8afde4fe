use chrono::{DateTime, Utc};
use lal_store::BlockStore;
use lal_types::{ActorId, Block, EventType, Metadata, ParcelKey, ProjectId};
use serde::Serialize;
use tracing::{info, warn};

use crate::builder::{ChainBuilder, EventDraft};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::live::LiveRecordSource;
use crate::metadata::MetadataValidator;
use crate::projection::{
    ParcelStateProjection, ProjectSummary, ProjectionBuilder, TimelineProjection,
};
use crate::reconcile::{Reconciler, SyncStatus};
use crate::verifier::{IntegrityVerifier, VerificationResult};
use crate::writer::ChainWriter;

/// Per-parcel result of a bulk reconciliation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub parcel_key: ParcelKey,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Appended { sequence_index: u64 },
    Unchanged,
    Failed { error: String, retryable: bool },
}

/// Public facade over the block store, chain builder, verifier and
/// reconciler.
///
/// The service holds no lock of its own; per-parcel ordering is enforced
/// by the store's position check and the conflict retry loop.
pub struct LedgerService<S, L> {
    store: S,
    live: L,
    config: LedgerConfig,
    metadata: MetadataValidator,
}

impl<S: BlockStore, L: LiveRecordSource> LedgerService<S, L> {
    pub fn new(store: S, live: L) -> Self {
        Self {
            store,
            live,
            metadata: MetadataValidator::default(),
            config: LedgerConfig::default(),
        }
    }

    pub fn with_config(store: S, live: L, config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        Ok(Self {
            store,
            live,
            metadata: MetadataValidator::new(&config.metadata),
            config,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    // ---- Writes ----

    /// Validate, link, and append an explicit lifecycle event.
    pub fn append_event(
        &self,
        parcel: &ParcelKey,
        actor: &ActorId,
        project: &ProjectId,
        event_type: EventType,
        metadata: Metadata,
        occurred_at: DateTime<Utc>,
    ) -> Result<Block, LedgerError> {
        if event_type.is_reserved() {
            return Err(LedgerError::ReservedEventType(event_type));
        }
        self.metadata.validate(event_type, &metadata)?;

        let draft = EventDraft {
            parcel_key: parcel.clone(),
            event_type,
            actor_id: actor.clone(),
            occurred_at,
            metadata,
            project_id: project.clone(),
        };

        ChainWriter::new(&self.store, self.config.retry.conflict_retries)
            .append_with(parcel, |tail| ChainBuilder::build_next(tail, &draft).map(Some))?
            // The builder never skips, so `None` is unreachable here.
            .ok_or_else(|| LedgerError::ConflictRetriesExhausted {
                parcel_key: parcel.clone(),
                attempts: 0,
            })
    }

    /// Roll the chain forward to the live record if it changed.
    pub fn reconcile_from_live(
        &self,
        parcel: &ParcelKey,
        actor: &ActorId,
        project: &ProjectId,
        reason: &str,
    ) -> Result<Option<Block>, LedgerError> {
        self.reconciler()
            .reconcile(parcel, actor, project, reason, Utc::now())
    }

    /// Reconcile several parcels; one parcel's failure does not stop the rest.
    pub fn reconcile_many(
        &self,
        parcels: &[ParcelKey],
        actor: &ActorId,
        project: &ProjectId,
        reason: &str,
    ) -> Vec<ReconcileReport> {
        let reports: Vec<ReconcileReport> = parcels
            .iter()
            .map(|parcel| {
                let outcome = match self.reconcile_from_live(parcel, actor, project, reason) {
                    Ok(Some(block)) => ReconcileOutcome::Appended {
                        sequence_index: block.sequence_index,
                    },
                    Ok(None) => ReconcileOutcome::Unchanged,
                    Err(e) => {
                        warn!(%parcel, error = %e, "reconcile failed");
                        ReconcileOutcome::Failed {
                            retryable: e.is_retryable(),
                            error: e.to_string(),
                        }
                    }
                };
                ReconcileReport {
                    parcel_key: parcel.clone(),
                    outcome,
                }
            })
            .collect();

        let appended = reports
            .iter()
            .filter(|r| matches!(r.outcome, ReconcileOutcome::Appended { .. }))
            .count();
        info!(parcels = reports.len(), appended, "bulk reconcile complete");
        reports
    }

    // ---- Reads ----

    pub fn get_history(&self, parcel: &ParcelKey) -> Result<Vec<Block>, LedgerError> {
        Ok(self.store.history(parcel)?)
    }

    pub fn get_project_history(&self, project: &ProjectId) -> Result<Vec<Block>, LedgerError> {
        Ok(self.store.by_project(project)?)
    }

    pub fn get_latest(&self, parcel: &ParcelKey) -> Result<Option<Block>, LedgerError> {
        Ok(self.store.latest(parcel)?)
    }

    pub fn get_events_of_type(&self, event_type: EventType) -> Result<Vec<Block>, LedgerError> {
        Ok(self.store.by_event_type(event_type)?)
    }

    pub fn timeline(&self, parcel: &ParcelKey) -> Result<TimelineProjection, LedgerError> {
        ProjectionBuilder::timeline(&self.store, parcel)
    }

    pub fn parcel_state(&self, parcel: &ParcelKey) -> Result<ParcelStateProjection, LedgerError> {
        ProjectionBuilder::parcel_state(&self.store, parcel)
    }

    pub fn project_summary(&self, project: &ProjectId) -> Result<ProjectSummary, LedgerError> {
        ProjectionBuilder::project_summary(&self.store, project)
    }

    /// Read-only comparison of the live record with the last snapshot.
    pub fn sync_status(&self, parcel: &ParcelKey) -> Result<SyncStatus, LedgerError> {
        self.reconciler().drift(parcel)
    }

    // ---- Verification ----

    pub fn verify(&self, parcel: &ParcelKey) -> Result<VerificationResult, LedgerError> {
        IntegrityVerifier::new(&self.store).verify(parcel)
    }

    pub fn verify_all(&self) -> Result<Vec<VerificationResult>, LedgerError> {
        IntegrityVerifier::new(&self.store).verify_all()
    }

    /// Verify and turn a divergence into [`LedgerError::BrokenChain`].
    pub fn ensure_intact(&self, parcel: &ParcelKey) -> Result<VerificationResult, LedgerError> {
        let result = self.verify(parcel)?;
        match (result.first_bad_sequence, result.fault) {
            (Some(sequence_index), Some(fault)) => Err(LedgerError::BrokenChain {
                parcel_key: parcel.clone(),
                sequence_index,
                fault,
            }),
            _ => Ok(result),
        }
    }

    fn reconciler(&self) -> Reconciler<'_, S, L> {
        Reconciler::new(&self.store, &self.live, &self.config)
    }
}
