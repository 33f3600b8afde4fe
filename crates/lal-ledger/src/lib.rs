//! Tamper-evident event ledger for land-acquisition parcels.
//!
//! This crate is the heart of LAL. It provides:
//! - [`ChainBuilder`] linking new events onto a parcel's chain tail
//! - [`IntegrityVerifier`] replaying chains and invalidating tampered suffixes
//! - [`Reconciler`] rolling the ledger forward to the live business record
//! - [`LedgerService`], the facade business operations call
//! - Projection builders (timeline, parcel state, project summary)
//! - Per-event-type metadata validation and TOML configuration

pub mod builder;
pub mod config;
pub mod error;
pub mod live;
pub mod metadata;
pub mod projection;
pub mod reconcile;
pub mod service;
pub mod verifier;
pub mod writer;

pub use builder::{ChainBuilder, EventDraft};
pub use config::{LedgerConfig, MetadataConfig, RetryConfig, SnapshotConfig};
pub use error::LedgerError;
pub use live::{InMemoryLiveRecords, LiveRecord, LiveRecordError, LiveRecordSource};
pub use metadata::MetadataValidator;
pub use projection::{
    ParcelStateProjection, PaymentState, ProjectSummary, ProjectionBuilder, TimelineEntry,
    TimelineProjection,
};
pub use reconcile::{RecordedSnapshot, Reconciler, Snapshot, SyncStatus};
pub use service::{LedgerService, ReconcileOutcome, ReconcileReport};
pub use verifier::{IntegrityVerifier, VerificationResult};
pub use writer::ChainWriter;
