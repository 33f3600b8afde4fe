use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use lal_crypto::{canonicalize, ContentHasher};
use lal_store::BlockStore;
use lal_types::{ActorId, Block, Digest, EventType, Metadata, ParcelKey, ProjectId};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::builder::{ChainBuilder, EventDraft};
use crate::config::{LedgerConfig, SnapshotConfig};
use crate::error::LedgerError;
use crate::live::{LiveRecord, LiveRecordSource};
use crate::writer::ChainWriter;

/// Canonical projection of a live record onto the configured field set.
///
/// Fields that are absent or `null` in the live record are omitted, so the
/// two are indistinguishable for change detection.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub version: u32,
    pub fields: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn project(record: &LiveRecord, config: &SnapshotConfig) -> Self {
        let fields = config
            .fields
            .iter()
            .filter_map(|name| match record.get(name) {
                None | Some(Value::Null) => None,
                Some(value) => Some((name.clone(), canonicalize(value))),
            })
            .collect();
        Self {
            version: config.version,
            fields,
        }
    }

    /// Change-detection digest over the version and projected fields.
    pub fn content_digest(&self) -> Result<Digest, LedgerError> {
        Ok(ContentHasher::SNAPSHOT.hash_json(self)?)
    }

    /// One digest per projected field.
    pub fn field_digests(&self) -> Result<BTreeMap<String, Digest>, LedgerError> {
        self.fields
            .iter()
            .map(|(name, value)| {
                ContentHasher::FIELD
                    .hash_json(value)
                    .map(|digest| (name.clone(), digest))
            })
            .collect::<Result<_, _>>()
            .map_err(LedgerError::from)
    }
}

/// Digests carried by a `SNAPSHOT_RECONCILED` block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedSnapshot {
    pub sequence_index: u64,
    pub content_digest: Digest,
    pub field_digests: BTreeMap<String, Digest>,
}

impl RecordedSnapshot {
    /// Read the snapshot digests out of a block's metadata.
    ///
    /// Returns `None` for other event types or unreadable metadata.
    pub fn from_block(block: &Block) -> Option<Self> {
        if block.event_type != EventType::SnapshotReconciled {
            return None;
        }
        let content_digest = block
            .metadata_str("content_digest")?
            .parse::<Digest>()
            .ok()?;
        let field_digests = match block.metadata.get("field_digests") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, v)| Some((name.clone(), v.as_str()?.parse::<Digest>().ok()?)))
                .collect::<Option<BTreeMap<_, _>>>()?,
            _ => BTreeMap::new(),
        };
        Some(Self {
            sequence_index: block.sequence_index,
            content_digest,
            field_digests,
        })
    }
}

/// Drift of a live record against the last reconciled snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SyncStatus {
    InSync { content_digest: Digest },
    Drifted { changed_fields: Vec<String> },
    NeverReconciled,
    LiveRecordMissing,
}

/// Rolls a parcel's ledger forward to its live record.
pub struct Reconciler<'a, S: ?Sized, L: ?Sized> {
    store: &'a S,
    live: &'a L,
    config: &'a LedgerConfig,
}

impl<'a, S, L> Reconciler<'a, S, L>
where
    S: BlockStore + ?Sized,
    L: LiveRecordSource + ?Sized,
{
    pub fn new(store: &'a S, live: &'a L, config: &'a LedgerConfig) -> Self {
        Self {
            store,
            live,
            config,
        }
    }

    /// Fetch the live record, retrying unavailability with a fixed backoff.
    pub fn fetch(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LedgerError> {
        let retry = &self.config.retry;
        let attempts = retry.live_fetch_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.live.fetch(parcel) {
                Ok(record) => return Ok(record),
                Err(e) => {
                    debug!(%parcel, attempt, error = %e, "live record fetch failed");
                    last_error = Some(e);
                    if attempt < attempts {
                        std::thread::sleep(retry.live_fetch_backoff());
                    }
                }
            }
        }

        warn!(%parcel, attempts, "live record unavailable");
        Err(LedgerError::LiveRecordUnavailable {
            parcel_key: parcel.clone(),
            reason: last_error.map(|e| e.0).unwrap_or_default(),
        })
    }

    /// The most recent snapshot recorded on the chain, given its tail.
    pub fn last_recorded(
        &self,
        parcel: &ParcelKey,
        tail: Option<&Block>,
    ) -> Result<Option<RecordedSnapshot>, LedgerError> {
        let Some(tail) = tail else {
            return Ok(None);
        };
        let block = if tail.event_type == EventType::SnapshotReconciled {
            Some(tail.clone())
        } else {
            self.store
                .history(parcel)?
                .into_iter()
                .rev()
                .find(|b| b.event_type == EventType::SnapshotReconciled)
        };

        Ok(block.and_then(|b| {
            let recorded = RecordedSnapshot::from_block(&b);
            if recorded.is_none() {
                warn!(%parcel, seq = b.sequence_index, "unreadable snapshot metadata");
            }
            recorded
        }))
    }

    /// Append a `SNAPSHOT_RECONCILED` block if the live record changed since
    /// the last snapshot. Returns `None` when nothing changed.
    pub fn reconcile(
        &self,
        parcel: &ParcelKey,
        actor: &ActorId,
        project: &ProjectId,
        reason: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Option<Block>, LedgerError> {
        let record = self
            .fetch(parcel)?
            .ok_or_else(|| LedgerError::LiveRecordNotFound(parcel.clone()))?;
        let snapshot = Snapshot::project(&record, &self.config.snapshot);
        let digest = snapshot.content_digest()?;
        let field_digests = snapshot.field_digests()?;

        let writer = ChainWriter::new(self.store, self.config.retry.conflict_retries);
        let appended = writer.append_with(parcel, |tail| {
            let prior = self.last_recorded(parcel, tail)?;
            if prior.as_ref().is_some_and(|p| p.content_digest == digest) {
                debug!(%parcel, digest = %digest.short_hex(), "live record unchanged");
                return Ok(None);
            }

            let draft = EventDraft {
                parcel_key: parcel.clone(),
                event_type: EventType::SnapshotReconciled,
                actor_id: actor.clone(),
                occurred_at,
                metadata: snapshot_metadata(
                    &snapshot,
                    digest,
                    &field_digests,
                    changed_fields(prior.as_ref(), &field_digests),
                    reason,
                ),
                project_id: project.clone(),
            };
            ChainBuilder::build_next(tail, &draft).map(Some)
        })?;

        if let Some(block) = &appended {
            info!(
                %parcel,
                seq = block.sequence_index,
                digest = %digest.short_hex(),
                "snapshot reconciled"
            );
        }
        Ok(appended)
    }

    /// Compare the live record against the last snapshot without writing.
    pub fn drift(&self, parcel: &ParcelKey) -> Result<SyncStatus, LedgerError> {
        let Some(record) = self.fetch(parcel)? else {
            return Ok(SyncStatus::LiveRecordMissing);
        };
        let tail = self.store.latest(parcel)?;
        let Some(prior) = self.last_recorded(parcel, tail.as_ref())? else {
            return Ok(SyncStatus::NeverReconciled);
        };

        let snapshot = Snapshot::project(&record, &self.config.snapshot);
        let digest = snapshot.content_digest()?;
        if digest == prior.content_digest {
            return Ok(SyncStatus::InSync {
                content_digest: digest,
            });
        }
        Ok(SyncStatus::Drifted {
            changed_fields: changed_fields(Some(&prior), &snapshot.field_digests()?),
        })
    }
}

/// Fields added, removed, or altered relative to `prior`. With no prior
/// snapshot every projected field counts as changed.
fn changed_fields(
    prior: Option<&RecordedSnapshot>,
    current: &BTreeMap<String, Digest>,
) -> Vec<String> {
    let Some(prior) = prior else {
        return current.keys().cloned().collect();
    };
    let names: BTreeSet<&String> = prior.field_digests.keys().chain(current.keys()).collect();
    names
        .into_iter()
        .filter(|name| prior.field_digests.get(*name) != current.get(*name))
        .cloned()
        .collect()
}

fn snapshot_metadata(
    snapshot: &Snapshot,
    digest: Digest,
    field_digests: &BTreeMap<String, Digest>,
    changed: Vec<String>,
    reason: &str,
) -> Metadata {
    let digests = field_digests
        .iter()
        .map(|(name, d)| (name.clone(), Value::String(d.to_hex())))
        .collect();

    let mut metadata = Metadata::new();
    metadata.insert("content_digest".into(), Value::String(digest.to_hex()));
    metadata.insert("schema_version".into(), Value::from(snapshot.version));
    metadata.insert("field_digests".into(), Value::Object(digests));
    metadata.insert(
        "changed_fields".into(),
        Value::Array(changed.into_iter().map(Value::String).collect()),
    );
    metadata.insert("reason".into(), Value::String(reason.to_string()));
    metadata.insert(
        "fields".into(),
        Value::Object(snapshot.fields.clone().into_iter().collect()),
    );
    metadata
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use lal_store::InMemoryBlockStore;
    use serde_json::json;

    use super::*;
    use crate::config::RetryConfig;
    use crate::live::{InMemoryLiveRecords, LiveRecordError};

    fn key() -> ParcelKey {
        ParcelKey::new("42/A").unwrap()
    }

    fn actor() -> ActorId {
        ActorId::new("sync-bot").unwrap()
    }

    fn project() -> ProjectId {
        ProjectId::new("ring-road").unwrap()
    }

    fn config() -> LedgerConfig {
        LedgerConfig {
            retry: RetryConfig {
                live_fetch_backoff_ms: 0,
                ..RetryConfig::default()
            },
            ..LedgerConfig::default()
        }
    }

    fn record(value: Value) -> LiveRecord {
        serde_json::from_value(value).unwrap()
    }

    fn live_with(value: Value) -> InMemoryLiveRecords {
        let live = InMemoryLiveRecords::new();
        live.upsert(key(), record(value)).unwrap();
        live
    }

    fn reconcile<L: LiveRecordSource>(
        store: &InMemoryBlockStore,
        live: &L,
        config: &LedgerConfig,
    ) -> Result<Option<Block>, LedgerError> {
        Reconciler::new(store, live, config).reconcile(&key(), &actor(), &project(), "test", Utc::now())
    }

    #[test]
    fn projection_keeps_configured_fields_only() {
        let snapshot = Snapshot::project(
            &record(json!({
                "owner_name": "S. Patil",
                "village": null,
                "internal_note": "ignore me",
                "measured_area": {"value": 2.5, "updatedAt": "yesterday"}
            })),
            &SnapshotConfig::default(),
        );
        assert_eq!(snapshot.fields.len(), 2);
        assert_eq!(snapshot.fields["measured_area"], json!({"value": 2.5}));
    }

    #[test]
    fn volatile_keys_do_not_change_the_digest() {
        let a = Snapshot::project(
            &record(json!({"owner_name": "A", "updatedAt": "t1"})),
            &SnapshotConfig::default(),
        );
        let b = Snapshot::project(
            &record(json!({"owner_name": "A", "updatedAt": "t2"})),
            &SnapshotConfig::default(),
        );
        assert_eq!(a.content_digest().unwrap(), b.content_digest().unwrap());
    }

    #[test]
    fn version_participates_in_digest() {
        let rec = record(json!({"owner_name": "A"}));
        let v1 = Snapshot::project(&rec, &SnapshotConfig::default());
        let v2 = Snapshot::project(
            &rec,
            &SnapshotConfig {
                version: 2,
                ..SnapshotConfig::default()
            },
        );
        assert_ne!(v1.content_digest().unwrap(), v2.content_digest().unwrap());
    }

    #[test]
    fn first_reconcile_appends_snapshot() {
        let store = InMemoryBlockStore::new();
        let live = live_with(json!({"owner_name": "S. Patil", "village": "Wadgaon"}));
        let config = config();

        let block = reconcile(&store, &live, &config).unwrap().unwrap();
        assert_eq!(block.event_type, EventType::SnapshotReconciled);
        assert_eq!(block.sequence_index, 0);
        assert_eq!(
            block.metadata["changed_fields"],
            json!(["owner_name", "village"])
        );
        assert_eq!(block.metadata["schema_version"], json!(1));
        assert_eq!(block.metadata["reason"], json!("test"));

        let recorded = RecordedSnapshot::from_block(&block).unwrap();
        assert_eq!(recorded.field_digests.len(), 2);
    }

    #[test]
    fn unchanged_record_is_a_noop() {
        let store = InMemoryBlockStore::new();
        let live = live_with(json!({"owner_name": "S. Patil"}));
        let config = config();

        assert!(reconcile(&store, &live, &config).unwrap().is_some());
        assert!(reconcile(&store, &live, &config).unwrap().is_none());
        assert_eq!(store.chain_len(&key()).unwrap(), 1);
    }

    #[test]
    fn change_after_other_events_names_changed_fields() {
        let store = InMemoryBlockStore::new();
        let live = live_with(json!({"owner_name": "S. Patil", "village": "Wadgaon"}));
        let config = config();
        let first = reconcile(&store, &live, &config).unwrap().unwrap();

        // An explicit event lands between snapshots.
        let notice = ChainBuilder::build_next(
            Some(&first),
            &EventDraft {
                parcel_key: key(),
                event_type: EventType::NoticeGenerated,
                actor_id: actor(),
                occurred_at: Utc::now(),
                metadata: Metadata::new(),
                project_id: project(),
            },
        )
        .unwrap();
        store.append(&notice).unwrap();
        assert!(reconcile(&store, &live, &config).unwrap().is_none());

        live.set_field(&key(), "owner_name", json!("R. Jadhav")).unwrap();
        live.set_field(&key(), "payment_status", json!("pending")).unwrap();
        let second = reconcile(&store, &live, &config).unwrap().unwrap();
        assert_eq!(second.sequence_index, 2);
        assert_eq!(second.previous_hash, notice.current_hash);
        assert_eq!(
            second.metadata["changed_fields"],
            json!(["owner_name", "payment_status"])
        );
    }

    #[test]
    fn missing_record_appends_nothing() {
        let store = InMemoryBlockStore::new();
        let live = InMemoryLiveRecords::new();
        let err = reconcile(&store, &live, &config()).unwrap_err();
        assert!(matches!(err, LedgerError::LiveRecordNotFound(_)));
        assert_eq!(store.chain_len(&key()).unwrap(), 0);
    }

    struct Flaky {
        failures: AtomicU32,
        inner: InMemoryLiveRecords,
    }

    impl LiveRecordSource for Flaky {
        fn fetch(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LiveRecordError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(LiveRecordError("connection reset".into()));
            }
            self.inner.fetch(parcel)
        }
    }

    #[test]
    fn transient_fetch_failures_are_retried() {
        let store = InMemoryBlockStore::new();
        let live = Flaky {
            failures: AtomicU32::new(2),
            inner: live_with(json!({"owner_name": "A"})),
        };
        assert!(reconcile(&store, &live, &config()).unwrap().is_some());
    }

    #[test]
    fn persistent_fetch_failure_is_unavailable() {
        let store = InMemoryBlockStore::new();
        let live = Flaky {
            failures: AtomicU32::new(3),
            inner: live_with(json!({"owner_name": "A"})),
        };
        let err = reconcile(&store, &live, &config()).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::LiveRecordUnavailable { ref reason, .. } if reason == "connection reset"
        ));
        assert!(err.is_retryable());
        assert_eq!(store.chain_len(&key()).unwrap(), 0);
    }

    #[test]
    fn drift_reports_each_state() {
        let store = InMemoryBlockStore::new();
        let live = live_with(json!({"owner_name": "A", "village": "Wadgaon"}));
        let config = config();
        let reconciler = Reconciler::new(&store, &live, &config);

        assert_eq!(reconciler.drift(&key()).unwrap(), SyncStatus::NeverReconciled);

        let block = reconcile(&store, &live, &config).unwrap().unwrap();
        let digest = RecordedSnapshot::from_block(&block).unwrap().content_digest;
        assert_eq!(
            reconciler.drift(&key()).unwrap(),
            SyncStatus::InSync {
                content_digest: digest
            }
        );

        live.upsert(key(), record(json!({"owner_name": "A", "district": "Pune"}))).unwrap();
        assert_eq!(
            reconciler.drift(&key()).unwrap(),
            SyncStatus::Drifted {
                changed_fields: vec!["district".into(), "village".into()]
            }
        );

        live.remove(&key()).unwrap();
        assert_eq!(
            reconciler.drift(&key()).unwrap(),
            SyncStatus::LiveRecordMissing
        );
        assert_eq!(store.chain_len(&key()).unwrap(), 1);
    }
}
