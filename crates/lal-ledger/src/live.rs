use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockWriteGuard};

use lal_types::ParcelKey;
use serde_json::Value;

/// Field map of a live business record.
pub type LiveRecord = BTreeMap<String, Value>;

/// A live-record fetch that could not complete. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct LiveRecordError(pub String);

/// Read-only access to the mutable live record of each parcel.
pub trait LiveRecordSource: Send + Sync {
    /// Fetch the current record. `Ok(None)` means the parcel has no record.
    fn fetch(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LiveRecordError>;
}

impl<T: LiveRecordSource + ?Sized> LiveRecordSource for &T {
    fn fetch(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LiveRecordError> {
        (**self).fetch(parcel)
    }
}

/// Live records held in memory, keyed by parcel.
#[derive(Default)]
pub struct InMemoryLiveRecords {
    records: RwLock<HashMap<ParcelKey, LiveRecord>>,
}

impl InMemoryLiveRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(records: HashMap<ParcelKey, LiveRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Parse a JSON object mapping parcel keys to field maps.
    pub fn from_json_str(input: &str) -> Result<Self, LiveRecordError> {
        let records: HashMap<ParcelKey, LiveRecord> =
            serde_json::from_str(input).map_err(|e| LiveRecordError(e.to_string()))?;
        Ok(Self::from_map(records))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<ParcelKey, LiveRecord>>, LiveRecordError> {
        self.records
            .write()
            .map_err(|_| LiveRecordError("live record cache poisoned".into()))
    }

    /// Insert or replace the live record of a parcel.
    pub fn upsert(&self, parcel: ParcelKey, record: LiveRecord) -> Result<(), LiveRecordError> {
        self.write()?.insert(parcel, record);
        Ok(())
    }

    /// Set a single field, creating the record if needed.
    pub fn set_field(
        &self,
        parcel: &ParcelKey,
        field: &str,
        value: Value,
    ) -> Result<(), LiveRecordError> {
        self.write()?
            .entry(parcel.clone())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    pub fn remove(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LiveRecordError> {
        Ok(self.write()?.remove(parcel))
    }
}

impl LiveRecordSource for InMemoryLiveRecords {
    fn fetch(&self, parcel: &ParcelKey) -> Result<Option<LiveRecord>, LiveRecordError> {
        let records = self
            .records
            .read()
            .map_err(|_| LiveRecordError("live record cache poisoned".into()))?;
        Ok(records.get(parcel).cloned())
    }
}
