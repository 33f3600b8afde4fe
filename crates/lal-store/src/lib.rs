//! Append-only block storage for the Land Acquisition Ledger.
//!
//! Blocks are stored per parcel chain in ascending `sequence_index` order,
//! with secondary indexes by block id, project, and event type.
//!
//! # Storage Backends
//!
//! All backends implement the [`BlockStore`] trait:
//!
//! - [`InMemoryBlockStore`] -- `HashMap`-based store for tests and embedding
//! - [`FileBlockStore`] -- length + CRC framed append-only log file
//!
//! # Design Rules
//!
//! 1. Blocks are insert-only; `mark_invalid` is the only post-write mutation.
//! 2. `append` is the concurrency boundary: a second writer of the same
//!    `(parcel_key, sequence_index)` gets [`StoreError::Conflict`].
//! 3. Positions are claimed per `(parcel_key, sequence_index)`; appends to
//!    different parcels never conflict.
//! 4. The store never recomputes or interprets hashes.
//! 5. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod file;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{FileBlockStore, FileStoreConfig, SyncMode};
pub use memory::InMemoryBlockStore;
pub use traits::BlockStore;
