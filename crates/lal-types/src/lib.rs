//! Foundation types for the Land Acquisition Ledger (LAL).
//!
//! This crate provides the identity, digest, and block types shared by every
//! other LAL crate.
//!
//! # Key Types
//!
//! - [`ParcelKey`]: Survey/parcel identifier partitioning the chains
//! - [`ProjectId`] / [`ActorId`]: Denormalized grouping and attribution ids
//! - [`Digest`]: Fixed-width 256-bit hash, with [`ZERO_HASH`] as chain genesis
//! - [`BlockId`]: UUID v7 block identifier
//! - [`EventType`]: Closed set of parcel lifecycle events
//! - [`Block`]: One immutable, hash-linked ledger entry

pub mod block;
pub mod block_id;
pub mod digest;
pub mod error;
pub mod event;
pub mod identity;

pub use block::{Block, Metadata};
pub use block_id::BlockId;
pub use digest::{Digest, ZERO_HASH};
pub use error::TypeError;
pub use event::EventType;
pub use identity::{ActorId, ParcelKey, ProjectId};
