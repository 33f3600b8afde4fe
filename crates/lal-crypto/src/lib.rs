//! Hashing primitives for the Land Acquisition Ledger.
//!
//! Provides domain-separated BLAKE3 hashing of blocks and live-record
//! snapshots, canonicalization of JSON payloads, and hash chain verification.
//!
//! All crypto operations wrap established libraries; there is no custom cryptography.

pub mod canonical;
pub mod chain;
pub mod hasher;

pub use canonical::canonicalize;
pub use chain::{ChainFault, ChainLink, FaultKind, HashChainVerifier};
pub use hasher::{ContentHasher, HasherError};
