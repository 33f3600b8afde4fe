use lal_types::{Block, Digest};

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g., `"lal-block-v1"`) that is
/// prepended to every hash computation, so a block and a snapshot with
/// identical bytes never share a digest. Bumping the version suffix is how
/// the canonical encoding evolves.
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for chain blocks (`current_hash`).
    pub const BLOCK: Self = Self {
        domain: "lal-block-v1",
    };
    /// Hasher for live-record snapshot content digests.
    pub const SNAPSHOT: Self = Self {
        domain: "lal-snapshot-v1",
    };
    /// Hasher for individual snapshot field values.
    pub const FIELD: Self = Self {
        domain: "lal-field-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(data);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// Map keys inside `serde_json::Value` are already sorted, so equal
    /// values always serialize to equal bytes.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<Digest, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data) == *expected
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }

    /// Compute the chain hash of a block from its canonical header.
    ///
    /// The stored `current_hash` and the `is_valid` flag do not participate.
    pub fn hash_block(block: &Block) -> Result<Digest, HasherError> {
        Self::BLOCK.hash_json(&block.header())
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
