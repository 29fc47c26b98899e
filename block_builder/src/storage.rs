//! The storage interfaces the section writer flushes into.
//!
//! Both the write-ahead log and the encoded-block writer are external collaborators: this
//! module only defines the shape the section writer needs, plus [`mock`] implementations
//! used by the end-to-end tests.

use async_trait::async_trait;
use partition_log::{Offset, PartitionId};
use std::fmt::Debug;
use thiserror::Error;

/// A deterministic identifier for one tenant's block within one partition-cycle.
///
/// Computed as a pure function of `(partition, cycle_end, tenant)` — see
/// [`BlockId::derive`]. Re-running the same cycle after a commit failure yields the same
/// id, so the overwrite is idempotent (spec invariant I2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(u64);

impl BlockId {
    /// Derive the block id for `tenant`'s section of `partition`'s cycle ending at
    /// `cycle_end_nanos`.
    ///
    /// Uses FNV-1a rather than `std`'s `DefaultHasher` so the derivation is an explicit,
    /// auditable pure function rather than an incidental property of a general-purpose
    /// hasher's implementation.
    pub fn derive(partition: PartitionId, cycle_end_nanos: i64, tenant: &[u8]) -> Self {
        const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut hash = FNV_OFFSET_BASIS;
        let mut mix = |bytes: &[u8]| {
            for b in bytes {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        };
        mix(&partition.to_be_bytes());
        mix(&cycle_end_nanos.to_be_bytes());
        mix(tenant);
        Self(hash)
    }

    /// The raw identifier value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// An immutable artifact emitted by the section writer on flush.
#[derive(Debug, Clone)]
pub struct Block {
    /// This block's deterministic identifier.
    pub id: BlockId,
    /// The partition this block's records were consumed from.
    pub partition: PartitionId,
    /// The first offset included in this block.
    pub start_offset: Offset,
    /// The tenant this block belongs to.
    pub tenant: Vec<u8>,
    /// Total number of trace objects aggregated into this block.
    pub object_count: u64,
    /// The encoding version the payload bytes were written with.
    pub encoding_version: u32,
    /// Opaque bloom filter bytes, carried verbatim from the builder's configuration.
    pub bloom_filter: Vec<u8>,
    /// Opaque index bytes, carried verbatim from the builder's configuration.
    pub index: Vec<u8>,
    /// Column names this tenant has opted to store as dedicated (non-shared) columns,
    /// as returned by [`crate::overrides::Overrides::dedicated_columns`].
    pub dedicated_columns: Vec<String>,
}

/// Failure writing a finalized block to the storage backend.
#[derive(Debug, Error)]
pub enum FlushError {
    /// The underlying storage write failed.
    #[error("failed to write block {block_id} for tenant {tenant:?}: {source}")]
    Write {
        /// The block that failed to write.
        block_id: BlockId,
        /// The tenant whose block failed to write.
        tenant: Vec<u8>,
        /// The underlying I/O error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Writes finalized blocks to the durable storage backend.
#[async_trait]
pub trait BlockWriter: Debug + Send + Sync + 'static {
    /// Durably write `block`, overwriting any prior block with the same id.
    async fn write_block(&self, block: Block) -> Result<(), FlushError>;

    /// List the metadata of every block written so far, for the given tenant. Test-only.
    async fn block_metas(&self, tenant: &[u8]) -> Vec<Block>;
}

/// In-memory test doubles for [`BlockWriter`].
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::{collections::VecDeque, sync::Arc};

    #[derive(Debug, Default)]
    struct State {
        /// Keyed by (tenant, id) so a re-flush of the same id overwrites in place.
        blocks: std::collections::BTreeMap<(Vec<u8>, BlockId), Block>,
        pending_failures: VecDeque<()>,
        write_attempts: u64,
    }

    /// An in-memory [`BlockWriter`] that stores blocks in a map keyed by `(tenant, id)`,
    /// so a re-flush under the same deterministic id overwrites the prior attempt exactly
    /// the way the real storage backend is expected to.
    #[derive(Debug, Clone, Default)]
    pub struct MockBlockWriter {
        state: Arc<Mutex<State>>,
    }

    impl MockBlockWriter {
        /// Create a new, empty mock block writer.
        pub fn new() -> Self {
            Self::default()
        }

        /// Cause the next `times` calls to [`BlockWriter::write_block`] to fail.
        pub fn fail_next_writes(&self, times: usize) {
            let mut state = self.state.lock();
            state.pending_failures.extend(std::iter::repeat(()).take(times));
        }

        /// Total number of [`BlockWriter::write_block`] calls made so far, including
        /// ones rejected by fail injection.
        pub fn write_attempts(&self) -> u64 {
            self.state.lock().write_attempts
        }

        /// All blocks currently stored, across all tenants.
        pub fn all_blocks(&self) -> Vec<Block> {
            self.state.lock().blocks.values().cloned().collect()
        }
    }

    #[async_trait]
    impl BlockWriter for MockBlockWriter {
        async fn write_block(&self, block: Block) -> Result<(), FlushError> {
            let mut state = self.state.lock();
            state.write_attempts += 1;
            if state.pending_failures.pop_front().is_some() {
                return Err(FlushError::Write {
                    block_id: block.id,
                    tenant: block.tenant,
                    source: "injected failure".into(),
                });
            }
            state.blocks.insert((block.tenant.clone(), block.id), block);
            Ok(())
        }

        async fn block_metas(&self, tenant: &[u8]) -> Vec<Block> {
            self.state
                .lock()
                .blocks
                .values()
                .filter(|b| b.tenant == tenant)
                .cloned()
                .collect()
        }
    }

}
