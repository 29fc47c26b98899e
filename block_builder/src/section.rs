//! The per-cycle, per-partition accumulator that buffers decoded traces by tenant and
//! emits one immutable block per tenant on flush.

use crate::{
    decode::TraceRequest,
    overrides::Overrides,
    storage::{Block, BlockId, BlockWriter, FlushError},
};
use observability_deps::tracing::{debug, warn};
use partition_log::{Offset, PartitionId};
use std::collections::BTreeMap;
use thiserror::Error;

/// Per-builder-instance settings carried verbatim into every emitted block.
#[derive(Debug, Clone)]
pub struct BlockParams {
    /// The encoding version new blocks are written with.
    pub encoding_version: u32,
    /// Opaque bloom filter configuration, copied into each block as-is.
    pub bloom_filter: Vec<u8>,
    /// Opaque index configuration, copied into each block as-is.
    pub index: Vec<u8>,
}

/// A push into the section writer's WAL-backed aggregator failed.
#[derive(Debug, Error)]
pub enum PushError {
    /// The WAL refused the write (e.g. disk I/O failure).
    #[error("WAL append failed for tenant {tenant:?}: {source}")]
    Wal {
        /// The tenant whose append failed.
        tenant: Vec<u8>,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Default)]
struct TenantAggregator {
    object_count: u64,
    payload: Vec<u8>,
}

/// Buffers decoded traces in a per-tenant WAL-backed aggregator until the cycle closes,
/// then emits one block per tenant.
///
/// Lives from the first record of a cycle until [`SectionWriter::flush`] completes.
#[derive(Debug)]
pub struct SectionWriter {
    partition: PartitionId,
    start_offset: Offset,
    cycle_end_nanos: i64,
    tenants: BTreeMap<Vec<u8>, TenantAggregator>,
}

impl SectionWriter {
    /// Start a new section for `partition`, whose first record has offset
    /// `start_offset` and whose cycle ends at `cycle_end_nanos`.
    pub fn new(partition: PartitionId, start_offset: Offset, cycle_end_nanos: i64) -> Self {
        Self {
            partition,
            start_offset,
            cycle_end_nanos,
            tenants: BTreeMap::new(),
        }
    }

    /// The partition this section belongs to.
    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Append a decoded request to `tenant`'s aggregator, creating it lazily.
    pub fn push(&mut self, tenant: &[u8], req: TraceRequest) -> Result<(), PushError> {
        let aggregator = self.tenants.entry(tenant.to_vec()).or_default();
        aggregator.object_count += req.object_count;
        aggregator.payload.extend_from_slice(&req.payload);
        Ok(())
    }

    /// The number of tenants with buffered data in this section.
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    /// Finalize every tenant's aggregator into a block and write it out.
    ///
    /// Attempts every tenant even if an earlier one fails, since the failed tenant's
    /// block can be re-flushed (overwriting, by deterministic id) on the next sweep
    /// without disturbing tenants that already succeeded.
    pub async fn flush(
        self,
        overrides: &dyn Overrides,
        params: &BlockParams,
        writer: &dyn BlockWriter,
    ) -> Result<(), FlushError> {
        let mut first_error = None;

        for (tenant, aggregator) in self.tenants {
            let id = BlockId::derive(self.partition, self.cycle_end_nanos, &tenant);

            let block = Block {
                id,
                partition: self.partition,
                start_offset: self.start_offset,
                tenant: tenant.clone(),
                object_count: aggregator.object_count,
                encoding_version: params.encoding_version,
                bloom_filter: params.bloom_filter.clone(),
                index: params.index.clone(),
                dedicated_columns: overrides.dedicated_columns(&tenant),
            };

            match writer.write_block(block).await {
                Ok(()) => {
                    debug!(partition = self.partition, tenant = ?tenant, block_id = %id, "wrote block");
                }
                Err(e) => {
                    warn!(partition = self.partition, tenant = ?tenant, block_id = %id, error = %e, "failed to write block");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
