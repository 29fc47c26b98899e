//! Command-line / environment configuration for the block-builder, following this
//! stack's house convention of a top-level [`clap::Parser`] struct with flattened
//! sub-configs per external collaborator.

use std::{collections::BTreeMap, time::Duration};

use partition_log::PartitionId;

/// Top-level block-builder configuration.
///
/// Every field is settable by CLI flag or the matching `BLOCK_BUILDER_*` environment
/// variable, with CLI flags taking precedence (the stack's usual `.env`-then-environment-
/// then-flags precedence order).
#[derive(Debug, Clone, clap::Parser)]
#[clap(
    name = "block-builder",
    about = "Consumes trace records from the partitioned log and compacts them into \
             immutable, content-addressed storage blocks."
)]
pub struct BlockBuilderConfig {
    /// This instance's id, used to look itself up in `assigned_partitions`.
    #[clap(long = "instance-id", env = "BLOCK_BUILDER_INSTANCE_ID", action)]
    pub instance_id: String,

    /// Static partition assignment, as a JSON object mapping instance id to an array of
    /// partition ids, e.g. `{"block-builder-0": [0, 1, 2]}`.
    ///
    /// Resolved against the live partition ring at startup and before every sweep (see
    /// [`crate::assignment::resolve_assigned_partitions`]) to drop partitions the ring no
    /// longer considers active.
    #[clap(
        long = "assigned-partitions",
        env = "BLOCK_BUILDER_ASSIGNED_PARTITIONS",
        value_parser = parse_assigned_partitions,
        action
    )]
    pub assigned_partitions: AssignedPartitions,

    /// Width of one consume cycle (`D` in the cycle time model): the span of record
    /// timestamps buffered into a single section before it is flushed.
    #[clap(
        long = "consume-cycle-duration",
        env = "BLOCK_BUILDER_CONSUME_CYCLE_DURATION",
        value_parser = humantime::parse_duration,
        default_value = "5m"
    )]
    pub consume_cycle_duration: Duration,

    #[clap(flatten)]
    pub ingest_storage: IngestStorageConfig,

    #[clap(flatten)]
    pub block: BlockConfig,

    #[clap(flatten)]
    pub wal: WalConfig,
}

impl BlockBuilderConfig {
    /// The partitions statically assigned to this instance, unresolved against the ring.
    pub fn own_assigned_partitions(&self) -> Vec<PartitionId> {
        self.assigned_partitions
            .0
            .get(&self.instance_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// A static `{instance_id -> [partition_ids]}` map, as parsed from the
/// `--assigned-partitions` flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignedPartitions(pub BTreeMap<String, Vec<PartitionId>>);

fn parse_assigned_partitions(raw: &str) -> Result<AssignedPartitions, serde_json::Error> {
    serde_json::from_str::<BTreeMap<String, Vec<PartitionId>>>(raw).map(AssignedPartitions)
}

/// `IngestStorageConfig.Kafka.*` — the log connection this instance consumes from.
#[derive(Debug, Clone, clap::Parser)]
pub struct IngestStorageConfig {
    /// Address(es) of the log brokers to connect to.
    #[clap(long = "ingest-storage-kafka-address", env = "BLOCK_BUILDER_INGEST_STORAGE_KAFKA_ADDRESS", action)]
    pub kafka_address: String,

    /// Topic this instance consumes trace records from.
    #[clap(long = "ingest-storage-kafka-topic", env = "BLOCK_BUILDER_INGEST_STORAGE_KAFKA_TOPIC", action)]
    pub kafka_topic: String,

    /// Consumer group offsets are committed under.
    #[clap(
        long = "ingest-storage-kafka-consumer-group",
        env = "BLOCK_BUILDER_INGEST_STORAGE_KAFKA_CONSUMER_GROUP",
        action
    )]
    pub kafka_consumer_group: String,
}

/// `BlockConfig.*` — parameters carried verbatim into every emitted block.
#[derive(Debug, Clone, clap::Parser)]
pub struct BlockConfig {
    /// Encoding version new blocks are written with. Unset resolves to
    /// [`LATEST_ENCODING_VERSION`] at startup.
    #[clap(long = "block-version", env = "BLOCK_BUILDER_BLOCK_VERSION")]
    pub version: Option<u32>,

    /// Name of the block encoding scheme; currently informational, carried through to
    /// the storage writer's configuration.
    #[clap(long = "block-encoding", env = "BLOCK_BUILDER_BLOCK_ENCODING", default_value = "vparquet")]
    pub encoding: String,

    /// Target size, in bytes, between index downsample points.
    #[clap(
        long = "block-index-downsample-bytes",
        env = "BLOCK_BUILDER_BLOCK_INDEX_DOWNSAMPLE_BYTES",
        default_value = "1048576"
    )]
    pub index_downsample_bytes: u64,

    /// Target false-positive rate of the per-block bloom filter.
    #[clap(long = "block-bloom-fp", env = "BLOCK_BUILDER_BLOCK_BLOOM_FP", default_value = "0.01")]
    pub bloom_fp: f64,

    /// Size, in bytes, of each bloom filter shard.
    #[clap(
        long = "block-bloom-shard-size-bytes",
        env = "BLOCK_BUILDER_BLOCK_BLOOM_SHARD_SIZE_BYTES",
        default_value = "104857600"
    )]
    pub bloom_shard_size_bytes: u64,

    /// Target size, in bytes, of one index page.
    #[clap(
        long = "block-index-page-size-bytes",
        env = "BLOCK_BUILDER_BLOCK_INDEX_PAGE_SIZE_BYTES",
        default_value = "262144"
    )]
    pub index_page_size_bytes: u64,
}

/// The latest block encoding version this builder knows how to write.
///
/// [`BlockConfig::version`] resolves to this at startup when unset (see
/// [`crate::service::resolve_encoding_version`]).
pub const LATEST_ENCODING_VERSION: u32 = 2;

/// `WAL.*` — the scratch directory the section writer's per-tenant aggregators back
/// onto while a cycle is in flight.
#[derive(Debug, Clone, clap::Parser)]
pub struct WalConfig {
    /// Directory new WAL files are created under.
    #[clap(long = "wal-filepath", env = "BLOCK_BUILDER_WAL_FILEPATH", action)]
    pub filepath: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_assigned_partitions_json() {
        let parsed = parse_assigned_partitions(r#"{"block-builder-0": [0, 1, 2]}"#).unwrap();
        assert_eq!(parsed.0.get("block-builder-0"), Some(&vec![0, 1, 2]));
    }

    #[test]
    fn rejects_malformed_assigned_partitions() {
        assert!(parse_assigned_partitions("not json").is_err());
    }

    #[test]
    fn own_assigned_partitions_looks_up_by_instance_id() {
        let config = BlockBuilderConfig {
            instance_id: "block-builder-0".to_string(),
            assigned_partitions: AssignedPartitions(BTreeMap::from([("block-builder-0".to_string(), vec![0, 1])])),
            consume_cycle_duration: Duration::from_secs(60),
            ingest_storage: IngestStorageConfig {
                kafka_address: "localhost:9092".to_string(),
                kafka_topic: "traces".to_string(),
                kafka_consumer_group: "block-builder".to_string(),
            },
            block: BlockConfig {
                version: None,
                encoding: "vparquet".to_string(),
                index_downsample_bytes: 1024,
                bloom_fp: 0.01,
                bloom_shard_size_bytes: 1024,
                index_page_size_bytes: 1024,
            },
            wal: WalConfig {
                filepath: "/tmp/wal".to_string(),
            },
        };

        assert_eq!(config.own_assigned_partitions(), vec![0, 1]);
    }
}
