//! The named instruments the block-builder exposes, registered once at startup and
//! handed out per-partition as needed.

use metric::{Attributes, DurationHistogram, Metric, Registry, U64Counter, U64Gauge};
use partition_log::PartitionId;

/// Handle onto the block-builder's registered metrics.
#[derive(Debug, Clone)]
pub struct BlockBuilderMetrics {
    partition_lag: Metric<U64Gauge>,
    partition_lag_seconds: Metric<U64Gauge>,
    consume_cycle_duration_seconds: Metric<DurationHistogram>,
    process_partition_section_duration_seconds: Metric<DurationHistogram>,
    fetch_errors_total: Metric<U64Counter>,
}

impl BlockBuilderMetrics {
    /// Register this builder's instruments in `registry`.
    pub fn new(registry: &Registry) -> Self {
        Self {
            partition_lag: registry.register_metric("partition_lag", "offset distance between the log head and the committed position"),
            partition_lag_seconds: registry.register_metric(
                "partition_lag_seconds",
                "wall-clock delta between now and the first record of the current cycle",
            ),
            consume_cycle_duration_seconds: registry
                .register_metric("consume_cycle_duration_seconds", "time spent in one consume sweep"),
            process_partition_section_duration_seconds: registry.register_metric(
                "process_partition_section_duration_seconds",
                "time spent consuming one partition for one cycle",
            ),
            fetch_errors_total: registry.register_metric("fetch_errors_total", "fetch errors encountered per partition"),
        }
    }

    fn partition_attributes(partition: PartitionId) -> Attributes {
        Attributes::from(&[("partition", partition.to_string().as_str())])
    }

    /// The offset-lag gauge for `partition`.
    pub fn partition_lag(&self, partition: PartitionId) -> U64Gauge {
        self.partition_lag.recorder(Self::partition_attributes(partition))
    }

    /// The time-lag gauge for `partition`.
    pub fn partition_lag_seconds(&self, partition: PartitionId) -> U64Gauge {
        self.partition_lag_seconds.recorder(Self::partition_attributes(partition))
    }

    /// The per-sweep duration histogram, not broken out by partition.
    pub fn consume_cycle_duration_seconds(&self) -> DurationHistogram {
        self.consume_cycle_duration_seconds.recorder(Attributes::empty())
    }

    /// The per-`consume_partition`-call duration histogram for `partition`.
    pub fn process_partition_section_duration_seconds(&self, partition: PartitionId) -> DurationHistogram {
        self.process_partition_section_duration_seconds
            .recorder(Self::partition_attributes(partition))
    }

    /// The fetch-error counter for `partition`.
    pub fn fetch_errors_total(&self, partition: PartitionId) -> U64Counter {
        self.fetch_errors_total.recorder(Self::partition_attributes(partition))
    }
}
