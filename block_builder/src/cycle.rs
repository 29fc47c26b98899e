//! Iterates over the assigned, active partitions and drains each via
//! [`consume_partition`], on a periodic timer.

use crate::{
    decode::Decoder,
    metrics::BlockBuilderMetrics,
    overrides::Overrides,
    partition_consumer::consume_partition,
    section::BlockParams,
    storage::BlockWriter,
};
use iox_time::TimeProvider;
use observability_deps::tracing::error;
use partition_log::{LogClient, PartitionId};
use std::time::{Duration, Instant};

/// Run one sweep: drive each of `assigned_partitions` until it reports no more work,
/// in sequence, with a single `overall_end` captured at sweep start.
///
/// A partition whose `consume_partition` call errors is abandoned for this sweep only;
/// the outer timer will retry it on the next sweep.
#[allow(clippy::too_many_arguments)]
pub async fn run_sweep(
    log: &dyn LogClient,
    decoder: &mut dyn Decoder,
    overrides: &dyn Overrides,
    writer: &dyn BlockWriter,
    block_params: &BlockParams,
    time_provider: &dyn TimeProvider,
    topic: &str,
    consumer_group: &str,
    assigned_partitions: &[PartitionId],
    cycle_duration: Duration,
    metrics: &BlockBuilderMetrics,
) {
    let started = Instant::now();
    let overall_end = time_provider.now();

    for &partition in assigned_partitions {
        loop {
            let outcome = consume_partition(
                log,
                decoder,
                overrides,
                writer,
                block_params,
                time_provider,
                topic,
                consumer_group,
                partition,
                cycle_duration,
                overall_end,
                metrics,
            )
            .await;

            match outcome {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    error!(partition, error = %e, "aborting partition for this sweep");
                    break;
                }
            }
        }
    }

    metrics.consume_cycle_duration_seconds().record(started.elapsed());
}
