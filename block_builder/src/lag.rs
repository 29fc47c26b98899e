//! The background lag-reporting task: every 15s, computes each assigned partition's
//! offset distance from the log head and exposes it as a gauge.
//!
//! Independent of the consume loop; shares only the log client handle (used here for
//! disjoint, read-only admin-offset queries) and the partition ring.

use std::{sync::Arc, time::Duration};

use observability_deps::tracing::warn;
use partition_log::{LogClient, LogClientErrorKind, Offset, PartitionId};
use tokio_util::sync::CancellationToken;

use crate::{assignment::resolve_assigned_partitions, metrics::BlockBuilderMetrics, ring::PartitionRingReader};

/// How often the lag loop recomputes and republishes lag gauges.
pub const LAG_INTERVAL: Duration = Duration::from_secs(15);

/// Run the lag-reporting loop until `cancel` fires.
///
/// The block-builder does not participate in consumer-group rebalancing, so "no
/// committed offset for this partition" and "the consumer group doesn't exist at all"
/// are treated identically: lag is computed against the partition's earliest available
/// offset instead of its committed one.
pub async fn run_lag_loop(
    log: Arc<dyn LogClient>,
    ring: Arc<dyn PartitionRingReader>,
    metrics: BlockBuilderMetrics,
    topic: String,
    consumer_group: String,
    configured_partitions: Vec<PartitionId>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(LAG_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let partition_ring = ring.partition_ring();
                let active = resolve_assigned_partitions(&configured_partitions, &partition_ring);
                report_lag(log.as_ref(), &topic, &consumer_group, &active, &metrics).await;
            }
        }
    }
}

async fn report_lag(
    log: &dyn LogClient,
    topic: &str,
    consumer_group: &str,
    partitions: &[PartitionId],
    metrics: &BlockBuilderMetrics,
) {
    if partitions.is_empty() {
        return;
    }

    let (end_offsets, committed) = tokio::join!(
        log.fetch_offsets(topic, partitions),
        log.fetch_offsets_for_topics(consumer_group, topic),
    );

    let end_offsets = match end_offsets {
        Ok(offsets) => offsets,
        Err(e) => {
            warn!(error = %e, "failed to fetch end offsets for lag computation");
            return;
        }
    };

    let committed = match committed {
        Ok(offsets) => offsets,
        Err(e) if e.kind() == LogClientErrorKind::GroupNotFound => Default::default(),
        Err(e) => {
            warn!(error = %e, "failed to fetch committed offsets for lag computation");
            return;
        }
    };

    // A partition with no valid (non-negative) committed offset needs the earliest-offset
    // fallback, whether it's absent from `committed` entirely or present with a negative
    // "no commit" sentinel (spec §6).
    let needs_start_offsets = partitions
        .iter()
        .any(|p| !matches!(committed.get(p), Some(&offset) if offset >= 0));
    let start_offsets = if needs_start_offsets {
        log.list_start_offsets(topic).await.unwrap_or_default()
    } else {
        Default::default()
    };

    for &partition in partitions {
        let Some(&end) = end_offsets.get(&partition) else {
            continue;
        };

        let baseline: Offset = match committed.get(&partition) {
            Some(&offset) if offset >= 0 => offset,
            _ => start_offsets.get(&partition).copied().unwrap_or(0),
        };

        let lag = end.saturating_sub(baseline).max(0) as u64;
        metrics.partition_lag(partition).set(lag);
    }
}
