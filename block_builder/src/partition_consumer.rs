//! Drives one partition's consumption for one logical cycle.

use crate::{
    decode::Decoder,
    metrics::BlockBuilderMetrics,
    overrides::Overrides,
    section::{BlockParams, SectionWriter},
    storage::{BlockWriter, FlushError},
};
use iox_time::{Time, TimeProvider};
use observability_deps::tracing::{info, warn};
use partition_log::{LogClient, LogClientError, Offset, PartitionId, Record};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;

/// The fetch poll timeout used by [`consume_partition`]. A deadline-exceeded result is
/// treated as "no more data for now", not an error.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Failure surfaces from one [`consume_partition`] call.
///
/// Per-partition errors are returned to the cycle driver, which logs and moves on to
/// the next partition; there is no local retry within a cycle. Recovery happens
/// implicitly via the next sweep plus the section writer's deterministic block ids.
#[derive(Debug, Error)]
pub enum ConsumePartitionError {
    /// Fetching the committed offset or polling new records failed.
    #[error("fetch failed for partition {partition}: {source}")]
    Fetch {
        /// The partition the fetch was for.
        partition: PartitionId,
        /// The underlying log client error.
        #[source]
        source: LogClientError,
    },

    /// A record's payload could not be decoded.
    #[error("decode failed for partition {partition}: {source}")]
    Decode {
        /// The partition the decode failure occurred on.
        partition: PartitionId,
        /// The underlying decode error.
        #[source]
        source: crate::decode::DecodeError,
    },

    /// Flushing the section writer failed.
    #[error("flush failed for partition {partition}: {source}")]
    Flush {
        /// The partition the flush failure occurred on.
        partition: PartitionId,
        /// The underlying flush error.
        #[source]
        source: FlushError,
    },

    /// Committing the offset failed.
    #[error("commit failed for partition {partition}: {source}")]
    Commit {
        /// The partition the commit failure occurred on.
        partition: PartitionId,
        /// The underlying log client error.
        #[source]
        source: LogClientError,
    },
}

/// Drive `partition`'s consumption for one cycle.
///
/// Returns `Ok(true)` if another cycle should run immediately for this partition
/// (there is still room before `overall_end`), `Ok(false)` if this sweep is done with
/// this partition.
#[allow(clippy::too_many_arguments)]
pub async fn consume_partition(
    log: &dyn LogClient,
    decoder: &mut dyn Decoder,
    overrides: &dyn Overrides,
    writer: &dyn BlockWriter,
    block_params: &BlockParams,
    time_provider: &dyn TimeProvider,
    topic: &str,
    consumer_group: &str,
    partition: PartitionId,
    cycle_duration: Duration,
    overall_end: Time,
    metrics: &BlockBuilderMetrics,
) -> Result<bool, ConsumePartitionError> {
    let started = std::time::Instant::now();

    let start_offset = resolve_start_offset(log, topic, consumer_group, partition).await?;

    log.add_consume_partitions(topic, BTreeMap::from([(partition, start_offset)]))
        .await
        .map_err(|source| ConsumePartitionError::Fetch { partition, source })?;

    let result = run_cycle(
        log,
        decoder,
        overrides,
        writer,
        block_params,
        time_provider,
        topic,
        consumer_group,
        partition,
        start_offset,
        cycle_duration,
        overall_end,
        metrics,
    )
    .await;

    // Release this partition's assignment on every exit path, mirroring the hard
    // single-partition-at-a-time discipline the log client requires.
    if let Err(e) = log.remove_consume_partitions(topic, &[partition]).await {
        warn!(partition, error = %e, "failed to release partition assignment");
    }

    metrics
        .process_partition_section_duration_seconds(partition)
        .record(started.elapsed());

    result
}

async fn resolve_start_offset(
    log: &dyn LogClient,
    topic: &str,
    consumer_group: &str,
    partition: PartitionId,
) -> Result<Offset, ConsumePartitionError> {
    let committed = log
        .fetch_offsets_for_topics(consumer_group, topic)
        .await
        .map_err(|source| ConsumePartitionError::Fetch { partition, source })?;

    match committed.get(&partition) {
        Some(&offset) if offset >= 0 => Ok(offset),
        _ => {
            let start_offsets = log
                .list_start_offsets(topic)
                .await
                .map_err(|source| ConsumePartitionError::Fetch { partition, source })?;
            Ok(start_offsets.get(&partition).copied().unwrap_or(0))
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_cycle(
    log: &dyn LogClient,
    decoder: &mut dyn Decoder,
    overrides: &dyn Overrides,
    writer: &dyn BlockWriter,
    block_params: &BlockParams,
    time_provider: &dyn TimeProvider,
    topic: &str,
    consumer_group: &str,
    partition: PartitionId,
    start_offset: Offset,
    cycle_duration: Duration,
    overall_end: Time,
    metrics: &BlockBuilderMetrics,
) -> Result<bool, ConsumePartitionError> {
    let cycle_duration_nanos = cycle_duration.as_nanos() as i64;
    let overall_end_nanos = overall_end.timestamp_nanos();

    let mut cycle_end_nanos: Option<i64> = None;
    let mut section: Option<SectionWriter> = None;
    let mut last_record: Option<Record> = None;
    let mut more = false;

    'poll: loop {
        let records = match log.poll_fetches(FETCH_TIMEOUT).await.into_result() {
            Ok(records) => records,
            Err(err) if err.is_deadline_exceeded() => break 'poll,
            Err(source) => {
                metrics.fetch_errors_total(partition).inc(1);
                return Err(ConsumePartitionError::Fetch { partition, source });
            }
        };
        if records.is_empty() {
            break 'poll;
        }

        for record in records {
            let cycle_end = *cycle_end_nanos.get_or_insert_with(|| {
                let end = record.timestamp.timestamp_nanos() + cycle_duration_nanos;
                metrics.partition_lag_seconds(partition).set(
                    time_provider
                        .now()
                        .checked_duration_since(record.timestamp)
                        .map(|d| d.as_secs())
                        .unwrap_or(0),
                );
                section = Some(SectionWriter::new(partition, record.offset, end));
                end
            });

            if record.timestamp.timestamp_nanos() > overall_end_nanos {
                more = false;
                break 'poll;
            } else if record.timestamp.timestamp_nanos() >= cycle_end {
                more = overall_end_nanos - record.timestamp.timestamp_nanos() >= cycle_duration_nanos;
                break 'poll;
            }

            let tenant = record.key.clone();
            let trace_request = decoder
                .decode(&record.value)
                .map_err(|source| ConsumePartitionError::Decode { partition, source })?;
            decoder.reset();

            section
                .as_mut()
                .expect("section initialized by the first record of this cycle")
                .push(&tenant, trace_request)
                .map_err(|e| ConsumePartitionError::Flush {
                    partition,
                    source: FlushError::Write {
                        block_id: crate::storage::BlockId::derive(partition, cycle_end, &tenant),
                        tenant,
                        source: Box::new(e),
                    },
                })?;

            last_record = Some(record);
        }
    }

    let Some(last_record) = last_record else {
        return Ok(false);
    };

    let section = section.expect("set alongside last_record");
    section
        .flush(overrides, block_params, writer)
        .await
        .map_err(|source| ConsumePartitionError::Flush { partition, source })?;

    log.commit_offsets(
        consumer_group,
        topic,
        BTreeMap::from([(partition, last_record.offset + 1)]),
    )
    .await
    .map_err(|source| ConsumePartitionError::Commit { partition, source })?;

    info!(
        partition,
        offset = last_record.offset + 1,
        "committed partition offset"
    );

    Ok(more)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        decode::{DecodeError, TraceRequest},
        overrides::NoOverrides,
        storage::mock::MockBlockWriter,
    };
    use iox_time::SystemProvider;
    use partition_log::mock::MockLogClient;

    #[derive(Debug, Default)]
    struct EchoDecoder;

    impl Decoder for EchoDecoder {
        fn decode(&mut self, bytes: &[u8]) -> Result<TraceRequest, DecodeError> {
            Ok(TraceRequest {
                object_count: 1,
                payload: bytes.to_vec(),
            })
        }

        fn reset(&mut self) {}
    }

    fn record(partition: PartitionId, offset: i64, nanos: i64) -> Record {
        Record {
            partition,
            offset,
            timestamp: Time::from_timestamp_nanos(nanos),
            key: b"tenant-a".to_vec(),
            value: b"trace".to_vec(),
        }
    }

    /// A record exactly at `cycle_end` (the first record's timestamp plus `D`) is the
    /// exclusive upper bound of the half-open `[t0, t0+D)` cycle window, so it must be
    /// deferred to a new cycle rather than folded into the one it would close.
    #[tokio::test]
    async fn record_exactly_at_cycle_end_starts_a_new_cycle() {
        let log = MockLogClient::new();
        let cycle_duration = Duration::from_secs(5);
        let cycle_duration_nanos = cycle_duration.as_nanos() as i64;
        // First record at t=0 opens a cycle ending at exactly `cycle_duration_nanos`.
        log.produce("traces", 0, [record(0, 0, 0), record(0, 1, cycle_duration_nanos)]);
        log.add_consume_partitions("traces", BTreeMap::from([(0, 0)])).await.unwrap();

        let writer = MockBlockWriter::new();
        let params = BlockParams {
            encoding_version: 1,
            bloom_filter: vec![],
            index: vec![],
        };
        let metrics = BlockBuilderMetrics::new(&metric::Registry::new());
        let mut decoder = EchoDecoder;
        let time_provider = SystemProvider::new();
        let overall_end = Time::from_timestamp_nanos(cycle_duration_nanos * 10);

        let more = run_cycle(
            &log,
            &mut decoder,
            &NoOverrides,
            &writer,
            &params,
            &time_provider,
            "traces",
            "group-a",
            0,
            0,
            cycle_duration,
            overall_end,
            &metrics,
        )
        .await
        .unwrap();

        // Only the first record (t=0) belongs to this cycle; the boundary record (t=D)
        // was deferred, so there's more work left for this partition this sweep.
        assert!(more);
        let blocks = writer.block_metas(b"tenant-a").await;
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].object_count, 1);

        let committed = log.fetch_offsets_for_topics("group-a", "traces").await.unwrap();
        assert_eq!(committed.get(&0), Some(&1));
    }
}
