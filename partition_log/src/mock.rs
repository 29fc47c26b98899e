//! An in-memory [`LogClient`] for tests.
//!
//! Modeled on the write-buffer crate's mock reader/writer pair: partition-scoped queues
//! of records that tests populate directly via [`MockLogClient::produce`], plus counters
//! that let a test fail the Nth fetch or commit call to exercise the block-builder's
//! retry-via-next-sweep behavior.

use crate::{Fetches, LogClient, LogClientError, LogClientErrorKind, Offset, PartitionId, Record};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
    time::Duration,
};

#[derive(Debug, Default)]
struct TopicState {
    /// The full, append-only log per partition.
    log: BTreeMap<PartitionId, Vec<Record>>,
    /// Partitions currently registered for consumption, and the next offset to serve.
    registered: BTreeMap<PartitionId, Offset>,
    /// Committed offsets, by consumer group.
    committed: BTreeMap<String, BTreeMap<PartitionId, Offset>>,
}

#[derive(Debug, Default)]
struct State {
    topics: BTreeMap<String, TopicState>,
    pending_fetch_failures: VecDeque<LogClientErrorKind>,
    pending_commit_failures: VecDeque<LogClientErrorKind>,
    commit_attempts: u64,
}

/// An in-memory [`LogClient`] backed by queues a test populates directly.
///
/// Cloning shares the underlying state (it is an `Arc` handle), matching the way a real
/// log client is a cheap handle onto a shared connection pool.
#[derive(Debug, Clone, Default)]
pub struct MockLogClient {
    state: Arc<Mutex<State>>,
}

impl MockLogClient {
    /// Create a new, empty mock log client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `records` to `partition` of `topic`'s backing log.
    ///
    /// Records must be supplied in offset order; this does not renumber them.
    pub fn produce(&self, topic: &str, partition: PartitionId, records: impl IntoIterator<Item = Record>) {
        let mut state = self.state.lock();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        topic_state.log.entry(partition).or_default().extend(records);
    }

    /// Pre-seed a committed offset for `group` on `topic`, as if set before the mock
    /// was handed to the builder (used to set up "resume from commit" scenarios).
    pub fn seed_commit(&self, group: &str, topic: &str, partition: PartitionId, offset: Offset) {
        let mut state = self.state.lock();
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .committed
            .entry(group.to_string())
            .or_default()
            .insert(partition, offset);
    }

    /// Cause the next `times` calls to [`LogClient::poll_fetches`] to fail with `kind`
    /// instead of serving real data.
    pub fn fail_next_fetches(&self, kind: LogClientErrorKind, times: usize) {
        let mut state = self.state.lock();
        state.pending_fetch_failures.extend(std::iter::repeat(kind).take(times));
    }

    /// Cause the next `times` calls to [`LogClient::commit_offsets`] to fail with `kind`.
    pub fn fail_next_commits(&self, kind: LogClientErrorKind, times: usize) {
        let mut state = self.state.lock();
        state.pending_commit_failures.extend(std::iter::repeat(kind).take(times));
    }

    /// Total number of [`LogClient::commit_offsets`] calls made so far, including ones
    /// that were rejected by fail injection.
    pub fn commit_attempts(&self) -> u64 {
        self.state.lock().commit_attempts
    }
}

fn err_for_kind(kind: LogClientErrorKind) -> LogClientError {
    match kind {
        LogClientErrorKind::DeadlineExceeded => LogClientError::deadline_exceeded(),
        LogClientErrorKind::RebalanceInProgress => LogClientError::rebalance_in_progress("rebalance in progress"),
        LogClientErrorKind::GroupNotFound => LogClientError::group_not_found("unknown group"),
        LogClientErrorKind::Io => LogClientError::io("injected io failure"),
        LogClientErrorKind::Unknown => LogClientError::new(LogClientErrorKind::Unknown, "injected failure"),
    }
}

#[async_trait]
impl LogClient for MockLogClient {
    async fn ping(&self) -> Result<(), LogClientError> {
        Ok(())
    }

    async fn add_consume_partitions(
        &self,
        topic: &str,
        partitions: BTreeMap<PartitionId, Offset>,
    ) -> Result<(), LogClientError> {
        let mut state = self.state.lock();
        let topic_state = state.topics.entry(topic.to_string()).or_default();
        topic_state.registered.extend(partitions);
        Ok(())
    }

    async fn remove_consume_partitions(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> Result<(), LogClientError> {
        let mut state = self.state.lock();
        if let Some(topic_state) = state.topics.get_mut(topic) {
            for partition in partitions {
                topic_state.registered.remove(partition);
            }
        }
        Ok(())
    }

    async fn poll_fetches(&self, _timeout: Duration) -> Fetches {
        let mut state = self.state.lock();
        if let Some(kind) = state.pending_fetch_failures.pop_front() {
            return Fetches::from_error(err_for_kind(kind));
        }

        let mut records = Vec::new();
        for topic_state in state.topics.values_mut() {
            let log = &topic_state.log;
            for (partition, next_offset) in topic_state.registered.iter_mut() {
                let Some(partition_log) = log.get(partition) else {
                    continue;
                };
                for record in partition_log {
                    if record.offset >= *next_offset {
                        records.push(record.clone());
                    }
                }
                if let Some(last) = partition_log.last() {
                    *next_offset = (*next_offset).max(last.offset + 1);
                }
            }
        }
        records.sort_by_key(|r| (r.partition, r.offset));

        if records.is_empty() {
            Fetches::empty()
        } else {
            Fetches::from_records(records)
        }
    }

    async fn fetch_offsets_for_topics(
        &self,
        group: &str,
        topic: &str,
    ) -> Result<BTreeMap<PartitionId, Offset>, LogClientError> {
        let state = self.state.lock();
        Ok(state
            .topics
            .get(topic)
            .and_then(|t| t.committed.get(group))
            .cloned()
            .unwrap_or_default())
    }

    async fn commit_offsets(
        &self,
        group: &str,
        topic: &str,
        offsets: BTreeMap<PartitionId, Offset>,
    ) -> Result<(), LogClientError> {
        let mut state = self.state.lock();
        state.commit_attempts += 1;
        if let Some(kind) = state.pending_commit_failures.pop_front() {
            return Err(err_for_kind(kind));
        }
        state
            .topics
            .entry(topic.to_string())
            .or_default()
            .committed
            .entry(group.to_string())
            .or_default()
            .extend(offsets);
        Ok(())
    }

    async fn list_start_offsets(&self, topic: &str) -> Result<BTreeMap<PartitionId, Offset>, LogClientError> {
        let state = self.state.lock();
        Ok(state
            .topics
            .get(topic)
            .map(|t| {
                t.log
                    .iter()
                    .map(|(p, records)| (*p, records.first().map(|r| r.offset).unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_end_offsets(&self, topic: &str) -> Result<BTreeMap<PartitionId, Offset>, LogClientError> {
        let state = self.state.lock();
        Ok(state
            .topics
            .get(topic)
            .map(|t| {
                t.log
                    .iter()
                    .map(|(p, records)| (*p, records.last().map(|r| r.offset + 1).unwrap_or(0)))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn fetch_offsets(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> Result<BTreeMap<PartitionId, Offset>, LogClientError> {
        let all = self.list_end_offsets(topic).await?;
        Ok(all
            .into_iter()
            .filter(|(p, _)| partitions.contains(p))
            .collect())
    }

    async fn close(&self) -> Result<(), LogClientError> {
        Ok(())
    }
}
