//! A small abstraction over the partitioned, durable log the block-builder consumes
//! from: fetching records, tracking consumer-group offsets, and listing watermarks.
//!
//! The wire protocol and transport are out of scope here (see the house write-buffer
//! crate for that shape) — this crate only defines the interface the block-builder's
//! partition consumer needs, plus an in-memory [`mock::MockLogClient`] for tests.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(missing_debug_implementations, missing_docs, clippy::use_self)]

pub mod mock;

use async_trait::async_trait;
use iox_time::Time;
use std::{
    collections::BTreeMap,
    fmt::{Debug, Display, Formatter},
    time::Duration,
};

/// A partition id within a topic.
pub type PartitionId = i32;

/// A record offset within a partition. Monotonic, starting at 0.
pub type Offset = i64;

/// A single record read from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// The partition this record was read from.
    pub partition: PartitionId,
    /// This record's offset within its partition.
    pub offset: Offset,
    /// Producer-assigned wall-clock timestamp.
    pub timestamp: Time,
    /// Opaque bytes identifying the tenant.
    pub key: Vec<u8>,
    /// Opaque encoded payload.
    pub value: Vec<u8>,
}

/// The result of one [`LogClient::poll_fetches`] call.
///
/// Mirrors the shape of a Kafka-style fetch response: either an ordered batch of
/// records, or an error describing why no records could be fetched this round.
#[derive(Debug, Default)]
pub struct Fetches {
    records: Vec<Record>,
    err: Option<LogClientError>,
}

impl Fetches {
    /// An empty, successful fetch (no data currently available).
    pub fn empty() -> Self {
        Self::default()
    }

    /// A fetch that failed outright.
    pub fn from_error(err: LogClientError) -> Self {
        Self {
            records: Vec::new(),
            err: Some(err),
        }
    }

    /// A fetch that returned records.
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records, err: None }
    }

    /// The error from this fetch, if any.
    pub fn err(&self) -> Option<&LogClientError> {
        self.err.as_ref()
    }

    /// Whether this fetch produced no records (regardless of error).
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume this [`Fetches`], yielding its records in offset order.
    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    /// Consume this [`Fetches`], separating the successful records from the error.
    pub fn into_result(self) -> Result<Vec<Record>, LogClientError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

/// Generic boxed error type used across this crate's [`LogClient`] implementations.
///
/// The dynamic boxing makes it easy for the block-builder to match on [`LogClientErrorKind`]
/// without caring which concrete log transport produced the error.
#[derive(Debug)]
pub struct LogClientError {
    inner: Box<dyn std::error::Error + Sync + Send>,
    kind: LogClientErrorKind,
}

impl LogClientError {
    /// Construct a new error of the given `kind`, wrapping `e`.
    pub fn new(kind: LogClientErrorKind, e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self { inner: e.into(), kind }
    }

    /// A transient I/O failure talking to the log.
    pub fn io(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(LogClientErrorKind::Io, e)
    }

    /// The poll deadline elapsed with no data available.
    pub fn deadline_exceeded() -> Self {
        Self::new(LogClientErrorKind::DeadlineExceeded, "poll deadline exceeded")
    }

    /// A commit was rejected because a consumer-group rebalance is in progress.
    pub fn rebalance_in_progress(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(LogClientErrorKind::RebalanceInProgress, e)
    }

    /// The consumer group has no recorded state at all.
    pub fn group_not_found(e: impl Into<Box<dyn std::error::Error + Sync + Send>>) -> Self {
        Self::new(LogClientErrorKind::GroupNotFound, e)
    }

    /// Returns the kind of error this was.
    pub fn kind(&self) -> LogClientErrorKind {
        self.kind
    }

    /// Returns the inner error.
    pub fn inner(&self) -> &dyn std::error::Error {
        self.inner.as_ref()
    }

    /// True if a fresh poll should be retried later without treating this as fatal.
    pub fn is_deadline_exceeded(&self) -> bool {
        self.kind == LogClientErrorKind::DeadlineExceeded
    }
}

impl Display for LogClientError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "LogClientError({:?}): {}", self.kind, self.inner)
    }
}

impl std::error::Error for LogClientError {}

/// The kind of failure a [`LogClientError`] represents, for callers that need to
/// branch on cause without downcasting the inner error.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogClientErrorKind {
    /// Unclassified failure.
    Unknown,
    /// Transient I/O failure; safe to retry.
    Io,
    /// The poll timeout elapsed before any data arrived.
    DeadlineExceeded,
    /// A commit was rejected due to an in-progress consumer-group rebalance.
    RebalanceInProgress,
    /// The requested consumer group has no recorded offsets.
    GroupNotFound,
}

/// The log client interface the block-builder's partition consumer depends on.
///
/// Implementations are expected to serve exactly one logical partition assignment at a
/// time per the block-builder's own discipline (see `block_builder::partition_consumer`);
/// this trait does not itself enforce that, it just exposes the primitives.
#[async_trait]
pub trait LogClient: Debug + Send + Sync + 'static {
    /// Check that the log is reachable.
    async fn ping(&self) -> Result<(), LogClientError>;

    /// Begin consuming the given partitions of `topic`, starting at the given offsets.
    async fn add_consume_partitions(
        &self,
        topic: &str,
        partitions: BTreeMap<PartitionId, Offset>,
    ) -> Result<(), LogClientError>;

    /// Stop consuming the given partitions of `topic`.
    async fn remove_consume_partitions(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> Result<(), LogClientError>;

    /// Poll for the next batch of records across all currently-registered partitions,
    /// waiting at most `timeout` for data to arrive.
    async fn poll_fetches(&self, timeout: Duration) -> Fetches;

    /// Fetch the committed offsets for `group` on `topic`.
    ///
    /// Partitions absent from the returned map have no committed offset.
    async fn fetch_offsets_for_topics(
        &self,
        group: &str,
        topic: &str,
    ) -> Result<BTreeMap<PartitionId, Offset>, LogClientError>;

    /// Commit offsets for `group` on `topic`. Each value is the next offset to consume
    /// (i.e. one past the last record processed).
    async fn commit_offsets(
        &self,
        group: &str,
        topic: &str,
        offsets: BTreeMap<PartitionId, Offset>,
    ) -> Result<(), LogClientError>;

    /// List the earliest available offset per partition of `topic`.
    async fn list_start_offsets(&self, topic: &str) -> Result<BTreeMap<PartitionId, Offset>, LogClientError>;

    /// List the next-to-be-written offset per partition of `topic`.
    async fn list_end_offsets(&self, topic: &str) -> Result<BTreeMap<PartitionId, Offset>, LogClientError>;

    /// Fetch the current end offsets for the given partitions of `topic` only.
    async fn fetch_offsets(
        &self,
        topic: &str,
        partitions: &[PartitionId],
    ) -> Result<BTreeMap<PartitionId, Offset>, LogClientError>;

    /// Close the underlying connection. Called once, at service stop.
    async fn close(&self) -> Result<(), LogClientError>;
}
