//! The partition ring: the live source of truth for which partitions are active.
//!
//! The ring itself is an external collaborator (a distributed hash ring shared with the
//! rest of the ingestion fleet); this module only defines the read-only view the
//! [`crate::assignment`] resolver needs.

use partition_log::PartitionId;
use std::fmt::Debug;

/// The state of one partition as seen by the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// The partition is actively owned and should be consumed.
    Active,
    /// The partition exists but is not currently owned (e.g. mid-handoff).
    Inactive,
}

/// A read-only snapshot of the partition ring.
#[derive(Debug, Clone)]
pub struct PartitionRing {
    active_partitions_count: u32,
    states: std::collections::BTreeMap<PartitionId, State>,
}

impl PartitionRing {
    /// Build a ring snapshot from an explicit state map.
    pub fn new(active_partitions_count: u32, states: std::collections::BTreeMap<PartitionId, State>) -> Self {
        Self {
            active_partitions_count,
            states,
        }
    }

    /// The number of partitions the ring currently considers active.
    pub fn active_partitions_count(&self) -> u32 {
        self.active_partitions_count
    }

    /// The state of `partition`, if the ring has an opinion on it.
    pub fn state(&self, partition: PartitionId) -> Option<State> {
        self.states.get(&partition).copied()
    }
}

/// Reads the current partition ring state.
pub trait PartitionRingReader: Debug + Send + Sync + 'static {
    /// Take a snapshot of the current partition ring.
    fn partition_ring(&self) -> PartitionRing;
}

/// A [`PartitionRingReader`] returning a fixed ring, for tests and simple deployments
/// with a static partition count.
#[derive(Debug, Clone)]
pub struct StaticRingReader {
    ring: PartitionRing,
}

impl StaticRingReader {
    /// Build a reader that always reports `ring`.
    pub fn new(ring: PartitionRing) -> Self {
        Self { ring }
    }

    /// Build a reader where every partition id in `0..active_partitions_count` is
    /// [`State::Active`].
    pub fn all_active(active_partitions_count: u32) -> Self {
        let states = (0..active_partitions_count as PartitionId)
            .map(|p| (p, State::Active))
            .collect();
        Self::new(PartitionRing::new(active_partitions_count, states))
    }
}

impl PartitionRingReader for StaticRingReader {
    fn partition_ring(&self) -> PartitionRing {
        self.ring.clone()
    }
}
