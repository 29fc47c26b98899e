//! Filters statically-configured partitions against the live partition ring.

use crate::ring::{PartitionRing, State};
use partition_log::PartitionId;

/// Resolve `configured` against `ring`, keeping only partitions the ring reports as
/// [`State::Active`] and whose id does not exceed the ring's active partition count.
///
/// This prevents a stale static config from producing writes for partitions that no
/// longer exist in the ring.
pub fn resolve_assigned_partitions(configured: &[PartitionId], ring: &PartitionRing) -> Vec<PartitionId> {
    configured
        .iter()
        .copied()
        .filter(|&partition| {
            partition >= 0
                && (partition as u32) < ring.active_partitions_count()
                && ring.state(partition) == Some(State::Active)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn drops_inactive_and_out_of_range_partitions() {
        let ring = PartitionRing::new(
            2,
            BTreeMap::from([(0, State::Active), (1, State::Inactive), (2, State::Active)]),
        );

        let resolved = resolve_assigned_partitions(&[0, 1, 2, 3], &ring);
        assert_eq!(resolved, vec![0]);
    }

    #[test]
    fn keeps_all_active_partitions_in_range() {
        let ring = PartitionRing::new(3, BTreeMap::from([(0, State::Active), (1, State::Active), (2, State::Active)]));

        let resolved = resolve_assigned_partitions(&[0, 1, 2], &ring);
        assert_eq!(resolved, vec![0, 1, 2]);
    }

    #[test]
    fn unknown_partition_is_dropped() {
        let ring = PartitionRing::new(5, BTreeMap::new());
        let resolved = resolve_assigned_partitions(&[0, 1], &ring);
        assert!(resolved.is_empty());
    }
}
