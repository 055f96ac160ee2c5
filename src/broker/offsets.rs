use std::collections::{BTreeMap, BTreeSet};

/// Per-partition bookkeeping of received and acknowledged offsets.
///
/// Workers finish out of order, but a consumer group only remembers one
/// position per partition: everything below it is considered handled. The
/// tracker therefore only ever yields the lowest offset still in flight (or
/// one past the highest acknowledged offset when nothing is in flight), so
/// the stored position never passes a delivery that has not been
/// acknowledged. A delivery that is never acknowledged holds its partition
/// back until the group is rebalanced or restarted, at which point it is
/// redelivered together with everything after it.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: BTreeMap<i32, PartitionOffsets>,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    /// Lowest offset received; the group already starts at or before it.
    start: Option<i64>,
    in_flight: BTreeSet<i64>,
    highest_acked: Option<i64>,
    stored: Option<i64>,
}

impl PartitionOffsets {
    fn position(&self) -> Option<i64> {
        match self.in_flight.first() {
            Some(&lowest) => Some(lowest),
            None => self.highest_acked.map(|offset| offset + 1),
        }
    }
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivery handed to the pipeline.
    pub fn received(&mut self, partition: i32, offset: i64) {
        let state = self.partitions.entry(partition).or_default();
        state.start = Some(state.start.map_or(offset, |start| start.min(offset)));
        state.in_flight.insert(offset);
    }

    /// Record an acknowledgement.
    ///
    /// Returns the position to store for `partition` when it moved forward,
    /// `None` when an earlier delivery is still outstanding or the offset
    /// was never received.
    pub fn acknowledged(&mut self, partition: i32, offset: i64) -> Option<i64> {
        let state = self.partitions.get_mut(&partition)?;
        if !state.in_flight.remove(&offset) {
            return None;
        }
        state.highest_acked = state.highest_acked.max(Some(offset));

        let position = state.position()?;
        let floor = state.stored.or(state.start);
        if floor.is_some_and(|floor| position <= floor) {
            return None;
        }
        state.stored = Some(position);
        Some(position)
    }

    /// Positions stored so far, by partition.
    pub fn stored_positions(&self) -> Vec<(i32, i64)> {
        self.partitions
            .iter()
            .filter_map(|(&partition, state)| state.stored.map(|pos| (partition, pos)))
            .collect()
    }

    /// Deliveries received but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.partitions.values().map(|s| s.in_flight.len()).sum()
    }
}
