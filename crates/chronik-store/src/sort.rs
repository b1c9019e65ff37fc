use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use chronik_types::{Event, TimeRange};

use crate::error::StoreResult;

/// One already-sorted source of events for the k-way merge: a flushed
/// stream, a table scan, or an in-memory buffer.
///
/// Implementations must yield events in non-decreasing timestamp order and
/// preserve their source's insertion order for equal timestamps.
pub trait EventPartition {
    /// Number used to break ties between partitions deterministically.
    fn partition_number(&self) -> u32;

    /// Timestamp of the next unread event, without consuming it.
    fn peek_timestamp(&mut self) -> StoreResult<Option<i64>>;

    /// Read and consume the next event.
    fn next_event(&mut self) -> StoreResult<Option<Event>>;

    /// Position the cursor at the first event with `timestamp >= target`,
    /// skipping earlier entries without deserializing them where the
    /// backing format allows it.
    fn seek(&mut self, target: i64) -> StoreResult<()>;
}

struct MergeEntry {
    timestamp: i64,
    partition_number: u32,
    arrival: u64,
    partition_index: usize,
    event: Event,
}

impl MergeEntry {
    fn key(&self) -> (i64, u32, u64) {
        (self.timestamp, self.partition_number, self.arrival)
    }
}

impl PartialEq for MergeEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for MergeEntry {}

impl PartialOrd for MergeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MergeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// K-way merge producing one globally time-ordered event sequence.
///
/// Tie-break is deterministic: events sharing a timestamp keep their
/// insertion order within one partition, and order across partitions by
/// partition number. This holds because after popping the global minimum
/// the merge keeps draining the same partition while its next timestamp
/// matches the popped one, re-heapifies, and only then resumes global
/// popping.
pub struct SortedEventMerge<'a> {
    partitions: Vec<Box<dyn EventPartition + 'a>>,
    heap: BinaryHeap<Reverse<MergeEntry>>,
    range: Option<TimeRange>,
    arrival: u64,
}

impl<'a> SortedEventMerge<'a> {
    pub fn new(
        partitions: Vec<Box<dyn EventPartition + 'a>>,
        range: Option<TimeRange>,
    ) -> StoreResult<Self> {
        let mut merge = Self {
            partitions,
            heap: BinaryHeap::new(),
            range,
            arrival: 0,
        };
        for index in 0..merge.partitions.len() {
            if let Some(range) = merge.range {
                merge.partitions[index].seek(range.start)?;
            }
            merge.push_next(index)?;
        }
        Ok(merge)
    }

    /// Pull the partition's next event into the heap if it falls inside the
    /// range. Returns the pushed timestamp, or `None` if the partition is
    /// exhausted (or past the range end, which is the same thing here).
    fn push_next(&mut self, index: usize) -> StoreResult<Option<i64>> {
        let partition = &mut self.partitions[index];
        let Some(timestamp) = partition.peek_timestamp()? else {
            return Ok(None);
        };
        if let Some(range) = self.range {
            if timestamp > range.end {
                return Ok(None);
            }
        }
        let Some(event) = partition.next_event()? else {
            return Ok(None);
        };
        let partition_number = partition.partition_number();
        self.arrival += 1;
        self.heap.push(Reverse(MergeEntry {
            timestamp,
            partition_number,
            arrival: self.arrival,
            partition_index: index,
            event,
        }));
        Ok(Some(timestamp))
    }
}

impl Iterator for SortedEventMerge<'_> {
    type Item = StoreResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let Reverse(entry) = self.heap.pop()?;

        // Refill from the partition that produced the minimum: drain its
        // run of equal timestamps, then pull one successor and resume
        // global popping.
        loop {
            match self.push_next(entry.partition_index) {
                Err(err) => return Some(Err(err)),
                Ok(None) => break,
                Ok(Some(timestamp)) => {
                    if timestamp != entry.timestamp {
                        break;
                    }
                }
            }
        }

        Some(Ok(entry.event))
    }
}

/// Pre-sorted in-memory partition. Used by backends whose flushed data is
/// already materialized, and by tests.
pub struct VecPartition {
    number: u32,
    events: Vec<Event>,
    cursor: usize,
}

impl VecPartition {
    /// `events` must already be in non-decreasing timestamp order.
    pub fn new(number: u32, events: Vec<Event>) -> Self {
        debug_assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Self {
            number,
            events,
            cursor: 0,
        }
    }
}

impl EventPartition for VecPartition {
    fn partition_number(&self) -> u32 {
        self.number
    }

    fn peek_timestamp(&mut self) -> StoreResult<Option<i64>> {
        Ok(self.events.get(self.cursor).map(|event| event.timestamp))
    }

    fn next_event(&mut self) -> StoreResult<Option<Event>> {
        let event = self.events.get(self.cursor).cloned();
        if event.is_some() {
            self.cursor += 1;
        }
        Ok(event)
    }

    fn seek(&mut self, target: i64) -> StoreResult<()> {
        self.cursor = self.events.partition_point(|event| event.timestamp < target);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(timestamp: i64, desc: &str) -> Event {
        Event::new(timestamp, desc)
    }

    fn merge_all(
        partitions: Vec<Box<dyn EventPartition + 'static>>,
        range: Option<TimeRange>,
    ) -> Vec<Event> {
        SortedEventMerge::new(partitions, range)
            .unwrap()
            .collect::<StoreResult<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn merges_two_partitions_ascending() {
        let a = VecPartition::new(0, vec![event(1, "a1"), event(5, "a5")]);
        let b = VecPartition::new(1, vec![event(3, "b3"), event(5, "b5")]);
        let merged = merge_all(vec![Box::new(a), Box::new(b)], None);

        let timestamps: Vec<i64> = merged.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![1, 3, 5, 5]);
        // Tie at 5: partition 0 emits before partition 1.
        assert_eq!(merged[2].timestamp_desc, "a5");
        assert_eq!(merged[3].timestamp_desc, "b5");
    }

    #[test]
    fn equal_timestamps_keep_insertion_order_within_partition() {
        let a = VecPartition::new(
            0,
            vec![event(5, "first"), event(5, "second"), event(5, "third")],
        );
        let b = VecPartition::new(1, vec![event(5, "other")]);
        let merged = merge_all(vec![Box::new(a), Box::new(b)], None);

        let descs: Vec<&str> = merged.iter().map(|e| e.timestamp_desc.as_str()).collect();
        assert_eq!(descs, vec!["first", "second", "third", "other"]);
    }

    #[test]
    fn run_extension_beats_interleaved_arrival() {
        // Partition 1's tied event must not slip between partition 0's run
        // even though it entered the heap earlier.
        let a = VecPartition::new(0, vec![event(2, "a"), event(2, "b")]);
        let b = VecPartition::new(1, vec![event(2, "c"), event(9, "d")]);
        let merged = merge_all(vec![Box::new(a), Box::new(b)], None);

        let descs: Vec<&str> = merged.iter().map(|e| e.timestamp_desc.as_str()).collect();
        assert_eq!(descs, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn range_prunes_both_ends() {
        let a = VecPartition::new(0, vec![event(1, "a"), event(4, "b"), event(8, "c")]);
        let b = VecPartition::new(1, vec![event(3, "d"), event(10, "e")]);
        let range = TimeRange::new(3, 8).unwrap();
        let merged = merge_all(vec![Box::new(a), Box::new(b)], Some(range));

        let timestamps: Vec<i64> = merged.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![3, 4, 8]);
    }

    #[test]
    fn empty_partitions_are_skipped() {
        let a = VecPartition::new(0, vec![]);
        let b = VecPartition::new(1, vec![event(2, "only")]);
        let merged = merge_all(vec![Box::new(a), Box::new(b)], None);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn no_partitions_yields_nothing() {
        let merged = merge_all(vec![], None);
        assert!(merged.is_empty());
    }

    #[test]
    fn vec_partition_seek_uses_binary_search() {
        let mut partition = VecPartition::new(0, vec![event(1, "a"), event(3, "b"), event(5, "c")]);
        partition.seek(3).unwrap();
        assert_eq!(partition.peek_timestamp().unwrap(), Some(3));
        partition.seek(4).unwrap();
        assert_eq!(partition.peek_timestamp().unwrap(), Some(5));
        partition.seek(6).unwrap();
        assert_eq!(partition.peek_timestamp().unwrap(), None);
    }
}
