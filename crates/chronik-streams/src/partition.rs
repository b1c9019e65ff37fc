use std::fs::File;

use chronik_store::{ContainerCodec, EventPartition, StoreError, StoreResult};
use chronik_types::{AttributeContainer, ContainerIdentifier, ContainerType, Event};

use crate::format::{read_entry_at, Segment};

/// One flushed event stream viewed as a sorted partition for the k-way
/// merge.
///
/// The timestamp table is in on-disk (sorted) order, so peeking and range
/// seeks never touch payloads. Payloads are read lazily through the offset
/// table; `order` maps a physical position back to the entry index that is
/// the event's identifier (the offset table is indexed by entry, and entry
/// order is insertion order, which may differ from sorted order within one
/// stream).
pub struct StreamPartition {
    stream: u32,
    codec: ContainerCodec,
    file: File,
    data_segment: Segment,
    offsets: Vec<u32>,
    order: Vec<u32>,
    timestamps: Vec<i64>,
    cursor: usize,
}

impl StreamPartition {
    pub fn new(
        stream: u32,
        codec: ContainerCodec,
        file: File,
        data_segment: Segment,
        offsets: Vec<u32>,
        timestamps: Vec<i64>,
    ) -> StoreResult<Self> {
        if offsets.len() != timestamps.len() {
            return Err(StoreError::Corrupt(format!(
                "stream {stream}: offset table has {} entries, timestamp table {}",
                offsets.len(),
                timestamps.len()
            )));
        }
        // Physical position k holds the entry whose offset is the k-th
        // smallest; argsorting the offset table recovers that mapping.
        let mut order: Vec<u32> = (0..offsets.len() as u32).collect();
        order.sort_by_key(|&entry| offsets[entry as usize]);

        Ok(Self {
            stream,
            codec,
            file,
            data_segment,
            offsets,
            order,
            timestamps,
            cursor: 0,
        })
    }
}

impl EventPartition for StreamPartition {
    fn partition_number(&self) -> u32 {
        self.stream
    }

    fn peek_timestamp(&mut self) -> StoreResult<Option<i64>> {
        Ok(self.timestamps.get(self.cursor).copied())
    }

    fn next_event(&mut self) -> StoreResult<Option<Event>> {
        let Some(&entry) = self.order.get(self.cursor) else {
            return Ok(None);
        };
        let offset = self.offsets[entry as usize];
        let payload = read_entry_at(&mut self.file, self.data_segment, offset)?;

        let identifier = ContainerIdentifier::Stream {
            stream: self.stream,
            entry,
        };
        let container = self
            .codec
            .decode(ContainerType::Event, &payload)
            .map_err(|err| err.with_identifier(identifier.clone()))?;
        let AttributeContainer::Event(mut event) = container else {
            return Err(StoreError::Corrupt(format!(
                "stream {} entry {entry} is not an event",
                self.stream
            )));
        };
        event.set_identifier(identifier);

        self.cursor += 1;
        Ok(Some(event))
    }

    fn seek(&mut self, target: i64) -> StoreResult<()> {
        self.cursor = self
            .timestamps
            .partition_point(|&timestamp| timestamp < target);
        Ok(())
    }
}
