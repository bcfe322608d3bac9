//! Incremental on-disk index: event_num -> (file, byte offset of first
//! packet), plus the arrival-ordered event list.
//!
//! The index builder scans a backing file forward from a saved byte
//! offset one packet at a time. It never re-reads what it has already
//! indexed, which is what makes `Run::update_index` cheap to call after
//! every append during live capture.

use std::collections::HashMap;
use std::time::Instant;

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::backing_store::BackingStore;
use crate::packet::{HEADER_SIZE, PacketHeader};
use crate::{Error, Result};

/// `event_num -> (file index, byte offset of that event's first packet)`.
#[derive(Default, Clone, Serialize, Deserialize)]
pub struct IndexTable {
    offsets: HashMap<u32, (usize, u64)>,
    /// Insertion (arrival) order of event numbers. `Run::iter` walks this,
    /// not a numeric sort.
    arrival: Vec<u32>,
}

impl IndexTable {
    /// Look up the `(file, offset)` of an event's first packet.
    #[must_use]
    pub fn locate(&self, event_num: u32) -> Option<(usize, u64)> {
        self.offsets.get(&event_num).copied()
    }

    /// Number of indexed events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.arrival.len()
    }

    /// `true` iff no events have been indexed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.arrival.is_empty()
    }

    /// Event numbers in arrival (index-insertion) order.
    #[must_use]
    pub fn arrival_order(&self) -> &[u32] {
        &self.arrival
    }

    /// Record a new event start. Returns whether an entry was actually
    /// inserted, so callers can count genuinely new events.
    ///
    /// Tie-breaking policy (spec.md §4.3): if `event_num` was already
    /// indexed from a *different* file, the earlier file wins and this is
    /// a silent no-op, not a collision — multiple capture ports can see
    /// overlapping traffic for the same board. A collision against the
    /// *same* file is a genuine anomaly (e.g. a truncated-and-reappended
    /// backing file) and is fatal.
    fn record(&mut self, event_num: u32, file: usize, offset: u64) -> Result<bool> {
        if let Some(&(owner, _)) = self.offsets.get(&event_num) {
            if owner == file {
                return Err(Error::EventCollision(event_num));
            }
            return Ok(false); // earlier file already owns this event_num
        }
        self.offsets.insert(event_num, (file, offset));
        self.arrival.push(event_num);
        Ok(true)
    }
}

/// Result of one `update_index` call.
#[derive(Debug, Clone, Copy)]
pub struct IndexUpdate {
    /// Number of newly indexed events across all files.
    pub new_events: usize,
    /// Wall-clock time the scan took.
    pub elapsed_seconds: f64,
}

/// Scan every backing file forward from its saved cursor, recording new
/// event starts into `index`. Establishes/validates `board_id` along the
/// way: the first packet ever seen fixes it, every later packet must
/// match it exactly or this returns `Error::HeterogeneousBoard`.
///
/// Idempotent when no file has grown: a second call with nothing new to
/// read returns `new_events == 0` and never re-records an event.
pub fn update_index(
    store: &mut BackingStore,
    index: &mut IndexTable,
    board_id: &mut Option<[u8; 6]>,
) -> Result<IndexUpdate> {
    let start = Instant::now();
    let mut new_events = 0;

    for file_idx in 0..store.len() {
        let end = store.get(file_idx).sync_and_seek_end()?;
        let mut cursor = store.get(file_idx).indexed_up_to;
        trace!(
            "indexing {} from byte {} to {}",
            store.get(file_idx).path.display(),
            cursor,
            end
        );

        let mut prev_event_num: Option<u32> = None;
        loop {
            // Enough bytes left for a header to even be possible?
            if cursor + HEADER_SIZE as u64 > end {
                break;
            }
            let header_bytes = store.get(file_idx).read_at(cursor, HEADER_SIZE)?;
            let Some((header, _)) = PacketHeader::decode(&header_bytes) else {
                break; // short read: torn tail, stop here and retry later
            };

            match board_id {
                None => *board_id = Some(header.board_id),
                Some(expected) if *expected != header.board_id => {
                    return Err(Error::HeterogeneousBoard {
                        expected: *expected,
                        found: header.board_id,
                    });
                }
                Some(_) => {}
            }

            let opens_new_event =
                prev_event_num.is_none() || Some(header.event_num) > prev_event_num;
            if opens_new_event {
                if index.record(header.event_num, file_idx, cursor)? {
                    new_events += 1;
                }
                prev_event_num = Some(header.event_num);
            }

            let next = cursor + header.wire_len() as u64;
            if next > end {
                // Header arrived but its payload hasn't fully landed yet.
                break;
            }
            cursor = next;
        }
        store.get_mut(file_idx).indexed_up_to = cursor;
    }

    let elapsed_seconds = start.elapsed().as_secs_f64();
    debug!("update_index: {new_events} new events in {elapsed_seconds:.3}s");
    Ok(IndexUpdate {
        new_events,
        elapsed_seconds,
    })
}
