//! Bounded single-producer / multi-consumer row ring.
//!
//! The producer fills slots in place ([`Pipeline::begin_put`]) and publishes
//! them with [`PutSlot::end_put`]. Consumers drain with [`Pipeline::get`],
//! which blocks while the ring is empty and returns `None` once it is empty
//! and the producer has called [`Pipeline::set_producing_done`].
//!
//! A ring of capacity `c` holds at most `c - 1` rows: `write + 1 == read`
//! means full, `write == read` means empty.

use parking_lot::{Condvar, Mutex};

use crate::data::Row;

struct Ring {
    slots: Vec<Row>,
    read: usize,
    write: usize,
    producing: bool,
    slot_out: bool,
    total_put: u64,
    total_get: u64,
}

impl Ring {
    #[inline]
    fn next(&self, i: usize) -> usize {
        (i + 1) % self.slots.len()
    }

    #[inline]
    fn is_full(&self) -> bool {
        self.next(self.write) == self.read
    }

    #[inline]
    fn is_empty(&self) -> bool {
        self.read == self.write
    }
}

/// Bounded row queue between one producer thread and many consumers.
pub struct Pipeline {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
}

impl Pipeline {
    /// Create a ring with `capacity` slots (`capacity - 1` usable).
    ///
    /// # Panics
    ///
    /// Panics if `capacity < 2`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 2, "pipeline capacity must be at least 2, got {capacity}");
        Self {
            ring: Mutex::new(Ring {
                slots: vec![Row::default(); capacity],
                read: 0,
                write: 0,
                producing: true,
                slot_out: false,
                total_put: 0,
                total_get: 0,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
        }
    }

    /// Wait for a free slot and hand it to the producer.
    ///
    /// The slot keeps the buffers of the row it last held, so the producer
    /// can overwrite it without reallocating.
    ///
    /// # Panics
    ///
    /// Panics if a previous slot has not been returned yet.
    pub fn begin_put(&self) -> PutSlot<'_> {
        let mut ring = self.ring.lock();
        assert!(!ring.slot_out, "begin_put called twice without end_put");
        while ring.is_full() {
            self.not_full.wait(&mut ring);
        }
        let write = ring.write;
        let row = std::mem::take(&mut ring.slots[write]);
        ring.slot_out = true;
        PutSlot {
            pipeline: self,
            row: Some(row),
        }
    }

    fn finish_put(&self, row: Row, success: bool) {
        let mut ring = self.ring.lock();
        let write = ring.write;
        ring.slots[write] = row;
        ring.slot_out = false;
        if success {
            ring.write = ring.next(write);
            ring.total_put += 1;
            drop(ring);
            self.not_empty.notify_one();
        }
    }

    /// Signal that no more rows will be published.
    pub fn set_producing_done(&self) {
        self.ring.lock().producing = false;
        self.not_empty.notify_all();
    }

    /// Take the next published row together with its `order_id`.
    pub fn get(&self) -> Option<(Row, u64)> {
        let mut row = Row::default();
        self.get_into(&mut row).map(|order_id| (row, order_id))
    }

    /// Swap the next published row into `out` and return its `order_id`.
    ///
    /// The ring keeps `out`'s previous buffers for reuse by the producer.
    /// Returns `None` when the ring is empty and producing is done.
    pub fn get_into(&self, out: &mut Row) -> Option<u64> {
        let mut ring = self.ring.lock();
        loop {
            if !ring.is_empty() {
                break;
            }
            if !ring.producing {
                return None;
            }
            self.not_empty.wait(&mut ring);
        }
        let read = ring.read;
        std::mem::swap(out, &mut ring.slots[read]);
        ring.read = ring.next(read);
        let order_id = ring.total_get;
        ring.total_get += 1;
        drop(ring);
        self.not_full.notify_one();
        Some(order_id)
    }

    /// Rows published so far.
    pub fn num_put(&self) -> u64 {
        self.ring.lock().total_put
    }

    /// Rows handed to consumers so far.
    pub fn num_get(&self) -> u64 {
        self.ring.lock().total_get
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

/// A ring slot lent to the producer.
///
/// Dropping the slot without [`end_put`](PutSlot::end_put) is the same as
/// `end_put(false)`.
pub struct PutSlot<'a> {
    pipeline: &'a Pipeline,
    row: Option<Row>,
}

impl PutSlot<'_> {
    /// Row to fill in place.
    pub fn row(&mut self) -> &mut Row {
        self.row.get_or_insert_with(Row::default)
    }

    /// Return the slot; publish its row when `success`.
    pub fn end_put(mut self, success: bool) {
        if let Some(row) = self.row.take() {
            self.pipeline.finish_put(row, success);
        }
    }
}

impl Drop for PutSlot<'_> {
    fn drop(&mut self) {
        if let Some(row) = self.row.take() {
            self.pipeline.finish_put(row, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn produce(pipeline: &Pipeline, n: usize) {
        for i in 0..n {
            let mut slot = pipeline.begin_put();
            let row = slot.row();
            row.clear();
            row.label = i as f32;
            slot.end_put(true);
        }
        // Exhausted producer: the last slot is returned unpublished.
        pipeline.begin_put().end_put(false);
        pipeline.set_producing_done();
    }

    #[test]
    fn test_single_consumer_preserves_order() {
        let pipeline = Pipeline::new(4);
        let received = thread::scope(|s| {
            s.spawn(|| produce(&pipeline, 100));
            let mut received = Vec::new();
            while let Some((row, order_id)) = pipeline.get() {
                received.push((row.label as usize, order_id));
            }
            received
        });

        let expected: Vec<_> = (0..100).map(|i| (i, i as u64)).collect();
        assert_eq!(received, expected);
        assert_eq!(pipeline.num_put(), 100);
        assert_eq!(pipeline.num_get(), 100);

        // Closed for good.
        assert!(pipeline.get().is_none());
        assert!(pipeline.get().is_none());
    }

    #[test]
    fn test_many_consumers_see_every_row_once() {
        let pipeline = Pipeline::new(8);
        let n = 1000;
        let mut results: Vec<(u64, usize)> = thread::scope(|s| {
            s.spawn(|| produce(&pipeline, n));
            let consumers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let mut local = Vec::new();
                        let mut row = Row::default();
                        while let Some(order_id) = pipeline.get_into(&mut row) {
                            local.push((order_id, row.label as usize));
                        }
                        local
                    })
                })
                .collect();
            consumers.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        results.sort_unstable();
        let order_ids: Vec<u64> = results.iter().map(|r| r.0).collect();
        assert_eq!(order_ids, (0..n as u64).collect::<Vec<_>>());
        // A single producer publishes in order, so order_id equals row position.
        assert!(results.iter().all(|&(id, label)| id as usize == label));
    }

    #[test]
    fn test_capacity_reserves_one_slot() {
        let pipeline = Pipeline::new(3);
        for _ in 0..2 {
            pipeline.begin_put().end_put(true);
        }
        // The ring now holds capacity - 1 rows; one get frees a slot.
        assert_eq!(pipeline.num_put(), 2);
        assert!(pipeline.get().is_some());
        pipeline.begin_put().end_put(true);
        assert_eq!(pipeline.num_put(), 3);
    }

    #[test]
    fn test_dropped_slot_publishes_nothing() {
        let pipeline = Pipeline::new(2);
        {
            let mut slot = pipeline.begin_put();
            slot.row().label = 7.0;
        }
        pipeline.set_producing_done();
        assert_eq!(pipeline.num_put(), 0);
        assert!(pipeline.get().is_none());
    }

    #[test]
    #[should_panic(expected = "capacity must be at least 2")]
    fn test_rejects_capacity_one() {
        let _ = Pipeline::new(1);
    }
}
