//! Fixed-capacity arena holding in-flight items.
//!
//! Queues move small integer indices between stages; the items themselves
//! stay here. `add` waits for a free slot, which caps the number of items in
//! flight across the whole conveyor.
//!
//! ## Locking
//!
//! - `slots`: RwLock, many readers (workers, priority lookups), one writer
//! - `free`: bounded free list of recycled indices
//! - `available`: semaphore counting entries of `free`

use crate::item::Item;
use conveyor_shared::{ConveyorError, ConveyorResult};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Read-only priority lookup by workbench index.
///
/// Lets the priority queue order indices without touching items.
pub trait PriorityLookup: Send + Sync {
    /// Priority of the item at `index`, or 0 when the index is invalid or
    /// the slot is empty.
    fn priority(&self, index: usize) -> i64;
}

pub struct WorkBench<T> {
    slots: RwLock<Slots<T>>,
    free: Mutex<Vec<usize>>,
    available: Semaphore,
    capacity: usize,
}

struct Slots<T> {
    data: Vec<Option<Arc<Item<T>>>>,
    active: usize,
}

impl<T> std::fmt::Debug for WorkBench<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkBench")
            .field("capacity", &self.capacity)
            .field("count", &self.count())
            .finish()
    }
}

impl<T> WorkBench<T> {
    /// Create a workbench with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        // Lowest indices are handed out first.
        let free: Vec<usize> = (0..capacity).rev().collect();

        Self {
            slots: RwLock::new(Slots {
                data: (0..capacity).map(|_| None).collect(),
                active: 0,
            }),
            free: Mutex::new(free),
            available: Semaphore::new(capacity),
            capacity,
        }
    }

    /// Park an item and return its index.
    ///
    /// Waits until a slot is free.
    pub async fn add(&self, item: Arc<Item<T>>) -> ConveyorResult<usize> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| ConveyorError::Internal("workbench is closed".into()))?;
        // The permit is given back by `clean`.
        permit.forget();

        let index = self
            .free
            .lock()
            .pop()
            .ok_or_else(|| ConveyorError::Internal("workbench free list is empty".into()))?;

        let mut slots = self.slots.write();
        if slots.data[index].is_none() {
            slots.active += 1;
        }
        slots.data[index] = Some(item);

        tracing::trace!(index, active = slots.active, "Item parked on workbench");
        Ok(index)
    }

    /// Item at `index`.
    ///
    /// `Err(OutOfRange)` for an invalid index, `Ok(None)` for an empty slot.
    pub fn get(&self, index: usize) -> ConveyorResult<Option<Arc<Item<T>>>> {
        self.check_range(index)?;
        Ok(self.slots.read().data[index].clone())
    }

    /// Empty the slot and recycle its index.
    ///
    /// Cleaning an already empty slot is a no-op, so an index is recycled
    /// exactly once. Returns the item that was removed.
    pub fn clean(&self, index: usize) -> Option<Arc<Item<T>>> {
        if index >= self.capacity {
            return None;
        }

        let item = {
            let mut slots = self.slots.write();
            let item = slots.data[index].take()?;
            slots.active -= 1;
            item
        };

        self.free.lock().push(index);
        self.available.add_permits(1);

        tracing::trace!(index, item_id = item.id(), "Workbench slot cleaned");
        Some(item)
    }

    /// Number of occupied slots.
    pub fn count(&self) -> usize {
        self.slots.read().active
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn check_range(&self, index: usize) -> ConveyorResult<()> {
        if index >= self.capacity {
            return Err(ConveyorError::OutOfRange {
                index,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl<T: Send + Sync> PriorityLookup for WorkBench<T> {
    fn priority(&self, index: usize) -> i64 {
        if index >= self.capacity {
            return 0;
        }
        self.slots.read().data[index]
            .as_ref()
            .map(|item| item.priority())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn item(id: u64, priority: i64) -> Arc<Item<u64>> {
        let item = Item::new(id, id);
        item.set_priority(priority);
        Arc::new(item)
    }

    #[tokio::test]
    async fn test_add_get_clean() {
        let wb = WorkBench::new(3);
        let index = wb.add(item(1, 5)).await.unwrap();

        let got = wb.get(index).unwrap().unwrap();
        assert_eq!(got.id(), 1);
        assert_eq!(wb.priority(index), 5);
        assert_eq!(wb.count(), 1);

        let removed = wb.clean(index).unwrap();
        assert_eq!(removed.id(), 1);
        assert!(wb.get(index).unwrap().is_none());
        assert_eq!(wb.priority(index), 0);
        assert_eq!(wb.count(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let wb: WorkBench<u64> = WorkBench::new(2);
        let err = wb.get(2).unwrap_err();
        assert_eq!(
            err,
            ConveyorError::OutOfRange {
                index: 2,
                capacity: 2
            }
        );
        assert_eq!(wb.priority(100), 0);
        assert!(wb.clean(100).is_none());
    }

    #[tokio::test]
    async fn test_clean_is_idempotent() {
        let wb = WorkBench::new(2);
        let index = wb.add(item(1, 0)).await.unwrap();
        assert!(wb.clean(index).is_some());
        assert!(wb.clean(index).is_none());

        // Only one permit was returned: two adds fit, the third waits.
        wb.add(item(2, 0)).await.unwrap();
        wb.add(item(3, 0)).await.unwrap();
        let third = tokio::time::timeout(Duration::from_millis(50), wb.add(item(4, 0))).await;
        assert!(third.is_err());
        assert_eq!(wb.count(), 2);
    }

    #[tokio::test]
    async fn test_count_tracks_unmatched_adds() {
        let wb = WorkBench::new(10);
        let mut indices = Vec::new();
        for id in 0..10 {
            indices.push(wb.add(item(id, 0)).await.unwrap());
            assert_eq!(wb.count(), indices.len());
        }

        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 10);

        for (n, index) in indices.iter().enumerate() {
            wb.clean(*index);
            assert_eq!(wb.count(), 10 - n - 1);
        }
    }

    #[tokio::test]
    async fn test_add_blocks_until_clean() {
        let wb = Arc::new(WorkBench::new(1));
        let first = wb.add(item(1, 0)).await.unwrap();

        let waiter = {
            let wb = Arc::clone(&wb);
            tokio::spawn(async move { wb.add(item(2, 0)).await })
        };

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!waiter.is_finished());

        wb.clean(first);
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second, first);
        assert_eq!(wb.get(second).unwrap().unwrap().id(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_reuse() {
        let wb = Arc::new(WorkBench::new(4));
        let mut handles = Vec::new();
        for task in 0..8u64 {
            let wb = Arc::clone(&wb);
            handles.push(tokio::spawn(async move {
                for n in 0..50u64 {
                    let id = task * 1000 + n;
                    let index = wb.add(item(id, 0)).await.unwrap();
                    assert_eq!(wb.get(index).unwrap().unwrap().id(), id);
                    assert!(wb.count() <= wb.capacity());
                    wb.clean(index);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(wb.count(), 0);
    }
}
