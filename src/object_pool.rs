use std::{
  alloc::{self, Layout},
  ptr::NonNull,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
  align,
  block::WORD,
  error::{AllocError, AllocResult},
};

/// Free slot bookkeeping, only ever touched under the pool's lock.
#[derive(Debug)]
struct FreeSlots {
  /// Stack of free slot indices, the top is the last element.
  indices: Vec<usize>,
  /// `is_free[i]` mirrors whether `i` is on the stack.
  is_free: Vec<bool>,
}

/// Bounded, thread safe pool of fixed size slots.
///
/// ```text
///   base
///    │
///    ▼
///   ┌────────┬────────┬────────┬────────┐
///   │ slot 0 │ slot 1 │  ...   │slot N-1│    one contiguous allocation
///   └────────┴────────┴────────┴────────┘
///
///   free stack: [0, 1, ..., N-1]  ◀── top
/// ```
///
/// `allocate` pops an index and `deallocate` pushes one back, each under a
/// short critical section guarded by a single mutex. Running out of slots is
/// reported right away, callers never wait for a slot.
///
/// `deallocate` validates its argument: addresses outside the pool or off a
/// slot boundary and slots that are already free are rejected.
#[derive(Debug)]
pub struct ObjectPool {
  base: NonNull<u8>,
  layout: Layout,
  slot_size: usize,
  capacity: usize,
  slots: Mutex<FreeSlots>,
}

// The storage is owned by the pool and all shared state sits behind `slots`.
unsafe impl Send for ObjectPool {}
unsafe impl Sync for ObjectPool {}

impl ObjectPool {
  /// Reserves storage for `capacity` objects of `object_size` bytes. Slots
  /// are word aligned and every slot starts out free.
  pub fn new(
    object_size: usize,
    capacity: usize,
  ) -> AllocResult<Self> {
    if capacity == 0 {
      return Err(AllocError::InvalidConfig("pool capacity must be non-zero"));
    }
    if object_size > isize::MAX as usize / 2 {
      return Err(AllocError::InvalidConfig("object size is too large"));
    }

    let slot_size = align!(object_size.max(1));
    let layout = slot_size
      .checked_mul(capacity)
      .and_then(|size| Layout::from_size_align(size, WORD).ok())
      .ok_or(AllocError::InvalidConfig("pool storage size overflows"))?;

    let base = NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::OutOfMemory {
      requested: layout.size(),
    })?;

    debug!(slot_size, capacity, "object pool storage at {:?}", base);

    Ok(Self {
      base,
      layout,
      slot_size,
      capacity,
      slots: Mutex::new(FreeSlots {
        indices: (0..capacity).collect(),
        is_free: vec![true; capacity],
      }),
    })
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn slot_size(&self) -> usize {
    self.slot_size
  }

  /// Number of free slots right now.
  pub fn available(&self) -> usize {
    self.slots.lock().indices.len()
  }

  /// Index of the top of the free stack, `-1` when no slot is free.
  pub fn free_top(&self) -> isize {
    self.slots.lock().indices.len() as isize - 1
  }

  /// Snapshot of the free stack from bottom to top.
  pub fn free_indices(&self) -> Vec<usize> {
    self.slots.lock().indices.clone()
  }

  /// Address of slot `index`, `None` when out of range.
  pub fn slot_address(
    &self,
    index: usize,
  ) -> Option<NonNull<u8>> {
    (index < self.capacity).then(|| unsafe { self.base.add(index * self.slot_size) })
  }

  /// Slot that starts at `address`, `None` for anything else.
  pub fn slot_index(
    &self,
    address: NonNull<u8>,
  ) -> Option<usize> {
    let offset = (address.as_ptr() as usize).checked_sub(self.base.as_ptr() as usize)?;
    let index = offset / self.slot_size;

    (offset % self.slot_size == 0 && index < self.capacity).then_some(index)
  }

  /// Takes a free slot. Fails with [`AllocError::PoolExhausted`] when every
  /// slot is in use.
  pub fn allocate(&self) -> AllocResult<NonNull<u8>> {
    let index = {
      let mut slots = self.slots.lock();
      let Some(index) = slots.indices.pop() else {
        drop(slots);
        debug!(capacity = self.capacity, "object pool exhausted");
        return Err(AllocError::PoolExhausted);
      };
      slots.is_free[index] = false;
      index
    };

    Ok(unsafe { self.base.add(index * self.slot_size) })
  }

  /// Returns a slot to the pool.
  pub fn deallocate(
    &self,
    address: NonNull<u8>,
  ) -> AllocResult<()> {
    let Some(index) = self.slot_index(address) else {
      warn!(
        "rejected free of address 0x{:x} outside of the pool slots",
        address.as_ptr() as usize
      );
      return Err(AllocError::InvalidFree {
        address: address.as_ptr() as usize,
      });
    };

    let mut slots = self.slots.lock();
    if slots.is_free[index] {
      drop(slots);
      warn!(
        "rejected double free of slot {} at 0x{:x}",
        index,
        address.as_ptr() as usize
      );
      return Err(AllocError::DoubleFree {
        address: address.as_ptr() as usize,
        index,
      });
    }

    slots.is_free[index] = true;
    slots.indices.push(index);

    Ok(())
  }
}

impl Drop for ObjectPool {
  fn drop(&mut self) {
    unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) };
  }
}

#[cfg(test)]
mod tests {
  use std::{collections::HashSet, sync::Barrier, thread};

  use super::*;

  const CAPACITY: usize = 16;
  const THREADS: usize = 4;

  #[allow(dead_code)]
  struct Entity {
    health: i32,
  }

  fn entity_pool() -> ObjectPool {
    ObjectPool::new(std::mem::size_of::<Entity>(), CAPACITY).unwrap()
  }

  #[test]
  fn test_starts_full_and_hands_out_last_slot_first() {
    let pool = entity_pool();

    assert_eq!(pool.free_top(), CAPACITY as isize - 1);
    assert_eq!(pool.free_indices(), (0..CAPACITY).collect::<Vec<_>>());

    let first = pool.allocate().unwrap();
    assert_eq!(pool.slot_index(first), Some(CAPACITY - 1));
    assert_eq!(pool.slot_address(CAPACITY - 1), Some(first));
  }

  #[test]
  fn test_sequential_deallocate_is_lifo() {
    let pool = entity_pool();
    while pool.allocate().is_ok() {}
    assert_eq!(pool.free_top(), -1);

    for index in 0..CAPACITY {
      pool.deallocate(pool.slot_address(index).unwrap()).unwrap();
    }

    let top_to_bottom: Vec<usize> = pool.free_indices().into_iter().rev().collect();
    assert_eq!(top_to_bottom, (0..CAPACITY).rev().collect::<Vec<_>>());

    let next = pool.allocate().unwrap();
    assert_eq!(pool.slot_index(next), Some(CAPACITY - 1));
  }

  #[test]
  fn test_exhausted_pool_reports_error() {
    let pool = ObjectPool::new(32, 2).unwrap();
    let a = pool.allocate().unwrap();
    pool.allocate().unwrap();

    assert_eq!(pool.free_top(), -1);
    assert_eq!(pool.allocate(), Err(AllocError::PoolExhausted));

    pool.deallocate(a).unwrap();
    assert_eq!(pool.allocate(), Ok(a));
  }

  #[test]
  fn test_out_of_range_free_is_rejected() {
    let pool = entity_pool();
    let base = pool.slot_address(0).unwrap().as_ptr() as usize;
    let end = NonNull::new((base + CAPACITY * pool.slot_size()) as *mut u8).unwrap();
    let before = NonNull::new((base - pool.slot_size()) as *mut u8).unwrap();

    assert_eq!(
      pool.deallocate(end),
      Err(AllocError::InvalidFree {
        address: end.as_ptr() as usize
      })
    );
    assert_eq!(
      pool.deallocate(before),
      Err(AllocError::InvalidFree {
        address: before.as_ptr() as usize
      })
    );
    assert_eq!(pool.available(), CAPACITY);
  }

  #[test]
  fn test_misaligned_free_is_rejected() {
    let pool = ObjectPool::new(4 * WORD, 4).unwrap();
    let slot = pool.allocate().unwrap();
    let inside = unsafe { slot.add(WORD) };

    assert!(matches!(pool.deallocate(inside), Err(AllocError::InvalidFree { .. })));
    assert_eq!(pool.available(), 3);
  }

  #[test]
  fn test_double_free_is_rejected() {
    let pool = entity_pool();
    let slot = pool.allocate().unwrap();

    pool.deallocate(slot).unwrap();
    assert_eq!(
      pool.deallocate(slot),
      Err(AllocError::DoubleFree {
        address: slot.as_ptr() as usize,
        index: CAPACITY - 1,
      })
    );
    assert_eq!(pool.available(), CAPACITY);
  }

  #[test]
  fn test_slots_are_word_aligned_and_disjoint() {
    let pool = ObjectPool::new(3, 8).unwrap();
    assert_eq!(pool.slot_size(), WORD);

    let slots: Vec<NonNull<u8>> = (0..8).map(|_| pool.allocate().unwrap()).collect();
    unsafe {
      for (i, slot) in slots.iter().enumerate() {
        assert_eq!(slot.as_ptr() as usize % WORD, 0);
        std::ptr::write_bytes(slot.as_ptr(), i as u8, WORD);
      }
      for (i, slot) in slots.iter().enumerate() {
        assert_eq!(*slot.as_ptr(), i as u8);
      }
    }
  }

  #[test]
  fn test_invalid_configuration() {
    assert_eq!(
      ObjectPool::new(8, 0).unwrap_err(),
      AllocError::InvalidConfig("pool capacity must be non-zero")
    );
    assert_eq!(
      ObjectPool::new(isize::MAX as usize / 4, 64).unwrap_err(),
      AllocError::InvalidConfig("pool storage size overflows")
    );
  }

  #[test]
  fn test_concurrent_allocate_never_double_issues() {
    let pool = entity_pool();
    let issued = Mutex::new(HashSet::new());
    let barrier = Barrier::new(THREADS);

    thread::scope(|scope| {
      for _ in 0..THREADS {
        scope.spawn(|| {
          barrier.wait();
          for _ in 0..1000 {
            let Ok(slot) = pool.allocate() else {
              continue;
            };
            let address = slot.as_ptr() as usize;
            assert!(issued.lock().insert(address), "slot issued twice");

            assert!(issued.lock().remove(&address));
            pool.deallocate(slot).unwrap();
          }
        });
      }
    });

    assert_eq!(pool.available(), CAPACITY);
    let mut free = pool.free_indices();
    free.sort_unstable();
    assert_eq!(free, (0..CAPACITY).collect::<Vec<_>>());
  }

  #[test]
  fn test_concurrent_drain_hands_out_each_slot_once() {
    let pool = entity_pool();
    let barrier = Barrier::new(THREADS);

    let taken: Vec<Vec<usize>> = thread::scope(|scope| {
      let workers: Vec<_> = (0..THREADS)
        .map(|_| {
          scope.spawn(|| {
            barrier.wait();
            let mut mine = Vec::new();
            while let Ok(slot) = pool.allocate() {
              mine.push(pool.slot_index(slot).unwrap());
            }
            mine
          })
        })
        .collect();

      workers.into_iter().map(|worker| worker.join().unwrap()).collect()
    });

    let mut all: Vec<usize> = taken.into_iter().flatten().collect();
    all.sort_unstable();
    assert_eq!(all, (0..CAPACITY).collect::<Vec<_>>());
    assert_eq!(pool.allocate(), Err(AllocError::PoolExhausted));
  }
}
