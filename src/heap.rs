use std::{marker::PhantomData, ptr::NonNull};

use tracing::{debug, trace};

use crate::{
  align,
  block::{BlockHeader, HEADER_SIZE, WORD},
  error::{AllocError, AllocResult},
  provider::{ArenaProvider, MemoryProvider},
  strategy::{SearchMode, Strategy},
};

/// Settings fixed before the first allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
  pub search_mode: SearchMode,
  /// Carve oversized free blocks into the requested part and a free
  /// remainder.
  pub split: bool,
}

impl Default for HeapConfig {
  fn default() -> Self {
    Self {
      search_mode: SearchMode::FirstFit,
      split: true,
    }
  }
}

impl HeapConfig {
  pub fn with_search_mode(
    mut self,
    search_mode: SearchMode,
  ) -> Self {
    self.search_mode = search_mode;
    self
  }

  pub fn with_split(
    mut self,
    split: bool,
  ) -> Self {
    self.split = split;
    self
  }
}

/// Snapshot of one block, as seen through [`BlockHeap::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload address, the pointer [`BlockHeap::allocate`] hands out.
  pub address: NonNull<u8>,
  /// Recorded size, the aligned request while the block is used.
  pub size: usize,
  /// Payload bytes the block spans, at least `size`.
  pub capacity: usize,
  pub used: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
  pub blocks: usize,
  pub used_blocks: usize,
  pub used_bytes: usize,
  pub free_bytes: usize,
}

/// General purpose allocator over memory obtained from a [`MemoryProvider`].
///
/// Blocks form a singly linked chain in address order:
///
/// ```text
///   first                                                  last
///     │                                                      │
///     ▼                                                      ▼
///   ┌────────┬─────────┐   ┌────────┬─────────┐   ┌────────┬─────────┐
///   │ header │ payload │──▶│ header │ payload │──▶│ header │ payload │──▶ None
///   │ used   │         │   │ free   │         │   │ used   │         │
///   └────────┴─────────┘   └────────┴─────────┘   └────────┴─────────┘
/// ```
///
/// `allocate` asks the active [`SearchMode`] for a free block first and only
/// grows through the provider when nothing fits. `free` merges the block with
/// the block that follows it when that one is free too.
///
/// Not synchronized: share it across threads only behind an external lock.
#[derive(Debug)]
pub struct BlockHeap<P: MemoryProvider = ArenaProvider> {
  provider: P,
  first: Option<NonNull<BlockHeader>>,
  last: Option<NonNull<BlockHeader>>,
  strategy: Strategy,
  split: bool,
}

// Every header lives in memory owned through `provider`.
unsafe impl<P: MemoryProvider + Send> Send for BlockHeap<P> {}

impl BlockHeap<ArenaProvider> {
  /// Heap over a fresh [`ArenaProvider`] of the default capacity.
  pub fn new(mode: SearchMode) -> AllocResult<Self> {
    let config = HeapConfig::default().with_search_mode(mode);
    Ok(Self::with_provider(ArenaProvider::new()?, config))
  }
}

impl<P: MemoryProvider> BlockHeap<P> {
  pub fn with_provider(
    provider: P,
    config: HeapConfig,
  ) -> Self {
    Self {
      provider,
      first: None,
      last: None,
      strategy: Strategy::new(config.search_mode),
      split: config.split,
    }
  }

  pub fn search_mode(&self) -> SearchMode {
    self.strategy.mode()
  }

  pub fn config(&self) -> HeapConfig {
    HeapConfig {
      search_mode: self.search_mode(),
      split: self.split,
    }
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  /// Switches the search mode. The heap starts over empty.
  pub fn set_search_mode(
    &mut self,
    mode: SearchMode,
  ) {
    debug!(from = %self.search_mode(), to = %mode, "switching search mode");
    self.strategy = Strategy::new(mode);
    self.reset();
  }

  /// Forgets every block and resets the provider. Pointers handed out
  /// before must not be used or freed afterwards.
  pub fn reset(&mut self) {
    debug!(mode = %self.search_mode(), blocks = self.block_count(), "resetting heap");
    self.first = None;
    self.last = None;
    self.strategy = Strategy::new(self.strategy.mode());
    self.provider.reset();
  }

  /// Returns a word aligned payload of at least `size` bytes. The block
  /// records `align(size)` as its size even when it spans more.
  ///
  /// Zero byte requests get one word. Fails with
  /// [`AllocError::OutOfMemory`] when no free block fits and the provider is
  /// exhausted; the heap is left unchanged in that case.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> AllocResult<NonNull<u8>> {
    if size > isize::MAX as usize - HEADER_SIZE - WORD {
      return Err(AllocError::OutOfMemory { requested: size });
    }

    let size = align!(size.max(1));

    unsafe {
      if let Some(block) = self.strategy.find(self.first, size) {
        self.take(block, size);
        return Ok(BlockHeader::payload_of(block));
      }

      let Some(address) = self.provider.request(HEADER_SIZE + size) else {
        debug!(requested = size, "heap out of memory");
        return Err(AllocError::OutOfMemory { requested: size });
      };

      let block = BlockHeader::write(address, BlockHeader::new(size, true, None));

      match self.last {
        Some(last) => (*last.as_ptr()).next = Some(block),
        None => self.first = Some(block),
      }
      self.last = Some(block);

      Ok(BlockHeader::payload_of(block))
    }
  }

  /// Releases a payload returned by [`Self::allocate`].
  ///
  /// # Safety
  ///
  /// `address` must come from `allocate` on this heap, must not have been
  /// freed yet and the heap must not have been reset since.
  pub unsafe fn free(
    &mut self,
    address: NonNull<u8>,
  ) {
    unsafe {
      let block = BlockHeader::from_payload(address);
      debug_assert!((*block.as_ptr()).is_used(), "double free of {:?}", address);

      let capacity = (*block.as_ptr()).capacity();
      (*block.as_ptr()).record_size(capacity);

      if let Some(next) = self.coalescable(block) {
        self.coalesce(block, next);
      }

      (*block.as_ptr()).set_used(false);
      self.strategy.release(block);
    }
  }

  /// Iterates over every block in address order.
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      current: self.first,
      marker: PhantomData,
    }
  }

  pub fn block_count(&self) -> usize {
    self.blocks().count()
  }

  /// Block that owns a payload address.
  ///
  /// # Safety
  ///
  /// `address` must come from [`Self::allocate`] on this heap and the heap
  /// must not have been reset since.
  pub unsafe fn block_info(
    &self,
    address: NonNull<u8>,
  ) -> BlockInfo {
    unsafe { BlockInfo::of(BlockHeader::from_payload(address)) }
  }

  pub fn stats(&self) -> HeapStats {
    self.blocks().fold(HeapStats::default(), |mut stats, block| {
      stats.blocks += 1;
      if block.used {
        stats.used_blocks += 1;
        stats.used_bytes += block.size;
      } else {
        stats.free_bytes += block.size;
      }
      stats
    })
  }

  /// Marks a free block found by the strategy as used, splitting off the
  /// excess first when it can host a block of its own. Unsplit excess stays
  /// part of the block's capacity.
  unsafe fn take(
    &mut self,
    block: NonNull<BlockHeader>,
    size: usize,
  ) {
    unsafe {
      if self.split && Self::can_split(block, size) {
        self.split(block, size);
      }
      let header = &mut *block.as_ptr();
      header.record_size(size);
      header.set_used(true);
    }
  }

  /// The remainder must fit a header plus at least one word of payload.
  unsafe fn can_split(
    block: NonNull<BlockHeader>,
    size: usize,
  ) -> bool {
    unsafe { (*block.as_ptr()).capacity() >= size + HEADER_SIZE + WORD }
  }

  unsafe fn split(
    &mut self,
    block: NonNull<BlockHeader>,
    size: usize,
  ) {
    unsafe {
      let original = (*block.as_ptr()).capacity();
      let next = (*block.as_ptr()).next;

      let remainder_size = original - size - HEADER_SIZE;
      let address = BlockHeader::payload_of(block).add(size);
      let remainder = BlockHeader::write(address, BlockHeader::new(remainder_size, false, next));

      (*block.as_ptr()).set_size(size);
      (*block.as_ptr()).next = Some(remainder);

      if self.last == Some(block) {
        self.last = Some(remainder);
      }

      trace!(original, size, remainder_size, "split block at {:?}", block);
      self.strategy.release(remainder);
    }
  }

  /// Following block, when it is free and starts right where `block` ends.
  unsafe fn coalescable(
    &self,
    block: NonNull<BlockHeader>,
  ) -> Option<NonNull<BlockHeader>> {
    unsafe {
      let next = (*block.as_ptr()).next?;
      let adjacent = BlockHeader::end_of(block) == next.cast::<u8>();
      (adjacent && !(*next.as_ptr()).is_used()).then_some(next)
    }
  }

  unsafe fn coalesce(
    &mut self,
    block: NonNull<BlockHeader>,
    next: NonNull<BlockHeader>,
  ) {
    unsafe {
      self.strategy.absorb(next, block);

      let absorbed = (*next.as_ptr()).capacity();
      let after = (*next.as_ptr()).next;
      let merged = (*block.as_ptr()).capacity() + HEADER_SIZE + absorbed;

      (*block.as_ptr()).set_size(merged);
      (*block.as_ptr()).next = after;

      if self.last == Some(next) {
        self.last = Some(block);
      }

      trace!(absorbed, merged, "coalesced block at {:?}", block);
    }
  }
}

/// A heap can feed another allocator, for example a [`crate::ChunkPool`].
impl<P: MemoryProvider> MemoryProvider for BlockHeap<P> {
  fn request(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    self.allocate(size).ok()
  }

  fn reset(&mut self) {
    BlockHeap::reset(self)
  }
}

impl BlockInfo {
  unsafe fn of(block: NonNull<BlockHeader>) -> Self {
    unsafe {
      let header = &*block.as_ptr();
      Self {
        address: BlockHeader::payload_of(block),
        size: header.size(),
        capacity: header.capacity(),
        used: header.is_used(),
      }
    }
  }
}

/// Iterator returned by [`BlockHeap::blocks`].
pub struct Blocks<'a> {
  current: Option<NonNull<BlockHeader>>,
  marker: PhantomData<&'a BlockHeader>,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<Self::Item> {
    let block = self.current?;
    unsafe {
      self.current = (*block.as_ptr()).next;
      Some(BlockInfo::of(block))
    }
  }
}
