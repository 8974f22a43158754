use std::ptr::NonNull;

use super::free_list::FreeList;
use crate::block::{BlockHeader, WORD};

/// Number of size classes. Class `i` holds blocks of `(i + 1)` words, the
/// last class also takes everything larger.
pub const SEGREGATED_BUCKETS: usize = 8;

/// Size class of a word aligned `size`.
#[inline]
pub(crate) fn bucket_of(size: usize) -> usize {
  (size / WORD).saturating_sub(1).min(SEGREGATED_BUCKETS - 1)
}

/// One [`FreeList`] per size class. A search only looks at the class of the
/// requested size and never falls through to a neighbour class.
#[derive(Debug, Default)]
pub(crate) struct SegregatedLists {
  buckets: [FreeList; SEGREGATED_BUCKETS],
}

impl SegregatedLists {
  /// # Safety
  ///
  /// `block` must point to a valid header.
  pub unsafe fn push(
    &mut self,
    block: NonNull<BlockHeader>,
  ) {
    let size = unsafe { (*block.as_ptr()).size() };
    self.buckets[bucket_of(size)].push(block);
  }

  /// # Safety
  ///
  /// Every listed header must be valid.
  pub unsafe fn take(
    &mut self,
    size: usize,
  ) -> Option<NonNull<BlockHeader>> {
    unsafe { self.buckets[bucket_of(size)].take_first_fit(size) }
  }

  /// Unlists `block`. Its size must not have changed since it was pushed.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  pub unsafe fn remove(
    &mut self,
    block: NonNull<BlockHeader>,
  ) -> bool {
    let size = unsafe { (*block.as_ptr()).size() };
    self.buckets[bucket_of(size)].remove(block)
  }

  #[cfg(test)]
  pub fn bucket(
    &self,
    index: usize,
  ) -> &FreeList {
    &self.buckets[index]
  }

  #[cfg(test)]
  pub fn iter(&self) -> impl Iterator<Item = NonNull<BlockHeader>> + '_ {
    self.buckets.iter().flat_map(FreeList::iter)
  }
}
