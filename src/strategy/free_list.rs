use std::ptr::NonNull;

use crate::block::BlockHeader;

/// Explicit list holding only free blocks, in release order.
///
/// Blocks enter when they are freed or split off and leave when a search
/// selects them or a neighbour absorbs them. A used block is never listed.
#[derive(Debug, Default)]
pub(crate) struct FreeList {
  blocks: Vec<NonNull<BlockHeader>>,
}

impl FreeList {
  pub fn push(
    &mut self,
    block: NonNull<BlockHeader>,
  ) {
    debug_assert!(!self.blocks.contains(&block), "block listed twice");
    self.blocks.push(block);
  }

  /// Detaches and returns the first listed block that can hold `size` bytes.
  ///
  /// # Safety
  ///
  /// Every listed header must be valid.
  pub unsafe fn take_first_fit(
    &mut self,
    size: usize,
  ) -> Option<NonNull<BlockHeader>> {
    let index = self
      .blocks
      .iter()
      .position(|block| unsafe { (*block.as_ptr()).size() >= size })?;

    Some(self.blocks.remove(index))
  }

  /// Unlists `block`, returns whether it was listed.
  pub fn remove(
    &mut self,
    block: NonNull<BlockHeader>,
  ) -> bool {
    match self.blocks.iter().position(|listed| *listed == block) {
      Some(index) => {
        self.blocks.remove(index);
        true
      }
      None => false,
    }
  }

  #[cfg(test)]
  pub fn iter(&self) -> impl Iterator<Item = NonNull<BlockHeader>> + '_ {
    self.blocks.iter().copied()
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.blocks.len()
  }
}
