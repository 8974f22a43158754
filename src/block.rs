use std::{mem, ptr::NonNull};

/// Machine word size in bytes. Every payload size is a multiple of it.
pub const WORD: usize = mem::size_of::<usize>();

/// Size of a block header in bytes. The payload starts right after it.
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

/// Bit 0 of the stored size. Sizes are word multiples so the bit is never
/// part of the size itself.
const USED_BIT: usize = 1;

/// Header written in front of every payload handed out by
/// [`crate::BlockHeap`].
///
/// ```text
///   ┌──────────────────────────────┬──────────────────────────────┐
///   │        BlockHeader           │          Payload             │
///   │  ┌────────────────────────┐  │                              │
///   │  │ size | used (bit 0)    │  │    capacity() bytes, word    │
///   │  │ capacity               │  │    multiple, the first       │
///   │  │ next: Option<header>   │  │    size() of them requested  │
///   │  └────────────────────────┘  │                              │
///   │       3 words                │                              │
///   └──────────────────────────────┴──────────────────────────────┘
///                                  ▲
///                                  └── Pointer returned to user
/// ```
///
/// `size` is what the last allocation asked for, `capacity` is how far the
/// payload really extends. They only differ while a block handed out without
/// a split is in use.
///
/// `next` links headers in address order. Blocks are never handed back to
/// the OS, they are only split, merged and flagged.
#[repr(C)]
pub struct BlockHeader {
  tagged: usize,
  capacity: usize,
  pub next: Option<NonNull<BlockHeader>>,
}

impl BlockHeader {
  pub fn new(
    size: usize,
    used: bool,
    next: Option<NonNull<BlockHeader>>,
  ) -> Self {
    debug_assert_eq!(size % WORD, 0, "block sizes are word multiples");
    Self {
      tagged: size | used as usize,
      capacity: size,
      next,
    }
  }

  /// Recorded payload size in bytes, header excluded.
  #[inline]
  pub fn size(&self) -> usize {
    self.tagged & !USED_BIT
  }

  /// Bytes between the header and the end of the block's extent.
  #[inline]
  pub fn capacity(&self) -> usize {
    self.capacity
  }

  #[inline]
  pub fn is_used(&self) -> bool {
    self.tagged & USED_BIT != 0
  }

  #[inline]
  pub fn set_used(
    &mut self,
    used: bool,
  ) {
    if used {
      self.tagged |= USED_BIT;
    } else {
      self.tagged &= !USED_BIT;
    }
  }

  /// Moves the end of the block. Both the extent and the recorded size
  /// become `size`.
  #[inline]
  pub fn set_size(
    &mut self,
    size: usize,
  ) {
    self.record_size(size);
    self.capacity = size;
  }

  /// Records a size within the current extent, the capacity is kept.
  #[inline]
  pub fn record_size(
    &mut self,
    size: usize,
  ) {
    debug_assert_eq!(size % WORD, 0, "block sizes are word multiples");
    self.tagged = size | (self.tagged & USED_BIT);
  }

  /// Writes a fresh header at `address` and returns it.
  ///
  /// # Safety
  ///
  /// `address` must be word aligned and valid for writes of
  /// [`HEADER_SIZE`] bytes.
  #[inline]
  pub unsafe fn write(
    address: NonNull<u8>,
    header: BlockHeader,
  ) -> NonNull<BlockHeader> {
    let block = address.cast::<BlockHeader>();
    unsafe { block.as_ptr().write(header) };
    block
  }

  /// Recovers the header that owns a payload address.
  ///
  /// # Safety
  ///
  /// `payload` must have been produced by [`Self::payload_of`], which is the
  /// case for every pointer [`crate::BlockHeap::allocate`] returns.
  #[inline]
  pub unsafe fn from_payload(payload: NonNull<u8>) -> NonNull<BlockHeader> {
    unsafe { payload.sub(HEADER_SIZE).cast() }
  }

  /// First payload byte of `block`.
  ///
  /// # Safety
  ///
  /// `block` must point to a header written by [`Self::write`].
  #[inline]
  pub unsafe fn payload_of(block: NonNull<BlockHeader>) -> NonNull<u8> {
    unsafe { block.cast::<u8>().add(HEADER_SIZE) }
  }

  /// First byte after the extent of `block`, where a split remainder or the
  /// following block would start.
  ///
  /// # Safety
  ///
  /// Same as [`Self::payload_of`].
  #[inline]
  pub unsafe fn end_of(block: NonNull<BlockHeader>) -> NonNull<u8> {
    unsafe { Self::payload_of(block).add((*block.as_ptr()).capacity()) }
  }
}

/// Walks the chain of headers starting at `head`, following `next`.
///
/// # Safety
///
/// Every header reachable from `head` must stay valid, and no link may be
/// rewritten, while the iterator is alive.
pub unsafe fn chain(
  head: Option<NonNull<BlockHeader>>,
) -> impl Iterator<Item = NonNull<BlockHeader>> {
  std::iter::successors(head, |block| unsafe { (*block.as_ptr()).next })
}

/// Whether `block` is free and can hold `size` bytes. A free block's
/// recorded size is its capacity.
///
/// # Safety
///
/// `block` must point to a valid header.
#[inline]
pub unsafe fn fits(
  block: NonNull<BlockHeader>,
  size: usize,
) -> bool {
  let header = unsafe { &*block.as_ptr() };
  !header.is_used() && header.size() >= size
}
