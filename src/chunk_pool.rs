use std::{mem, ptr::NonNull};

use tracing::debug;

use crate::{
  align,
  error::{AllocError, AllocResult},
  provider::{ArenaProvider, MemoryProvider},
};

/// What a free chunk holds. Once handed out the same bytes belong to the
/// caller.
#[repr(C)]
struct Chunk {
  next: Option<NonNull<Chunk>>,
}

/// Fixed size chunk allocator.
///
/// Memory is obtained one block of `chunks_per_block` chunks at a time and
/// every chunk of a fresh block is threaded into an intrusive free list:
///
/// ```text
///   free
///    │
///    ▼
///   ┌─────────┬─────────┬─────────┬─────────┐
///   │ chunk 0 │ chunk 1 │ chunk 2 │ chunk 3 │
///   │ next ───┼▶next ───┼▶next ───┼▶None    │
///   └─────────┴─────────┴─────────┴─────────┘
/// ```
///
/// `allocate` pops the head of the list, `deallocate` pushes the chunk back
/// in front. Both are O(1). Blocks are never returned to the provider.
///
/// Not synchronized, like [`crate::BlockHeap`].
#[derive(Debug)]
pub struct ChunkPool<P: MemoryProvider = ArenaProvider> {
  provider: P,
  chunk_size: usize,
  chunks_per_block: usize,
  free: Option<NonNull<Chunk>>,
  blocks: usize,
  free_chunks: usize,
}

unsafe impl<P: MemoryProvider + Send> Send for ChunkPool<P> {}

impl ChunkPool<ArenaProvider> {
  pub fn new(
    chunk_size: usize,
    chunks_per_block: usize,
  ) -> AllocResult<Self> {
    Self::with_provider(ArenaProvider::new()?, chunk_size, chunks_per_block)
  }
}

impl<P: MemoryProvider> ChunkPool<P> {
  /// Chunk sizes are raised to hold a free list link and rounded up to the
  /// machine word.
  pub fn with_provider(
    provider: P,
    chunk_size: usize,
    chunks_per_block: usize,
  ) -> AllocResult<Self> {
    if chunk_size == 0 {
      return Err(AllocError::InvalidConfig("chunk size must be non-zero"));
    }
    if chunks_per_block == 0 {
      return Err(AllocError::InvalidConfig("chunks per block must be non-zero"));
    }
    if chunk_size > isize::MAX as usize / 2 {
      return Err(AllocError::InvalidConfig("chunk size is too large"));
    }

    let chunk_size = align!(chunk_size.max(mem::size_of::<Chunk>()));
    chunk_size
      .checked_mul(chunks_per_block)
      .filter(|block_size| *block_size <= isize::MAX as usize)
      .ok_or(AllocError::InvalidConfig("block size overflows"))?;

    Ok(Self {
      provider,
      chunk_size,
      chunks_per_block,
      free: None,
      blocks: 0,
      free_chunks: 0,
    })
  }

  pub fn chunk_size(&self) -> usize {
    self.chunk_size
  }

  pub fn chunks_per_block(&self) -> usize {
    self.chunks_per_block
  }

  /// Blocks obtained from the provider so far.
  pub fn blocks(&self) -> usize {
    self.blocks
  }

  pub fn free_chunks(&self) -> usize {
    self.free_chunks
  }

  /// Returns a chunk of [`Self::chunk_size`] bytes. Fails with
  /// [`AllocError::PoolExhausted`] when the free list is empty and the
  /// provider cannot supply another block.
  pub fn allocate(&mut self) -> AllocResult<NonNull<u8>> {
    let chunk = match self.free {
      Some(chunk) => chunk,
      None => self.allocate_block()?,
    };

    unsafe {
      self.free = (*chunk.as_ptr()).next;
    }
    self.free_chunks -= 1;

    Ok(chunk.cast())
  }

  /// Puts a chunk back in front of the free list.
  ///
  /// # Safety
  ///
  /// `address` must come from [`Self::allocate`] on this pool and must not
  /// have been deallocated since.
  pub unsafe fn deallocate(
    &mut self,
    address: NonNull<u8>,
  ) {
    let chunk = address.cast::<Chunk>();
    unsafe { chunk.as_ptr().write(Chunk { next: self.free }) };

    self.free = Some(chunk);
    self.free_chunks += 1;
  }

  /// Requests a new block and links all of its chunks, returning the first.
  fn allocate_block(&mut self) -> AllocResult<NonNull<Chunk>> {
    let block_size = self.chunk_size * self.chunks_per_block;

    let Some(begin) = self.provider.request(block_size) else {
      debug!(block_size, blocks = self.blocks, "chunk pool exhausted");
      return Err(AllocError::PoolExhausted);
    };

    unsafe {
      for i in 0..self.chunks_per_block {
        let chunk = begin.add(i * self.chunk_size).cast::<Chunk>();
        let next = (i + 1 < self.chunks_per_block)
          .then(|| begin.add((i + 1) * self.chunk_size).cast());
        chunk.as_ptr().write(Chunk { next });
      }
    }

    self.blocks += 1;
    self.free_chunks += self.chunks_per_block;
    debug!(
      chunk_size = self.chunk_size,
      chunks = self.chunks_per_block,
      "chunk pool acquired block at {:?}",
      begin
    );

    Ok(begin.cast())
  }
}
