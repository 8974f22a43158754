use std::{marker::PhantomData, mem, ptr::NonNull};

use crate::{
  block::WORD,
  chunk_pool::ChunkPool,
  error::{AllocError, AllocResult},
  provider::{ArenaProvider, MemoryProvider},
};

/// [`ChunkPool`] whose chunks hold values of `T`.
///
/// `insert` moves a value into a free chunk and `remove` moves it back out,
/// so the chunk free list does the work of a per type `new`/`delete`.
/// Values still inserted when the pool goes away are not dropped.
#[derive(Debug)]
pub struct TypedPool<T, P: MemoryProvider = ArenaProvider> {
  chunks: ChunkPool<P>,
  marker: PhantomData<T>,
}

impl<T> TypedPool<T, ArenaProvider> {
  pub fn new(per_block: usize) -> AllocResult<Self> {
    Self::with_provider(ArenaProvider::new()?, per_block)
  }
}

impl<T, P: MemoryProvider> TypedPool<T, P> {
  /// Fails with [`AllocError::InvalidConfig`] when `T` needs more than word
  /// alignment.
  pub fn with_provider(
    provider: P,
    per_block: usize,
  ) -> AllocResult<Self> {
    if mem::align_of::<T>() > WORD {
      return Err(AllocError::InvalidConfig("type alignment exceeds the word"));
    }

    Ok(Self {
      chunks: ChunkPool::with_provider(provider, mem::size_of::<T>().max(1), per_block)?,
      marker: PhantomData,
    })
  }

  pub fn chunks(&self) -> &ChunkPool<P> {
    &self.chunks
  }

  /// Moves `value` into a chunk and returns where it lives.
  pub fn insert(
    &mut self,
    value: T,
  ) -> AllocResult<NonNull<T>> {
    let slot = self.chunks.allocate()?.cast::<T>();
    unsafe { slot.as_ptr().write(value) };
    Ok(slot)
  }

  /// Moves the value out and gives its chunk back to the pool.
  ///
  /// # Safety
  ///
  /// `slot` must come from [`Self::insert`] on this pool and must not have
  /// been removed since.
  pub unsafe fn remove(
    &mut self,
    slot: NonNull<T>,
  ) -> T {
    unsafe {
      let value = slot.as_ptr().read();
      self.chunks.deallocate(slot.cast());
      value
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Debug, PartialEq)]
  struct Particle {
    position: (f32, f32),
    name: String,
  }

  fn particle(name: &str) -> Particle {
    Particle {
      position: (1.0, -2.5),
      name: name.to_string(),
    }
  }

  #[test]
  fn test_insert_and_remove() {
    let mut pool = TypedPool::new(4).unwrap();

    let spark = pool.insert(particle("spark")).unwrap();
    let ember = pool.insert(particle("ember")).unwrap();

    unsafe {
      assert_eq!((*spark.as_ptr()).name, "spark");
      assert_eq!(pool.remove(ember), particle("ember"));
      assert_eq!(pool.remove(spark), particle("spark"));
    }
    assert_eq!(pool.chunks().free_chunks(), 4);
  }

  #[test]
  fn test_removed_chunk_is_reused_first() {
    let mut pool = TypedPool::new(4).unwrap();

    let first = pool.insert(1u64).unwrap();
    pool.insert(2u64).unwrap();
    assert_eq!(unsafe { pool.remove(first) }, 1);

    assert_eq!(pool.insert(3u64).unwrap(), first);
    assert_eq!(pool.chunks().blocks(), 1);
  }

  #[test]
  fn test_chunk_size_follows_type() {
    let pool = TypedPool::<u8>::new(8).unwrap();
    assert_eq!(pool.chunks().chunk_size(), WORD);

    let pool = TypedPool::<[u64; 3]>::new(8).unwrap();
    assert_eq!(pool.chunks().chunk_size(), 3 * 8);

    let pool = TypedPool::<()>::new(8).unwrap();
    assert_eq!(pool.chunks().chunk_size(), WORD);
  }

  #[test]
  fn test_values_are_aligned() {
    let mut pool = TypedPool::new(3).unwrap();

    for value in 0..7usize {
      let slot = pool.insert(value).unwrap();
      assert_eq!(slot.as_ptr() as usize % mem::align_of::<usize>(), 0);
      assert_eq!(unsafe { *slot.as_ptr() }, value);
    }
  }

  #[test]
  fn test_over_aligned_type_is_rejected() {
    #[allow(dead_code)]
    #[derive(Debug)]
    #[repr(align(64))]
    struct CacheLine([u8; 64]);

    assert_eq!(
      TypedPool::<CacheLine>::new(4).unwrap_err(),
      AllocError::InvalidConfig("type alignment exceeds the word")
    );
  }
}
