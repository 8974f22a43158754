use std::ptr::{self, NonNull};

use libc::{c_void, intptr_t};
use tracing::debug;

use crate::{
  align,
  error::{AllocError, AllocResult},
};

/// Default capacity of an [`ArenaProvider`]: 4 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 4 * 1024 * 1024;

/// Source of raw memory for the allocators in this crate.
///
/// Each successful [`MemoryProvider::request`] returns a fresh, word aligned
/// region that overlaps no previous one. On exhaustion nothing changes and
/// `None` comes back. There is no way to give a region back: space is reused
/// through the allocators' own free structures.
pub trait MemoryProvider {
  /// Returns a region where `size` bytes can be written, or `None` when the
  /// provider is exhausted.
  fn request(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>>;

  /// Forgets every region handed out so far, where the backing allows it.
  fn reset(&mut self);
}

impl<P: MemoryProvider + ?Sized> MemoryProvider for &mut P {
  fn request(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    (**self).request(size)
  }

  fn reset(&mut self) {
    (**self).reset()
  }
}

/// Grows the process break with `sbrk(2)`.
///
/// ```text
///   High Address ┌─────────────────────┐
///                │       Stack         │ ↓ grows down
///                │                     │
///                │         ▲           │
///                │         │           │
///                │       Heap          │ ↑ grows up (sbrk)
///                ├─────────────────────┤ ← Program Break
///                │       Data          │
///   Low Address  └─────────────────────┘
/// ```
///
/// The break is shared with everything else in the process, so
/// [`MemoryProvider::reset`] never moves it back.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct BreakProvider {
  grown: usize,
}

#[cfg(unix)]
impl BreakProvider {
  pub fn new() -> Self {
    Self { grown: 0 }
  }

  /// Total bytes this provider moved the break by, padding included.
  pub fn grown(&self) -> usize {
    self.grown
  }

  /// Current program break.
  pub fn program_break() -> *mut u8 {
    unsafe { libc::sbrk(0).cast() }
  }

  /// Moves the break up by `increment` bytes and returns its old position.
  fn grow(
    &mut self,
    increment: usize,
  ) -> Option<usize> {
    let address = unsafe { libc::sbrk(increment as intptr_t) };
    if address == usize::MAX as *mut c_void {
      debug!(increment, "program break cannot grow any further");
      return None;
    }

    self.grown += increment;
    Some(address as usize)
  }
}

#[cfg(unix)]
impl MemoryProvider for BreakProvider {
  fn request(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size > isize::MAX as usize / 2 {
      return None;
    }

    let size = align!(size);

    let current = unsafe { libc::sbrk(0) } as usize;
    let increment = size + (align!(current) - current);
    let address = self.grow(increment)?;

    // Alignment follows the address sbrk returned, the break may have moved
    // since it was read.
    let start = align!(address);
    let end = address + increment;
    if start + size > end {
      let shortfall = start + size - end;
      if self.grow(shortfall)? != end {
        debug!(requested = size, "program break moved while growing");
        return None;
      }
    }

    debug!(
      requested = size,
      pad = start - address,
      "grew program break to {:?}",
      Self::program_break()
    );

    NonNull::new(start as *mut u8)
  }

  fn reset(&mut self) {
    debug!(grown = self.grown, "program break is retained across reset");
  }
}

/// Bumps a cursor inside one private anonymous mapping reserved up front.
///
/// ```text
///   ┌──────────┬──────────┬──────────┬────────────────────────────────┐
///   │ region 1 │ region 2 │ region 3 │           unused               │
///   └──────────┴──────────┴──────────┴────────────────────────────────┘
///   ▲                                ▲                                ▲
///   base                          brk()                    base + capacity
/// ```
///
/// Requests that would move the cursor past the end of the mapping fail and
/// leave the cursor where it was. The mapping lives as long as the provider.
#[derive(Debug)]
pub struct ArenaProvider {
  base: NonNull<u8>,
  capacity: usize,
  cursor: usize,
}

// The mapping is owned exclusively by the provider.
unsafe impl Send for ArenaProvider {}

impl ArenaProvider {
  /// Reserves an arena of [`DEFAULT_ARENA_CAPACITY`] bytes.
  pub fn new() -> AllocResult<Self> {
    Self::with_capacity(DEFAULT_ARENA_CAPACITY)
  }

  pub fn with_capacity(capacity: usize) -> AllocResult<Self> {
    if capacity == 0 {
      return Err(AllocError::InvalidConfig("arena capacity must be non-zero"));
    }

    let protection = libc::PROT_READ | libc::PROT_WRITE;
    let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

    let address = unsafe { libc::mmap(ptr::null_mut(), capacity, protection, flags, -1, 0) };
    if address == libc::MAP_FAILED {
      return Err(AllocError::MapFailed { capacity });
    }
    let base = NonNull::new(address.cast::<u8>()).ok_or(AllocError::MapFailed { capacity })?;

    debug!(capacity, "mapped arena at {:?}", base);

    Ok(Self {
      base,
      capacity,
      cursor: 0,
    })
  }

  pub fn base(&self) -> NonNull<u8> {
    self.base
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn remaining(&self) -> usize {
    self.capacity - self.cursor
  }

  /// Current end of the handed out space, the arena's own program break.
  pub fn brk(&self) -> NonNull<u8> {
    unsafe { self.base.add(self.cursor) }
  }
}

impl MemoryProvider for ArenaProvider {
  fn request(
    &mut self,
    size: usize,
  ) -> Option<NonNull<u8>> {
    if size > self.remaining() {
      debug!(requested = size, remaining = self.remaining(), "arena exhausted");
      return None;
    }

    let size = align!(size);
    if size > self.remaining() {
      debug!(requested = size, remaining = self.remaining(), "arena exhausted");
      return None;
    }

    let address = self.brk();
    self.cursor += size;

    Some(address)
  }

  fn reset(&mut self) {
    debug!(released = self.cursor, "rewinding arena cursor");
    self.cursor = 0;
  }
}

impl Drop for ArenaProvider {
  fn drop(&mut self) {
    unsafe {
      if libc::munmap(self.base.as_ptr().cast(), self.capacity) != 0 {
        debug!(capacity = self.capacity, "munmap of arena failed");
      }
    }
  }
}
