//! # blockalloc - Manual Memory Management Building Blocks
//!
//! This crate provides a general purpose **block heap** with swappable free
//! block search strategies, plus two fixed size pools layered next to it.
//! All of them sit on raw memory obtained from the OS through `sbrk(2)` or a
//! private `mmap(2)` arena.
//!
//! ## Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                                                                      │
//!   │   BlockHeap ───▶ SearchMode (first/next/best fit, free lists)        │
//!   │       │                                                              │
//!   │       ▼                                                              │
//!   │   MemoryProvider ◀─── ChunkPool          ObjectPool (thread safe,    │
//!   │   (sbrk | arena)                          own contiguous storage)    │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   blockalloc
//!   ├── align        - Word alignment (align!, align)
//!   ├── block        - Block header layout and payload offsets
//!   ├── chunk_pool   - ChunkPool, fixed size chunks over a provider
//!   ├── error        - AllocError
//!   ├── heap         - BlockHeap, HeapConfig
//!   ├── object_pool  - ObjectPool, mutex guarded slot stack
//!   ├── provider     - MemoryProvider, BreakProvider, ArenaProvider
//!   ├── strategy     - SearchMode and the free block searches
//!   └── typed_pool   - TypedPool, values of one type over a ChunkPool
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use blockalloc::{BlockHeap, SearchMode};
//!
//! let mut heap = BlockHeap::new(SearchMode::BestFit).unwrap();
//!
//! let address = heap.allocate(13).unwrap();
//! unsafe {
//!     address.cast::<u64>().as_ptr().write(42);
//!     heap.free(address);
//! }
//!
//! // The freed block is reused instead of growing the arena.
//! assert_eq!(heap.allocate(8).unwrap(), address);
//! ```
//!
//! ## How It Works
//!
//! Each heap allocation is a block with a three word header in front of the
//! payload:
//!
//! ```text
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size | used bit │  │  ┌──────────────────────────┐  │
//!   │  │ capacity        │  │  │   capacity bytes usable  │  │
//!   │  │ next: ptr/None  │  │  │                          │  │
//!   │  └─────────────────┘  │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Free blocks that are too large are split, and a freed block absorbs the
//! block right after it when that one is free too. A block reused without a
//! split records the requested size and keeps the rest as capacity.
//!
//! ## Limitations
//!
//! - **Single-threaded heap**: `BlockHeap` and `ChunkPool` need external
//!   synchronization, only `ObjectPool` is thread safe
//! - **Word alignment only**: no support for larger alignments
//! - **Memory is never returned to the OS** while an allocator is alive
//! - **Unix-only**: requires `libc` (`sbrk`, `mmap`)
//!
//! ## Safety
//!
//! Allocating is safe, handing a pointer back is not: `free` and
//! `ChunkPool::deallocate` trust that the pointer came from the same
//! allocator and is not freed twice. `ObjectPool::deallocate` checks its
//! argument and reports misuse as an error.

pub mod align;
mod block;
mod chunk_pool;
mod error;
mod heap;
mod object_pool;
mod provider;
mod strategy;
mod typed_pool;

pub use align::align;
pub use block::{HEADER_SIZE, WORD};
pub use chunk_pool::ChunkPool;
pub use error::{AllocError, AllocResult};
pub use heap::{BlockHeap, BlockInfo, Blocks, HeapConfig, HeapStats};
pub use object_pool::ObjectPool;
#[cfg(unix)]
pub use provider::BreakProvider;
pub use provider::{ArenaProvider, DEFAULT_ARENA_CAPACITY, MemoryProvider};
pub use strategy::{SEGREGATED_BUCKETS, SearchMode};
pub use typed_pool::TypedPool;
