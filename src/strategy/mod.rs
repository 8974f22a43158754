//! Free block search policies.
//!
//! | Mode                 | Looks at                         | Picks                              |
//! |----------------------|----------------------------------|------------------------------------|
//! | `FirstFit`           | whole chain from the head        | first block that fits              |
//! | `NextFit`            | chain from the last hit, wraps   | first block that fits              |
//! | `BestFit`            | whole chain                      | smallest block that fits           |
//! | `ExplicitFreeList`   | list of free blocks only         | first listed block that fits       |
//! | `SegregatedFreeList` | one size class bucket            | first block in the bucket that fits|

use std::{fmt, ptr::NonNull, str::FromStr};

use crate::{
  block::{self, BlockHeader},
  error::AllocError,
};

mod free_list;
mod segregated;

pub(crate) use free_list::FreeList;
pub(crate) use segregated::SegregatedLists;
pub use segregated::SEGREGATED_BUCKETS;

/// Selects how [`crate::BlockHeap`] looks for a reusable free block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SearchMode {
  #[default]
  FirstFit,
  NextFit,
  BestFit,
  ExplicitFreeList,
  SegregatedFreeList,
}

impl SearchMode {
  pub const ALL: [SearchMode; 5] = [
    SearchMode::FirstFit,
    SearchMode::NextFit,
    SearchMode::BestFit,
    SearchMode::ExplicitFreeList,
    SearchMode::SegregatedFreeList,
  ];
}

impl fmt::Display for SearchMode {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let name = match self {
      SearchMode::FirstFit => "first-fit",
      SearchMode::NextFit => "next-fit",
      SearchMode::BestFit => "best-fit",
      SearchMode::ExplicitFreeList => "explicit-free-list",
      SearchMode::SegregatedFreeList => "segregated-free-list",
    };
    f.write_str(name)
  }
}

impl FromStr for SearchMode {
  type Err = AllocError;

  /// Case insensitive, `-`, `_` and spaces are ignored.
  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let normalized: String = value
      .chars()
      .filter(|c| !matches!(c, '-' | '_' | ' '))
      .map(|c| c.to_ascii_lowercase())
      .collect();

    match normalized.as_str() {
      "firstfit" => Ok(SearchMode::FirstFit),
      "nextfit" => Ok(SearchMode::NextFit),
      "bestfit" => Ok(SearchMode::BestFit),
      "freelist" | "explicitfreelist" => Ok(SearchMode::ExplicitFreeList),
      "segregatedlist" | "segregatedfreelist" => Ok(SearchMode::SegregatedFreeList),
      _ => Err(AllocError::UnknownSearchMode(value.to_owned())),
    }
  }
}

/// Runtime state of the active search mode, dispatched by value.
///
/// The linear variants scan the heap chain directly. The list variants keep
/// their own free structure and must hear about every block that becomes
/// free ([`Strategy::release`]) or stops existing ([`Strategy::absorb`]).
#[derive(Debug)]
pub(crate) enum Strategy {
  FirstFit,
  NextFit { cursor: Option<NonNull<BlockHeader>> },
  BestFit,
  ExplicitFreeList(FreeList),
  SegregatedFreeList(SegregatedLists),
}

impl Strategy {
  pub fn new(mode: SearchMode) -> Self {
    match mode {
      SearchMode::FirstFit => Strategy::FirstFit,
      SearchMode::NextFit => Strategy::NextFit { cursor: None },
      SearchMode::BestFit => Strategy::BestFit,
      SearchMode::ExplicitFreeList => Strategy::ExplicitFreeList(FreeList::default()),
      SearchMode::SegregatedFreeList => Strategy::SegregatedFreeList(SegregatedLists::default()),
    }
  }

  pub fn mode(&self) -> SearchMode {
    match self {
      Strategy::FirstFit => SearchMode::FirstFit,
      Strategy::NextFit { .. } => SearchMode::NextFit,
      Strategy::BestFit => SearchMode::BestFit,
      Strategy::ExplicitFreeList(_) => SearchMode::ExplicitFreeList,
      Strategy::SegregatedFreeList(_) => SearchMode::SegregatedFreeList,
    }
  }

  /// Returns a free block of at least `size` bytes. List variants unlist the
  /// block they return.
  ///
  /// # Safety
  ///
  /// `head` must start a valid chain and every tracked block must be valid.
  pub unsafe fn find(
    &mut self,
    head: Option<NonNull<BlockHeader>>,
    size: usize,
  ) -> Option<NonNull<BlockHeader>> {
    unsafe {
      match self {
        Strategy::FirstFit => first_fit(head, size),
        Strategy::NextFit { cursor } => {
          let found = next_fit(head, *cursor, size);
          if found.is_some() {
            *cursor = found;
          }
          found
        }
        Strategy::BestFit => best_fit(head, size),
        Strategy::ExplicitFreeList(list) => list.take_first_fit(size),
        Strategy::SegregatedFreeList(lists) => lists.take(size),
      }
    }
  }

  /// Records that `block` is free. It must already be flagged unused.
  ///
  /// # Safety
  ///
  /// `block` must point to a valid header.
  pub unsafe fn release(
    &mut self,
    block: NonNull<BlockHeader>,
  ) {
    debug_assert!(unsafe { !(*block.as_ptr()).is_used() });

    match self {
      Strategy::ExplicitFreeList(list) => list.push(block),
      Strategy::SegregatedFreeList(lists) => unsafe { lists.push(block) },
      Strategy::FirstFit | Strategy::NextFit { .. } | Strategy::BestFit => {}
    }
  }

  /// Records that the free block `absorbed` was merged into `into`. Must be
  /// called before `absorbed`'s header is overwritten.
  ///
  /// # Safety
  ///
  /// `absorbed` must point to a valid header.
  pub unsafe fn absorb(
    &mut self,
    absorbed: NonNull<BlockHeader>,
    into: NonNull<BlockHeader>,
  ) {
    match self {
      Strategy::NextFit { cursor } => {
        if *cursor == Some(absorbed) {
          *cursor = Some(into);
        }
      }
      Strategy::ExplicitFreeList(list) => {
        list.remove(absorbed);
      }
      Strategy::SegregatedFreeList(lists) => unsafe {
        lists.remove(absorbed);
      },
      Strategy::FirstFit | Strategy::BestFit => {}
    }
  }

  /// Blocks currently held by the free structure, empty for linear modes.
  #[cfg(test)]
  pub fn tracked(&self) -> Box<dyn Iterator<Item = NonNull<BlockHeader>> + '_> {
    match self {
      Strategy::ExplicitFreeList(list) => Box::new(list.iter()),
      Strategy::SegregatedFreeList(lists) => Box::new(lists.iter()),
      Strategy::FirstFit | Strategy::NextFit { .. } | Strategy::BestFit => {
        Box::new(std::iter::empty())
      }
    }
  }
}

/// First block from the head that fits.
///
/// # Safety
///
/// `head` must start a valid chain.
pub(crate) unsafe fn first_fit(
  head: Option<NonNull<BlockHeader>>,
  size: usize,
) -> Option<NonNull<BlockHeader>> {
  unsafe { block::chain(head).find(|candidate| block::fits(*candidate, size)) }
}

/// First block that fits starting at `cursor`, wrapping around to the head
/// once. Without a cursor it behaves like [`first_fit`].
///
/// # Safety
///
/// `head` must start a valid chain that contains `cursor`.
pub(crate) unsafe fn next_fit(
  head: Option<NonNull<BlockHeader>>,
  cursor: Option<NonNull<BlockHeader>>,
  size: usize,
) -> Option<NonNull<BlockHeader>> {
  let start = cursor.or(head)?;

  unsafe {
    block::chain(Some(start))
      .chain(block::chain(head).take_while(|candidate| *candidate != start))
      .find(|candidate| block::fits(*candidate, size))
  }
}

/// Smallest block that fits, the first one on ties.
///
/// # Safety
///
/// `head` must start a valid chain.
pub(crate) unsafe fn best_fit(
  head: Option<NonNull<BlockHeader>>,
  size: usize,
) -> Option<NonNull<BlockHeader>> {
  unsafe {
    block::chain(head)
      .filter(|candidate| block::fits(*candidate, size))
      .min_by_key(|candidate| (*candidate.as_ptr()).size())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::block::{HEADER_SIZE, WORD};

  /// Lays out blocks of the given `(size, used)` back to back in `storage`.
  fn build_chain(
    storage: &mut [usize],
    blocks: &[(usize, bool)],
  ) -> Vec<NonNull<BlockHeader>> {
    let base = storage.as_mut_ptr().cast::<u8>();
    let mut offset = 0;
    let mut headers: Vec<NonNull<BlockHeader>> = Vec::new();

    for &(size, used) in blocks {
      let address = NonNull::new(unsafe { base.add(offset) }).unwrap();
      let header = unsafe { BlockHeader::write(address, BlockHeader::new(size, used, None)) };
      if let Some(previous) = headers.last() {
        unsafe { (*previous.as_ptr()).next = Some(header) };
      }
      headers.push(header);
      offset += HEADER_SIZE + size;
    }

    headers
  }

  #[test]
  fn test_search_mode_from_str() {
    assert_eq!("first-fit".parse::<SearchMode>(), Ok(SearchMode::FirstFit));
    assert_eq!("NextFit".parse::<SearchMode>(), Ok(SearchMode::NextFit));
    assert_eq!("best_fit".parse::<SearchMode>(), Ok(SearchMode::BestFit));
    assert_eq!("free list".parse::<SearchMode>(), Ok(SearchMode::ExplicitFreeList));
    assert_eq!(
      "Segregated-Free-List".parse::<SearchMode>(),
      Ok(SearchMode::SegregatedFreeList)
    );
    assert_eq!(
      "worst-fit".parse::<SearchMode>(),
      Err(AllocError::UnknownSearchMode("worst-fit".to_owned()))
    );

    for mode in SearchMode::ALL {
      assert_eq!(mode.to_string().parse::<SearchMode>(), Ok(mode));
    }
  }

  #[test]
  fn test_first_fit_skips_used_and_small() {
    let mut storage = [0usize; 64];
    let blocks = build_chain(
      &mut storage,
      &[(4 * WORD, true), (WORD, false), (4 * WORD, false), (2 * WORD, false)],
    );

    unsafe {
      assert_eq!(first_fit(Some(blocks[0]), 2 * WORD), Some(blocks[2]));
      assert_eq!(first_fit(Some(blocks[0]), 8 * WORD), None);
      assert_eq!(first_fit(None, WORD), None);
    }
  }

  #[test]
  fn test_best_fit_picks_smallest_then_first() {
    let mut storage = [0usize; 64];
    let blocks = build_chain(
      &mut storage,
      &[(4 * WORD, false), (2 * WORD, false), (2 * WORD, false), (2 * WORD, true)],
    );

    unsafe {
      assert_eq!(best_fit(Some(blocks[0]), 2 * WORD), Some(blocks[1]));
      assert_eq!(best_fit(Some(blocks[0]), 3 * WORD), Some(blocks[0]));
    }
  }

  #[test]
  fn test_next_fit_wraps_once() {
    let mut storage = [0usize; 64];
    let blocks = build_chain(
      &mut storage,
      &[(2 * WORD, false), (2 * WORD, true), (2 * WORD, true), (WORD, false)],
    );

    unsafe {
      // From the third block only the one word block follows, so the scan
      // wraps to the head.
      assert_eq!(next_fit(Some(blocks[0]), Some(blocks[2]), 2 * WORD), Some(blocks[0]));
      assert_eq!(next_fit(Some(blocks[0]), Some(blocks[2]), WORD), Some(blocks[3]));
      assert_eq!(next_fit(Some(blocks[0]), Some(blocks[1]), 4 * WORD), None);
    }
  }

  #[test]
  fn test_next_fit_moves_cursor() {
    let mut storage = [0usize; 64];
    let blocks = build_chain(&mut storage, &[(WORD, false), (WORD, false)]);
    let mut strategy = Strategy::new(SearchMode::NextFit);

    unsafe {
      let found = strategy.find(Some(blocks[0]), WORD).unwrap();
      assert_eq!(found, blocks[0]);
      (*found.as_ptr()).set_used(true);

      assert_eq!(strategy.find(Some(blocks[0]), WORD), Some(blocks[1]));

      strategy.absorb(blocks[1], blocks[0]);
    }

    assert!(matches!(strategy, Strategy::NextFit { cursor: Some(c) } if c == blocks[0]));
  }
}
