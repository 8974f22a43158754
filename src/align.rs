/// Rounds the given size up to the nearest multiple of the machine word.
///
/// # Examples
///
/// ```rust
/// use blockalloc::align;
///
/// match std::mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + ::core::mem::size_of::<usize>() - 1) & !(::core::mem::size_of::<usize>() - 1)
  };
}

/// Function form of [`align!`], usable in const contexts.
///
/// The caller keeps `size` below `usize::MAX - WORD`; every call site in this
/// crate bounds requests by `isize::MAX` first.
#[inline]
pub const fn align(size: usize) -> usize {
  align!(size)
}
