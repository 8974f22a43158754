use thiserror::Error;

/// Result of every fallible allocator operation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Allocation failures. All of them are recoverable: nothing in this crate
/// aborts when memory runs out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
  /// The provider is exhausted and no free block fits the request.
  #[error("out of memory: requested {requested} bytes")]
  OutOfMemory { requested: usize },

  /// A fixed-size pool has no free slot or chunk left.
  #[error("pool exhausted")]
  PoolExhausted,

  /// The address does not belong to the pool or is not on a slot boundary.
  #[error("invalid free of address 0x{address:x}")]
  InvalidFree { address: usize },

  #[error("double free of slot {index} at address 0x{address:x}")]
  DoubleFree { address: usize, index: usize },

  #[error("invalid configuration: {0}")]
  InvalidConfig(&'static str),

  #[error("failed to map {capacity} bytes of anonymous memory")]
  MapFailed { capacity: usize },

  #[error("unknown search mode: {0}")]
  UnknownSearchMode(String),
}
