use std::{io::Read, ptr::NonNull};

use blockalloc::{
  AllocResult, BlockHeap, BreakProvider, ChunkPool, HeapConfig, ObjectPool, SearchMode, TypedPool,
};
use tracing_subscriber::EnvFilter;

/// Waits until the user presses ENTER when the demo runs with `--step`.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` between steps.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    BreakProvider::program_break(),
  );
}

fn print_blocks<P: blockalloc::MemoryProvider>(heap: &BlockHeap<P>) {
  for block in heap.blocks() {
    println!(
      "    {:?} size = {:>5} {}",
      block.address,
      block.size,
      if block.used { "used" } else { "free" }
    );
  }
}

fn main() -> AllocResult<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
    .init();

  let step = std::env::args().any(|arg| arg == "--step");
  let mode = std::env::args()
    .skip(1)
    .find(|arg| !arg.starts_with("--"))
    .map(|arg| arg.parse::<SearchMode>())
    .transpose()?
    .unwrap_or_default();

  let mut heap = BlockHeap::with_provider(
    BreakProvider::new(),
    HeapConfig::default().with_search_mode(mode),
  );
  println!("search mode: {mode}");

  print_program_break("start");
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 1) A u32 still takes a whole word.
  // --------------------------------------------------------------------
  let first = heap.allocate(4)?;
  unsafe { first.cast::<u32>().as_ptr().write(0xDEADBEEF) };
  println!("\n[1] Allocate u32 at {:?}, block size = {}", first, unsafe {
    heap.block_info(first).size
  });
  print_program_break("after u32");
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 2) Odd sized request, rounded up to the word.
  // --------------------------------------------------------------------
  let second = heap.allocate(12)?;
  unsafe { std::ptr::write_bytes(second.as_ptr(), 0xAB, 12) };
  println!("\n[2] Allocate [u8; 12] at {:?}, block size = {}", second, unsafe {
    heap.block_info(second).size
  });
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 3) A larger block that will be split once it is free.
  // --------------------------------------------------------------------
  let third = heap.allocate(256)?;
  let _guard = heap.allocate(8)?;
  println!("\n[3] Allocate 256 bytes at {:?}", third);
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 4) Free it and ask for less: the block is reused and split.
  // --------------------------------------------------------------------
  unsafe { heap.free(third) };
  let fourth = heap.allocate(32)?;
  println!(
    "\n[4] Allocate 32 bytes: {}",
    if fourth == third {
      "reused and split the freed block"
    } else {
      "allocated somewhere else"
    }
  );
  print_blocks(&heap);
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 5) Free the first two blocks: the first one absorbs the second.
  // --------------------------------------------------------------------
  unsafe {
    heap.free(second);
    heap.free(first);
  }
  println!("\n[5] Freed the first two blocks");
  print_blocks(&heap);
  println!("    {:?}", heap.stats());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 6) Chunk pool carved out of the heap.
  // --------------------------------------------------------------------
  {
    let mut pool = ChunkPool::with_provider(&mut heap, 16, 8)?;
    let chunks: Vec<NonNull<u8>> = (0..10)
      .map(|_| pool.allocate())
      .collect::<AllocResult<_>>()?;
    println!(
      "\n[6] {} chunks of {} bytes from {} pool blocks, first at {:?}",
      chunks.len(),
      pool.chunk_size(),
      pool.blocks(),
      chunks[0]
    );
  }
  print_blocks(&heap);

  let mut points = TypedPool::<(u32, u32)>::new(8)?;
  let point = points.insert((3, 4))?;
  println!("    point {:?} stored at {:?}", unsafe { *point.as_ptr() }, point);
  let (x, y) = unsafe { points.remove(point) };
  println!("    removed point ({x}, {y}), {} chunks free", points.chunks().free_chunks());
  block_until_enter_pressed(step);

  // --------------------------------------------------------------------
  // 7) Thread safe object pool shared by a few workers.
  // --------------------------------------------------------------------
  let pool = ObjectPool::new(16, 16)?;
  std::thread::scope(|scope| {
    for worker in 0..4 {
      let pool = &pool;
      scope.spawn(move || match pool.allocate() {
        Ok(slot) => {
          println!("[7] worker {worker} got slot {:?}", pool.slot_index(slot));
          if let Err(error) = pool.deallocate(slot) {
            println!("[7] worker {worker} could not return its slot: {error}");
          }
        }
        Err(error) => println!("[7] worker {worker}: {error}"),
      });
    }
  });
  println!("[7] free slots after workers: {}", pool.available());

  // A second free of the same slot is caught and reported.
  let slot = pool.allocate()?;
  pool.deallocate(slot)?;
  if let Err(error) = pool.deallocate(slot) {
    println!("[7] second free rejected: {error}");
  }

  print_program_break("end");
  println!("\n[8] End of example. Process will exit and the OS will reclaim all memory.");

  Ok(())
}
