//! Append-only command storage shared by both ends of the wire.
//!
//! Producers append tagged records into a [`CommandAllocator`]. Once a batch is complete the
//! blocks are moved out with [`CommandAllocator::acquire_blocks`] and walked with a
//! [`CommandIterator`]. Every record is preceded by a 4-byte tag; each block ends with
//! [`END_OF_BLOCK`] so readers know when to advance, and trailing payloads are marked with
//! [`ADDITIONAL_DATA`].

mod allocator;
mod iterator;

pub use allocator::{AllocError, CommandAllocator, CommandBlock, CommandBlocks};
pub use iterator::{CommandIterator, IterError};

/// Sentinel tag written after the last record of every block.
pub const END_OF_BLOCK: u32 = u32::MAX;

/// Tag that precedes trailing data allocated with [`CommandAllocator::allocate_data`].
pub const ADDITIONAL_DATA: u32 = u32::MAX - 1;

/// Largest record alignment supported. Blocks are backed by `u64` storage.
pub const MAX_ALIGNMENT: usize = 8;

/// Size the allocator starts growing from after a reset.
pub const DEFAULT_BASE_BLOCK_SIZE: usize = 2048;

/// Cap on exponential block growth. A single larger record still gets a block of its own size.
pub const MAX_BLOCK_GROWTH: usize = 16 * 1024;

pub(crate) const TAG_SIZE: usize = 4;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0. Saturates instead of overflowing.
pub fn align_up(value: usize, alignment: usize) -> usize {
    debug_assert!(alignment > 0);

    match checked_align_up(value, alignment) {
        Some(v) => v,
        None => usize::MAX / alignment * alignment,
    }
}

pub(crate) fn checked_align_up(value: usize, alignment: usize) -> Option<usize> {
    Some(value.checked_add(alignment - 1)? / alignment * alignment)
}
