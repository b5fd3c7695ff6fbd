use std::fmt;

use bytemuck::Pod;

use crate::{
    checked_align_up, ADDITIONAL_DATA, DEFAULT_BASE_BLOCK_SIZE, END_OF_BLOCK, MAX_ALIGNMENT,
    MAX_BLOCK_GROWTH, TAG_SIZE,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("failed to allocate a {requested}-byte command block")]
    OutOfMemory { requested: usize },
    #[error("record of {size} bytes overflows the address space")]
    SizeOverflow { size: usize },
    #[error("alignment {alignment} is not a power of two <= 8")]
    UnsupportedAlignment { alignment: usize },
    #[error("tag 0x{tag:08X} is reserved by the allocator")]
    ReservedTag { tag: u32 },
}

/// One fixed-size, 8-byte aligned storage block.
pub struct CommandBlock {
    words: Box<[u64]>,
}

impl CommandBlock {
    fn new(size: usize) -> Result<Self, AllocError> {
        let words = size / 8;
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(words)
            .map_err(|_| AllocError::OutOfMemory { requested: size })?;
        storage.resize(words, 0u64);
        Ok(Self {
            words: storage.into_boxed_slice(),
        })
    }

    /// Size of the block in bytes.
    pub fn len(&self) -> usize {
        self.words.len() * 8
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }
}

impl fmt::Debug for CommandBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBlock")
            .field("len", &self.len())
            .finish()
    }
}

/// Sealed blocks moved out of an allocator, ready to be walked by a
/// [`crate::CommandIterator`].
#[derive(Debug, Default)]
pub struct CommandBlocks {
    pub(crate) blocks: Vec<CommandBlock>,
}

impl CommandBlocks {
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total capacity of all blocks in bytes.
    pub fn total_bytes(&self) -> usize {
        self.blocks.iter().map(CommandBlock::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CommandBlock> {
        self.blocks.iter()
    }
}

/// Growing, append-only storage for tagged command records.
///
/// Records never move once written and never straddle blocks. The allocator owns its blocks
/// until [`CommandAllocator::acquire_blocks`] hands them to a consumer.
pub struct CommandAllocator {
    blocks: Vec<CommandBlock>,
    cursor: usize,
    last_block_size: usize,
}

impl Default for CommandAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandAllocator {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            cursor: 0,
            last_block_size: DEFAULT_BASE_BLOCK_SIZE,
        }
    }

    /// True when nothing has been allocated since construction or the last reset.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of blocks currently owned.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Reserve `size` bytes for a record tagged `tag`.
    ///
    /// The returned slice is zeroed only if the block is fresh; callers overwrite all of it.
    pub fn allocate(
        &mut self,
        tag: u32,
        size: usize,
        alignment: usize,
    ) -> Result<&mut [u8], AllocError> {
        if tag >= ADDITIONAL_DATA {
            return Err(AllocError::ReservedTag { tag });
        }
        self.allocate_tagged(tag, size, alignment)
    }

    /// Reserve trailing data for the record allocated just before.
    pub fn allocate_data(&mut self, size: usize, alignment: usize) -> Result<&mut [u8], AllocError> {
        self.allocate_tagged(ADDITIONAL_DATA, size, alignment)
    }

    /// Copy a `Pod` record into the allocator under `tag`.
    pub fn push<T: Pod>(&mut self, tag: u32, record: &T) -> Result<(), AllocError> {
        let bytes = bytemuck::bytes_of(record);
        let dst = self.allocate(tag, bytes.len(), std::mem::align_of::<T>())?;
        dst.copy_from_slice(bytes);
        Ok(())
    }

    /// Copy trailing bytes into the allocator.
    pub fn push_data(&mut self, data: &[u8], alignment: usize) -> Result<(), AllocError> {
        let dst = self.allocate_data(data.len(), alignment)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Seal the current block and move every block out, leaving the allocator empty.
    pub fn acquire_blocks(&mut self) -> CommandBlocks {
        self.seal();
        let blocks = std::mem::take(&mut self.blocks);
        self.cursor = 0;
        self.last_block_size = DEFAULT_BASE_BLOCK_SIZE;
        CommandBlocks { blocks }
    }

    /// Drop every record and return to the empty state.
    pub fn reset(&mut self) {
        self.blocks.clear();
        self.cursor = 0;
        self.last_block_size = DEFAULT_BASE_BLOCK_SIZE;
    }

    fn allocate_tagged(
        &mut self,
        tag: u32,
        size: usize,
        alignment: usize,
    ) -> Result<&mut [u8], AllocError> {
        if !alignment.is_power_of_two() || alignment > MAX_ALIGNMENT {
            return Err(AllocError::UnsupportedAlignment { alignment });
        }

        let (tag_offset, record_offset) = match self.fit(size, alignment) {
            Some(offsets) => offsets,
            None => {
                self.grow(size)?;
                self.fit(size, alignment)
                    .ok_or(AllocError::SizeOverflow { size })?
            }
        };

        let end = record_offset + size;
        self.cursor = end;
        let block = self
            .blocks
            .last_mut()
            .ok_or(AllocError::SizeOverflow { size })?
            .as_bytes_mut();
        block[tag_offset..tag_offset + TAG_SIZE].copy_from_slice(&tag.to_ne_bytes());
        Ok(&mut block[record_offset..end])
    }

    /// Offsets of the tag and record if `size` bytes fit in the current block while still
    /// leaving room for the end-of-block sentinel.
    fn fit(&self, size: usize, alignment: usize) -> Option<(usize, usize)> {
        let block = self.blocks.last()?;
        let tag_offset = checked_align_up(self.cursor, TAG_SIZE)?;
        let record_offset = checked_align_up(tag_offset.checked_add(TAG_SIZE)?, alignment)?;
        let end = record_offset.checked_add(size)?;
        let sentinel_end = checked_align_up(end, TAG_SIZE)?.checked_add(TAG_SIZE)?;
        (sentinel_end <= block.len()).then_some((tag_offset, record_offset))
    }

    fn grow(&mut self, size: usize) -> Result<(), AllocError> {
        // Tag, worst-case alignment padding, record, sentinel padding and sentinel.
        let required = size
            .checked_add(4 * TAG_SIZE)
            .and_then(|v| checked_align_up(v, MAX_ALIGNMENT))
            .ok_or(AllocError::SizeOverflow { size })?;
        let block_size =
            required.max(self.last_block_size.saturating_mul(2).min(MAX_BLOCK_GROWTH));

        let block = CommandBlock::new(block_size)?;
        self.seal();
        self.blocks.push(block);
        self.cursor = 0;
        self.last_block_size = block_size;
        Ok(())
    }

    fn seal(&mut self) {
        let offset = crate::align_up(self.cursor, TAG_SIZE);
        if let Some(block) = self.blocks.last_mut() {
            if let Some(dst) = block.as_bytes_mut().get_mut(offset..offset + TAG_SIZE) {
                dst.copy_from_slice(&END_OF_BLOCK.to_ne_bytes());
            }
        }
    }
}

impl fmt::Debug for CommandAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandAllocator")
            .field("blocks", &self.blocks.len())
            .field("cursor", &self.cursor)
            .field("last_block_size", &self.last_block_size)
            .finish()
    }
}
