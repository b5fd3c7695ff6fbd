use bytemuck::Pod;

use crate::allocator::{CommandBlock, CommandBlocks};
use crate::{align_up, ADDITIONAL_DATA, END_OF_BLOCK, TAG_SIZE};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IterError {
    #[error("no more records")]
    Exhausted,
    #[error("record of {size} bytes at offset {offset} overruns a {block_len}-byte block")]
    Overrun {
        offset: usize,
        size: usize,
        block_len: usize,
    },
    #[error("expected trailing data, found tag 0x{tag:08X}")]
    UnexpectedTag { tag: u32 },
}

/// Walks the records of one or more acquired block lists in allocation order.
///
/// The caller reads a tag with [`CommandIterator::next_tag`], then the fixed record for that tag
/// and any trailing data it knows the record carries. Dropping an iterator before
/// [`CommandIterator::next_tag`] has returned `None` is a bug unless
/// [`CommandIterator::mark_consumed`] was called.
pub struct CommandIterator {
    lists: Vec<CommandBlocks>,
    list: usize,
    block: usize,
    cursor: usize,
    consumed: bool,
}

impl CommandIterator {
    pub fn new(blocks: CommandBlocks) -> Self {
        Self::from_lists(vec![blocks])
    }

    pub fn from_lists(lists: Vec<CommandBlocks>) -> Self {
        let lists: Vec<CommandBlocks> = lists.into_iter().filter(|l| !l.is_empty()).collect();
        let consumed = lists.is_empty();
        Self {
            lists,
            list: 0,
            block: 0,
            cursor: 0,
            consumed,
        }
    }

    /// True if there are no blocks at all.
    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Next record tag, skipping block boundaries. `None` once every block has been walked.
    pub fn next_tag(&mut self) -> Option<u32> {
        loop {
            let Some(block) = self.current() else {
                self.consumed = true;
                return None;
            };
            let offset = align_up(self.cursor, TAG_SIZE);
            let tag = block
                .as_bytes()
                .get(offset..offset + TAG_SIZE)
                .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .unwrap_or(END_OF_BLOCK);
            if tag == END_OF_BLOCK {
                self.advance_block();
                continue;
            }
            self.cursor = offset + TAG_SIZE;
            return Some(tag);
        }
    }

    /// Fixed-size record that follows the tag just read.
    pub fn next_record(&mut self, size: usize, alignment: usize) -> Result<&[u8], IterError> {
        let offset = align_up(self.cursor, alignment.max(1));
        let block_len = self.current().ok_or(IterError::Exhausted)?.len();
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= block_len)
            .ok_or(IterError::Overrun {
                offset,
                size,
                block_len,
            })?;
        self.cursor = end;
        let block = self.current().ok_or(IterError::Exhausted)?;
        Ok(&block.as_bytes()[offset..end])
    }

    pub fn next_record_pod<T: Pod>(&mut self) -> Result<T, IterError> {
        let bytes = self.next_record(std::mem::size_of::<T>(), std::mem::align_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Trailing data allocated right after the current record.
    pub fn next_data(&mut self, size: usize, alignment: usize) -> Result<&[u8], IterError> {
        match self.next_tag() {
            Some(ADDITIONAL_DATA) => self.next_record(size, alignment),
            Some(tag) => Err(IterError::UnexpectedTag { tag }),
            None => Err(IterError::Exhausted),
        }
    }

    /// Rewind to the first record.
    pub fn reset(&mut self) {
        self.list = 0;
        self.block = 0;
        self.cursor = 0;
        self.consumed = self.lists.is_empty();
    }

    /// Allow the iterator to be dropped without walking to the end.
    pub fn mark_consumed(&mut self) {
        self.consumed = true;
    }

    fn current(&self) -> Option<&CommandBlock> {
        self.lists.get(self.list)?.blocks.get(self.block)
    }

    fn advance_block(&mut self) {
        self.cursor = 0;
        self.block += 1;
        let list_len = self.lists.get(self.list).map_or(0, CommandBlocks::len);
        if self.block >= list_len {
            self.block = 0;
            self.list += 1;
        }
    }
}

impl Drop for CommandIterator {
    fn drop(&mut self) {
        debug_assert!(
            self.consumed || std::thread::panicking(),
            "CommandIterator dropped with unconsumed records"
        );
    }
}
