use bytemuck::{Pod, Zeroable};
use gpuwire_alloc::align_up;

use crate::WireError;

/// Every record size and trailing payload is padded to this many bytes.
pub const WIRE_ALIGNMENT: usize = 8;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CmdHeader {
    pub command_id: u32,
    /// Whole record size including this header and padded trailing data.
    pub size_bytes: u32,
}

impl CmdHeader {
    pub const SIZE_BYTES: usize = 8;
}

/// One complete, framed record borrowed from a receive buffer.
#[derive(Clone, Copy, Debug)]
pub struct RawRecord<'a> {
    header: CmdHeader,
    bytes: &'a [u8],
}

impl<'a> RawRecord<'a> {
    /// Frame the record at the start of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` does not yet hold the whole record. A header whose size is
    /// impossible or larger than `max_size` is fatal.
    pub fn parse(buf: &'a [u8], max_size: usize) -> Result<Option<Self>, WireError> {
        let Some(header_bytes) = buf.get(..CmdHeader::SIZE_BYTES) else {
            return Ok(None);
        };
        let header: CmdHeader = bytemuck::pod_read_unaligned(header_bytes);
        let size = header.size_bytes as usize;
        if size < CmdHeader::SIZE_BYTES || size % WIRE_ALIGNMENT != 0 {
            return Err(WireError::BadRecordSize {
                command_id: header.command_id,
                size_bytes: header.size_bytes,
            });
        }
        if size > max_size {
            return Err(WireError::RecordTooLarge {
                command_id: header.command_id,
                size_bytes: size,
                max: max_size,
            });
        }
        Ok(buf.get(..size).map(|bytes| RawRecord { header, bytes }))
    }

    pub fn header(&self) -> CmdHeader {
        self.header
    }

    pub fn command_id(&self) -> u32 {
        self.header.command_id
    }

    /// Record size in bytes, equal to `header().size_bytes`.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Copy out the fixed transfer struct at the start of the record.
    pub(crate) fn fixed<T: Pod>(&self, command: &'static str) -> Result<T, WireError> {
        let size = std::mem::size_of::<T>();
        let bytes = self.bytes.get(..size).ok_or(WireError::RecordSizeMismatch {
            command,
            size_bytes: self.len(),
            expected: size,
        })?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    /// Copy out a fixed transfer struct for a command that carries no trailing data.
    pub(crate) fn fixed_exact<T: Pod>(&self, command: &'static str) -> Result<T, WireError> {
        let expected = std::mem::size_of::<T>();
        if self.len() != expected {
            return Err(WireError::RecordSizeMismatch {
                command,
                size_bytes: self.len(),
                expected,
            });
        }
        self.fixed(command)
    }

    /// Trailing array of `declared` bytes after a `fixed_size`-byte struct.
    ///
    /// The record must be exactly the fixed struct plus the padded array.
    pub(crate) fn trailing(
        &self,
        command: &'static str,
        fixed_size: usize,
        declared: u64,
    ) -> Result<&'a [u8], WireError> {
        let available = self.len().saturating_sub(fixed_size);
        let len = usize::try_from(declared)
            .ok()
            .filter(|&len| len <= available)
            .ok_or(WireError::TrailingOverrun {
                command,
                declared,
                available,
            })?;
        let expected = fixed_size + align_up(len, WIRE_ALIGNMENT);
        if expected != self.len() {
            return Err(WireError::RecordSizeMismatch {
                command,
                size_bytes: self.len(),
                expected,
            });
        }
        Ok(&self.bytes[fixed_size..fixed_size + len])
    }

    pub(crate) fn trailing_str(
        &self,
        command: &'static str,
        fixed_size: usize,
        declared: u64,
    ) -> Result<&'a str, WireError> {
        let bytes = self.trailing(command, fixed_size, declared)?;
        std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8 { command })
    }
}
