//! Large-record chunking.
//!
//! A record that does not fit in one transport message is split into `ChunkedCommand` records.
//! Each declares the total size of the original record; the receiver appends chunk payloads
//! until the total is reached and then decodes the reassembled bytes as one record.

use bytemuck::{Pod, Zeroable};
use gpuwire_alloc::{align_up, AllocError};

use crate::record::{CmdHeader, RawRecord};
use crate::{Transport, WireError, WIRE_ALIGNMENT};

/// Reserved in both directions' id spaces.
pub const CHUNKED_COMMAND_ID: u32 = 0xFFFF_FF00;

/// Followed by `chunk_len` payload bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ChunkedCommandCmd {
    pub hdr: CmdHeader,
    pub total_size: u64,
    pub chunk_len: u32,
    pub reserved0: u32,
}

impl ChunkedCommandCmd {
    pub const SIZE_BYTES: usize = core::mem::size_of::<Self>();
}

pub(crate) fn decode_chunk(record: RawRecord<'_>) -> Result<(u64, &[u8]), WireError> {
    const NAME: &str = "ChunkedCommand";
    let c: ChunkedCommandCmd = record.fixed(NAME)?;
    let data = record.trailing(NAME, ChunkedCommandCmd::SIZE_BYTES, u64::from(c.chunk_len))?;
    Ok((c.total_size, data))
}

/// Send the concatenation of `pieces` as chunk messages of at most `payload_max` payload bytes.
///
/// `scratch` is reused for each outgoing message. Returns the number of messages sent.
pub(crate) fn send_chunked(
    pieces: &[&[u8]],
    payload_max: usize,
    transport: &mut dyn Transport,
    scratch: &mut Vec<u8>,
) -> Result<usize, WireError> {
    let total: usize = pieces.iter().map(|p| p.len()).sum();
    let mut remaining = total;
    let mut piece = 0;
    let mut offset = 0;
    let mut sent = 0;

    while remaining > 0 {
        let chunk_len = remaining.min(payload_max);
        let padded = align_up(chunk_len, WIRE_ALIGNMENT);
        let header = ChunkedCommandCmd {
            hdr: CmdHeader {
                command_id: CHUNKED_COMMAND_ID,
                size_bytes: (ChunkedCommandCmd::SIZE_BYTES + padded) as u32,
            },
            total_size: total as u64,
            chunk_len: chunk_len as u32,
            reserved0: 0,
        };
        scratch.clear();
        scratch.extend_from_slice(bytemuck::bytes_of(&header));

        let mut need = chunk_len;
        while need > 0 {
            let Some(src) = pieces.get(piece) else {
                break;
            };
            let take = (src.len() - offset).min(need);
            scratch.extend_from_slice(&src[offset..offset + take]);
            offset += take;
            need -= take;
            if offset == src.len() {
                piece += 1;
                offset = 0;
            }
        }
        scratch.resize(ChunkedCommandCmd::SIZE_BYTES + padded, 0);

        transport.send(scratch)?;
        sent += 1;
        remaining -= chunk_len;
    }

    tracing::trace!(total, messages = sent, "sent chunked record");
    Ok(sent)
}

/// Reassembles one chunked record at a time.
#[derive(Debug)]
pub struct ChunkAccumulator {
    max_total: usize,
    expected: usize,
    buffer: Vec<u8>,
}

impl ChunkAccumulator {
    pub fn new(max_total: usize) -> Self {
        Self {
            max_total,
            expected: 0,
            buffer: Vec::new(),
        }
    }

    pub fn in_progress(&self) -> bool {
        self.expected != 0
    }

    /// Payload bytes received for the record being assembled.
    pub fn received(&self) -> usize {
        self.buffer.len()
    }

    /// Append one chunk. Returns the whole record once `total_size` bytes have arrived.
    pub fn push(&mut self, total_size: u64, chunk: &[u8]) -> Result<Option<Vec<u8>>, WireError> {
        let total = usize::try_from(total_size)
            .ok()
            .filter(|&t| t > 0 && t <= self.max_total)
            .ok_or(WireError::ChunkedCommandSize {
                total_size,
                max: self.max_total,
            })?;

        if self.expected == 0 {
            self.buffer.clear();
            self.buffer
                .try_reserve_exact(total)
                .map_err(|_| AllocError::OutOfMemory { requested: total })?;
            self.expected = total;
        } else if total != self.expected {
            return Err(WireError::ChunkTotalMismatch {
                expected: self.expected,
                declared: total,
            });
        }

        let received = self.buffer.len() + chunk.len();
        if received > total {
            return Err(WireError::ChunkOverflow { total, received });
        }
        self.buffer.extend_from_slice(chunk);
        if received < total {
            return Ok(None);
        }

        self.expected = 0;
        Ok(Some(std::mem::take(&mut self.buffer)))
    }

    /// Drop any partially assembled record.
    pub fn reset(&mut self) {
        self.expected = 0;
        self.buffer.clear();
    }
}
