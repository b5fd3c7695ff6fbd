use std::fmt;

use gpuwire_alloc::{AllocError, IterError};

use crate::{ObjectHandle, ObjectType, TransportError};

/// Why a server-side slot could not be allocated for a created object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFailure {
    /// The id is currently bound to a live object.
    AlreadyLive,
    /// The id skips past the end of the table.
    IdOutOfRange,
    /// The generation does not advance past the slot's previous generation.
    StaleGeneration,
}

impl fmt::Display for AllocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocationFailure::AlreadyLive => write!(f, "id is already live"),
            AllocationFailure::IdOutOfRange => write!(f, "id is out of range"),
            AllocationFailure::StaleGeneration => write!(f, "generation did not increase"),
        }
    }
}

/// Stream-corrupting protocol failure.
///
/// Any `WireError` aborts decoding of the rest of the stream; the session that reported it must
/// be torn down. Stale object references are not errors and never produce one.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown command id 0x{id:08X}")]
    UnknownCommand { id: u32 },
    #[error("record 0x{command_id:08X} has invalid size {size_bytes}")]
    BadRecordSize { command_id: u32, size_bytes: u32 },
    #[error("record 0x{command_id:08X} of {size_bytes} bytes exceeds the {max}-byte limit")]
    RecordTooLarge {
        command_id: u32,
        size_bytes: usize,
        max: usize,
    },
    #[error("{command}: record is {size_bytes} bytes, expected {expected}")]
    RecordSizeMismatch {
        command: &'static str,
        size_bytes: usize,
        expected: usize,
    },
    #[error("{command}: declared trailing length {declared} overruns the {available} bytes available")]
    TrailingOverrun {
        command: &'static str,
        declared: u64,
        available: usize,
    },
    #[error("{command}: invalid {field} value {value}")]
    InvalidEnum {
        command: &'static str,
        field: &'static str,
        value: u32,
    },
    #[error("{command}: trailing string is not valid UTF-8")]
    InvalidUtf8 { command: &'static str },
    #[error("{command}: null {object_type:?} handle")]
    NullHandle {
        command: &'static str,
        object_type: ObjectType,
    },
    #[error("cannot allocate {object_type:?} {handle}: {reason}")]
    ObjectAllocation {
        object_type: ObjectType,
        handle: ObjectHandle,
        reason: AllocationFailure,
    },
    #[error("chunked command declares {total_size} bytes (limit {max})")]
    ChunkedCommandSize { total_size: u64, max: usize },
    #[error("chunk declares a total of {declared} bytes while {expected} are being assembled")]
    ChunkTotalMismatch { expected: usize, declared: usize },
    #[error("chunks overflow the declared total of {total} bytes ({received} received)")]
    ChunkOverflow { total: usize, received: usize },
    #[error("record 0x{command_id:08X} arrived while a chunked command was incomplete")]
    InterleavedChunk { command_id: u32 },
    #[error("reassembled chunked command is not exactly one record")]
    MalformedChunkedCommand,
    #[error("stream ended with {buffered} bytes of an incomplete record")]
    TruncatedStream { buffered: usize },
    #[error("{command}: {reason}")]
    Protocol {
        command: &'static str,
        reason: &'static str,
    },
    #[error(transparent)]
    Alloc(#[from] AllocError),
    #[error("command iterator: {0}")]
    Iter(#[from] IterError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("invalid wire limits: {0}")]
    InvalidLimits(&'static str),
    #[error("stream corrupted by an earlier fatal error")]
    StreamCorrupted,
}
