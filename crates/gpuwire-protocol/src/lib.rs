//! Binary record format shared by the gpuwire client and server.
//!
//! Every record is an 8-byte [`CmdHeader`] `{command_id, size_bytes}` followed by the rest of a
//! command-specific `#[repr(C)]` transfer struct and an optional zero-padded trailing byte array.
//! `size_bytes` covers the whole record and is always a multiple of [`WIRE_ALIGNMENT`]. Fields
//! use native endianness; both ends are expected to run on the same host.
//!
//! Client-to-server records decode into [`Command`], server-to-client records into
//! [`ReturnCommand`]. Decoding goes through the declarative tables in [`schema`].

/// Declares a `u32`-backed wire enum with [`WireEnum`] conversions.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident ($field:literal) {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $crate::WireEnum for $name {
            const FIELD: &'static str = $field;

            fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            fn to_u32(self) -> u32 {
                self as u32
            }
        }
    };
}

mod chunk;
mod cmd;
mod config;
mod error;
mod handle;
mod record;
mod ret;
pub mod schema;
mod serializer;
mod stream;
mod transport;
mod types;

pub use chunk::{ChunkAccumulator, ChunkedCommandCmd, CHUNKED_COMMAND_ID};
pub use cmd::*;
pub use config::{WireLimits, MIN_MESSAGE_SIZE};
pub use error::{AllocationFailure, WireError};
pub use handle::{ObjectHandle, ObjectId, ObjectType, BOOTSTRAP_DEVICE};
pub use record::{CmdHeader, RawRecord, WIRE_ALIGNMENT};
pub use ret::*;
pub use schema::{Decoded, Direction, ObjectResolver, Resolution};
pub use serializer::{CommandSerializer, WireRecord};
pub use stream::{DecodeProgress, StreamDecoder};
pub use transport::{MemoryTransport, Transport, TransportError};
pub use types::*;

/// Conversion between a wire `u32` and a Rust enum.
pub trait WireEnum: Copy + Sized {
    /// Field name used in decode errors.
    const FIELD: &'static str;

    fn from_u32(value: u32) -> Option<Self>;
    fn to_u32(self) -> u32;
}

pub(crate) fn decode_enum<E: WireEnum>(command: &'static str, value: u32) -> Result<E, WireError> {
    E::from_u32(value).ok_or(WireError::InvalidEnum {
        command,
        field: E::FIELD,
        value,
    })
}
