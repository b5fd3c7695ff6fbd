//! Client half of the gpuwire protocol.
//!
//! [`Client`] turns API calls into command records and hands out object ids eagerly, so callers
//! get a usable handle before the server has seen the create command. Asynchronous results come
//! back as return commands through [`Client::handle_commands`] and are matched to pending
//! requests by `{handle, request_serial}`; anything that no longer matches is dropped.

mod buffer;
mod client;
mod device;
mod objects;
mod queue;
mod returns;

use gpuwire_protocol::{ObjectHandle, ObjectType, WireError};

pub use buffer::MapCallback;
pub use client::Client;
pub use device::{
    DeviceLostCallback, LoggingCallback, PopErrorScopeCallback, UncapturedErrorCallback,
};
pub use objects::{ObjectAllocator, Release};
pub use queue::WorkDoneCallback;

/// Typed id of a client object.
pub trait ClientObject: Copy {
    const TYPE: ObjectType;

    fn handle(self) -> ObjectHandle;
}

macro_rules! object_ids {
    ($($(#[$meta:meta])* $name:ident => $object_type:ident,)+) => {$(
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(pub(crate) ObjectHandle);

        impl $name {
            pub fn handle(self) -> ObjectHandle {
                self.0
            }
        }

        impl ClientObject for $name {
            const TYPE: ObjectType = ObjectType::$object_type;

            fn handle(self) -> ObjectHandle {
                self.0
            }
        }
    )+};
}

object_ids! {
    DeviceId => Device,
    BufferId => Buffer,
    TextureId => Texture,
    ShaderModuleId => ShaderModule,
    /// Each `get_queue` call yields a distinct queue object.
    QueueId => Queue,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("{object_type:?} {handle} is not a live client object")]
    UnknownObject {
        object_type: ObjectType,
        handle: ObjectHandle,
    },
    #[error("{object_type:?} ids are exhausted")]
    IdsExhausted { object_type: ObjectType },
    #[error("buffer {buffer} is not mapped")]
    NotMapped { buffer: ObjectHandle },
    #[error("buffer {buffer} is mapped for reading")]
    ReadOnlyMapping { buffer: ObjectHandle },
}
