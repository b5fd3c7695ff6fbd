//! Declarative command tables.
//!
//! Each direction has one table listing, per command id, the fixed transfer struct size, whether
//! a trailing array follows, the object type a create command produces, and the decode function.
//! The serializer walks records by looking up fixed sizes here, and [`Command::decode`] /
//! [`ReturnCommand::decode`] dispatch through the `decode` entries.

use std::mem::size_of;

use crate::cmd::{self, *};
use crate::record::RawRecord;
use crate::ret::{self, *};
use crate::{Command, ObjectHandle, ObjectType, ReturnCommand, WireError};

/// Which way records flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

pub type CommandDecodeFn = for<'a> fn(RawRecord<'a>) -> Result<Command<'a>, WireError>;
pub type ReturnDecodeFn = for<'a> fn(RawRecord<'a>) -> Result<ReturnCommand<'a>, WireError>;

#[derive(Clone, Copy)]
pub struct CommandSpec<D> {
    pub id: u32,
    pub name: &'static str,
    /// Size of the transfer struct, header included.
    pub fixed_size: usize,
    pub has_trailing: bool,
    /// Object type allocated by a create command.
    pub creates: Option<ObjectType>,
    pub decode: D,
}

impl<D> std::fmt::Debug for CommandSpec<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSpec")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fixed_size", &self.fixed_size)
            .field("has_trailing", &self.has_trailing)
            .field("creates", &self.creates)
            .finish()
    }
}

const fn cmd_spec(
    id: WireCmd,
    name: &'static str,
    fixed_size: usize,
    has_trailing: bool,
    creates: Option<ObjectType>,
    decode: CommandDecodeFn,
) -> CommandSpec<CommandDecodeFn> {
    CommandSpec {
        id: id as u32,
        name,
        fixed_size,
        has_trailing,
        creates,
        decode,
    }
}

const fn ret_spec(
    id: ReturnWireCmd,
    name: &'static str,
    fixed_size: usize,
    has_trailing: bool,
    decode: ReturnDecodeFn,
) -> CommandSpec<ReturnDecodeFn> {
    CommandSpec {
        id: id as u32,
        name,
        fixed_size,
        has_trailing,
        creates: None,
        decode,
    }
}

/// Client-to-server commands, indexed by `id - 1`.
pub static COMMAND_SCHEMA: [CommandSpec<CommandDecodeFn>; 15] = [
    cmd_spec(
        WireCmd::DeviceCreateBuffer,
        "DeviceCreateBuffer",
        size_of::<DeviceCreateBufferCmd>(),
        false,
        Some(ObjectType::Buffer),
        cmd::decode_device_create_buffer,
    ),
    cmd_spec(
        WireCmd::DeviceCreateTexture,
        "DeviceCreateTexture",
        size_of::<DeviceCreateTextureCmd>(),
        false,
        Some(ObjectType::Texture),
        cmd::decode_device_create_texture,
    ),
    cmd_spec(
        WireCmd::DeviceCreateShaderModule,
        "DeviceCreateShaderModule",
        size_of::<DeviceCreateShaderModuleCmd>(),
        true,
        Some(ObjectType::ShaderModule),
        cmd::decode_device_create_shader_module,
    ),
    cmd_spec(
        WireCmd::DeviceGetQueue,
        "DeviceGetQueue",
        size_of::<DeviceGetQueueCmd>(),
        false,
        Some(ObjectType::Queue),
        cmd::decode_device_get_queue,
    ),
    cmd_spec(
        WireCmd::DeviceInjectError,
        "DeviceInjectError",
        size_of::<DeviceInjectErrorCmd>(),
        true,
        None,
        cmd::decode_device_inject_error,
    ),
    cmd_spec(
        WireCmd::DeviceDestroy,
        "DeviceDestroy",
        size_of::<DeviceDestroyCmd>(),
        false,
        None,
        cmd::decode_device_destroy,
    ),
    cmd_spec(
        WireCmd::BufferMapAsync,
        "BufferMapAsync",
        size_of::<BufferMapAsyncCmd>(),
        false,
        None,
        cmd::decode_buffer_map_async,
    ),
    cmd_spec(
        WireCmd::BufferUpdateMappedData,
        "BufferUpdateMappedData",
        size_of::<BufferUpdateMappedDataCmd>(),
        true,
        None,
        cmd::decode_buffer_update_mapped_data,
    ),
    cmd_spec(
        WireCmd::BufferUnmap,
        "BufferUnmap",
        size_of::<BufferUnmapCmd>(),
        false,
        None,
        cmd::decode_buffer_unmap,
    ),
    cmd_spec(
        WireCmd::BufferDestroy,
        "BufferDestroy",
        size_of::<BufferDestroyCmd>(),
        false,
        None,
        cmd::decode_buffer_destroy,
    ),
    cmd_spec(
        WireCmd::QueueWriteBuffer,
        "QueueWriteBuffer",
        size_of::<QueueWriteBufferCmd>(),
        true,
        None,
        cmd::decode_queue_write_buffer,
    ),
    cmd_spec(
        WireCmd::QueueOnSubmittedWorkDone,
        "QueueOnSubmittedWorkDone",
        size_of::<QueueOnSubmittedWorkDoneCmd>(),
        false,
        None,
        cmd::decode_queue_on_submitted_work_done,
    ),
    cmd_spec(
        WireCmd::DestroyObject,
        "DestroyObject",
        size_of::<DestroyObjectCmd>(),
        false,
        None,
        cmd::decode_destroy_object,
    ),
    cmd_spec(
        WireCmd::DevicePushErrorScope,
        "DevicePushErrorScope",
        size_of::<DevicePushErrorScopeCmd>(),
        false,
        None,
        cmd::decode_device_push_error_scope,
    ),
    cmd_spec(
        WireCmd::DevicePopErrorScope,
        "DevicePopErrorScope",
        size_of::<DevicePopErrorScopeCmd>(),
        false,
        None,
        cmd::decode_device_pop_error_scope,
    ),
];

/// Server-to-client return commands, indexed by `id - 1`.
pub static RETURN_SCHEMA: [CommandSpec<ReturnDecodeFn>; 6] = [
    ret_spec(
        ReturnWireCmd::DeviceUncapturedError,
        "DeviceUncapturedError",
        size_of::<ReturnDeviceUncapturedErrorCmd>(),
        true,
        ret::decode_device_uncaptured_error,
    ),
    ret_spec(
        ReturnWireCmd::DeviceLost,
        "DeviceLost",
        size_of::<ReturnDeviceLostCmd>(),
        true,
        ret::decode_device_lost,
    ),
    ret_spec(
        ReturnWireCmd::DeviceLogging,
        "DeviceLogging",
        size_of::<ReturnDeviceLoggingCmd>(),
        true,
        ret::decode_device_logging,
    ),
    ret_spec(
        ReturnWireCmd::BufferMapAsyncCallback,
        "BufferMapAsyncCallback",
        size_of::<ReturnBufferMapAsyncCallbackCmd>(),
        true,
        ret::decode_buffer_map_async_callback,
    ),
    ret_spec(
        ReturnWireCmd::QueueWorkDoneCallback,
        "QueueWorkDoneCallback",
        size_of::<ReturnQueueWorkDoneCallbackCmd>(),
        false,
        ret::decode_queue_work_done_callback,
    ),
    ret_spec(
        ReturnWireCmd::DevicePopErrorScopeCallback,
        "DevicePopErrorScopeCallback",
        size_of::<ReturnDevicePopErrorScopeCallbackCmd>(),
        true,
        ret::decode_device_pop_error_scope_callback,
    ),
];

/// Largest fixed transfer struct in either table.
pub const MAX_FIXED_SIZE: usize = 64;

pub fn command_spec(id: u32) -> Option<&'static CommandSpec<CommandDecodeFn>> {
    let index = (id as usize).checked_sub(1)?;
    COMMAND_SCHEMA.get(index).filter(|spec| spec.id == id)
}

pub fn return_spec(id: u32) -> Option<&'static CommandSpec<ReturnDecodeFn>> {
    let index = (id as usize).checked_sub(1)?;
    RETURN_SCHEMA.get(index).filter(|spec| spec.id == id)
}

/// Fixed transfer struct size for `id` in `direction`.
pub fn fixed_size(direction: Direction, id: u32) -> Option<usize> {
    match direction {
        Direction::ClientToServer => command_spec(id).map(|s| s.fixed_size),
        Direction::ServerToClient => return_spec(id).map(|s| s.fixed_size),
    }
}

/// How the existing objects a command refers to resolved.
///
/// Ordered by severity so that several inputs combine with `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Resolution {
    Valid,
    /// An input is a placeholder for an object whose creation failed.
    ErrorObject,
    /// An input was freed, never allocated, or has a different generation.
    Stale,
}

/// Looks up handles in the receiving side's object tables.
pub trait ObjectResolver {
    fn resolve(&self, object_type: ObjectType, handle: ObjectHandle) -> Resolution;
}

/// A command together with the resolution of its inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Decoded<'a> {
    pub command: Command<'a>,
    pub resolution: Resolution,
}

impl<'a> Command<'a> {
    /// Decode a record and resolve its object inputs in the same step.
    ///
    /// Null handles are fatal; unknown or stale handles are reported through
    /// [`Decoded::resolution`].
    pub fn decode_resolved(
        record: RawRecord<'a>,
        resolver: &impl ObjectResolver,
    ) -> Result<Decoded<'a>, WireError> {
        let command = Command::decode(record)?;

        let mut resolution = Resolution::Valid;
        let mut null_input = None;
        command.for_each_input(|object_type, handle| {
            if handle.is_null() {
                null_input.get_or_insert(object_type);
            } else {
                resolution = resolution.max(resolver.resolve(object_type, handle));
            }
        });
        if let Some(object_type) = null_input {
            return Err(WireError::NullHandle {
                command: command.name(),
                object_type,
            });
        }
        if let Some((object_type, result)) = command.result() {
            if result.is_null() {
                return Err(WireError::NullHandle {
                    command: command.name(),
                    object_type,
                });
            }
        }

        Ok(Decoded {
            command,
            resolution,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WIRE_ALIGNMENT;

    #[test]
    fn tables_are_dense_and_aligned() {
        for (i, spec) in COMMAND_SCHEMA.iter().enumerate() {
            assert_eq!(spec.id as usize, i + 1, "{}", spec.name);
            assert_eq!(spec.fixed_size % WIRE_ALIGNMENT, 0, "{}", spec.name);
            assert!(spec.fixed_size <= MAX_FIXED_SIZE);
            assert_eq!(WireCmd::from_u32(spec.id).map(WireCmd::name), Some(spec.name));
        }
        for (i, spec) in RETURN_SCHEMA.iter().enumerate() {
            assert_eq!(spec.id as usize, i + 1, "{}", spec.name);
            assert_eq!(spec.fixed_size % WIRE_ALIGNMENT, 0, "{}", spec.name);
            assert!(spec.fixed_size <= MAX_FIXED_SIZE);
            assert_eq!(
                ReturnWireCmd::from_u32(spec.id).map(ReturnWireCmd::name),
                Some(spec.name)
            );
        }
    }

    #[test]
    fn transfer_struct_sizes_are_stable() {
        assert_eq!(size_of::<DeviceCreateBufferCmd>(), 40);
        assert_eq!(size_of::<DeviceCreateTextureCmd>(), 48);
        assert_eq!(size_of::<DeviceCreateShaderModuleCmd>(), 32);
        assert_eq!(size_of::<DeviceGetQueueCmd>(), 24);
        assert_eq!(size_of::<BufferMapAsyncCmd>(), 48);
        assert_eq!(size_of::<QueueWriteBufferCmd>(), 40);
        assert_eq!(size_of::<DestroyObjectCmd>(), 24);
        assert_eq!(size_of::<DevicePushErrorScopeCmd>(), 24);
        assert_eq!(size_of::<DevicePopErrorScopeCmd>(), 24);
        assert_eq!(size_of::<ReturnBufferMapAsyncCallbackCmd>(), 40);
        assert_eq!(size_of::<ReturnQueueWorkDoneCallbackCmd>(), 32);
        assert_eq!(size_of::<ReturnDevicePopErrorScopeCallbackCmd>(), 40);
    }

    #[test]
    fn unknown_ids_have_no_spec() {
        assert!(command_spec(0).is_none());
        assert!(command_spec(16).is_none());
        assert!(return_spec(0).is_none());
        assert!(return_spec(7).is_none());
        assert_eq!(fixed_size(Direction::ClientToServer, 9), Some(16));
        assert_eq!(fixed_size(Direction::ServerToClient, 99), None);
    }
}
