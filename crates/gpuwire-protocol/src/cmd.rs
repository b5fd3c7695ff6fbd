//! Client-to-server commands.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::record::{CmdHeader, RawRecord};
use crate::schema;
use crate::serializer::WireRecord;
use crate::{
    decode_enum, BufferDescriptor, BufferUsages, ErrorFilter, ErrorType, Extent3d, MapMode,
    ObjectHandle, ObjectType, TextureDescriptor, TextureUsages, WireEnum, WireError,
};

/// Client-to-server command ids. Ids are dense and start at 1.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WireCmd {
    DeviceCreateBuffer = 1,
    DeviceCreateTexture = 2,
    DeviceCreateShaderModule = 3,
    DeviceGetQueue = 4,
    DeviceInjectError = 5,
    DeviceDestroy = 6,
    BufferMapAsync = 7,
    BufferUpdateMappedData = 8,
    BufferUnmap = 9,
    BufferDestroy = 10,
    QueueWriteBuffer = 11,
    QueueOnSubmittedWorkDone = 12,
    DestroyObject = 13,
    DevicePushErrorScope = 14,
    DevicePopErrorScope = 15,
}

impl WireCmd {
    pub fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            1 => WireCmd::DeviceCreateBuffer,
            2 => WireCmd::DeviceCreateTexture,
            3 => WireCmd::DeviceCreateShaderModule,
            4 => WireCmd::DeviceGetQueue,
            5 => WireCmd::DeviceInjectError,
            6 => WireCmd::DeviceDestroy,
            7 => WireCmd::BufferMapAsync,
            8 => WireCmd::BufferUpdateMappedData,
            9 => WireCmd::BufferUnmap,
            10 => WireCmd::BufferDestroy,
            11 => WireCmd::QueueWriteBuffer,
            12 => WireCmd::QueueOnSubmittedWorkDone,
            13 => WireCmd::DestroyObject,
            14 => WireCmd::DevicePushErrorScope,
            15 => WireCmd::DevicePopErrorScope,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        schema::command_spec(self as u32).map_or("?", |spec| spec.name)
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceCreateBufferCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub result: ObjectHandle,
    pub size: u64,
    pub usage: u32,
    pub mapped_at_creation: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceCreateTextureCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub result: ObjectHandle,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub mip_level_count: u32,
    pub format: u32,
    pub usage: u32,
}

/// Followed by `code_len` bytes of UTF-8 shader source.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceCreateShaderModuleCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub result: ObjectHandle,
    pub code_len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceGetQueueCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub result: ObjectHandle,
}

/// Followed by `message_len` bytes of UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceInjectErrorCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub error_type: u32,
    pub reserved0: u32,
    pub message_len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DeviceDestroyCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferMapAsyncCmd {
    pub hdr: CmdHeader,
    pub buffer: ObjectHandle,
    pub request_serial: u64,
    pub offset: u64,
    pub size: u64,
    pub mode: u32,
    pub reserved0: u32,
}

/// Followed by `data_len` bytes written into the current write mapping.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferUpdateMappedDataCmd {
    pub hdr: CmdHeader,
    pub buffer: ObjectHandle,
    pub offset: u64,
    pub data_len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferUnmapCmd {
    pub hdr: CmdHeader,
    pub buffer: ObjectHandle,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferDestroyCmd {
    pub hdr: CmdHeader,
    pub buffer: ObjectHandle,
}

/// Followed by `data_len` bytes to write at `offset`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct QueueWriteBufferCmd {
    pub hdr: CmdHeader,
    pub queue: ObjectHandle,
    pub buffer: ObjectHandle,
    pub offset: u64,
    pub data_len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct QueueOnSubmittedWorkDoneCmd {
    pub hdr: CmdHeader,
    pub queue: ObjectHandle,
    pub request_serial: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DestroyObjectCmd {
    pub hdr: CmdHeader,
    pub object_type: u32,
    pub reserved0: u32,
    pub object: ObjectHandle,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DevicePushErrorScopeCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub filter: u32,
    pub reserved0: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DevicePopErrorScopeCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub request_serial: u64,
}

/// A decoded client-to-server command. Trailing arrays borrow from the receive buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command<'a> {
    DeviceCreateBuffer {
        device: ObjectHandle,
        result: ObjectHandle,
        desc: BufferDescriptor,
    },
    DeviceCreateTexture {
        device: ObjectHandle,
        result: ObjectHandle,
        desc: TextureDescriptor,
    },
    DeviceCreateShaderModule {
        device: ObjectHandle,
        result: ObjectHandle,
        code: &'a str,
    },
    DeviceGetQueue {
        device: ObjectHandle,
        result: ObjectHandle,
    },
    DeviceInjectError {
        device: ObjectHandle,
        error_type: ErrorType,
        message: &'a str,
    },
    DeviceDestroy {
        device: ObjectHandle,
    },
    BufferMapAsync {
        buffer: ObjectHandle,
        request_serial: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
    },
    BufferUpdateMappedData {
        buffer: ObjectHandle,
        offset: u64,
        data: &'a [u8],
    },
    BufferUnmap {
        buffer: ObjectHandle,
    },
    BufferDestroy {
        buffer: ObjectHandle,
    },
    /// Queue-ordered write of `data` into `buffer` at `offset`.
    QueueWriteBuffer {
        queue: ObjectHandle,
        buffer: ObjectHandle,
        offset: u64,
        data: &'a [u8],
    },
    QueueOnSubmittedWorkDone {
        queue: ObjectHandle,
        request_serial: u64,
    },
    DestroyObject {
        object_type: ObjectType,
        object: ObjectHandle,
    },
    DevicePushErrorScope {
        device: ObjectHandle,
        filter: ErrorFilter,
    },
    /// Answered by a `DevicePopErrorScopeCallback` carrying the same `request_serial`.
    DevicePopErrorScope {
        device: ObjectHandle,
        request_serial: u64,
    },
}

impl<'a> Command<'a> {
    pub fn id(&self) -> WireCmd {
        match self {
            Command::DeviceCreateBuffer { .. } => WireCmd::DeviceCreateBuffer,
            Command::DeviceCreateTexture { .. } => WireCmd::DeviceCreateTexture,
            Command::DeviceCreateShaderModule { .. } => WireCmd::DeviceCreateShaderModule,
            Command::DeviceGetQueue { .. } => WireCmd::DeviceGetQueue,
            Command::DeviceInjectError { .. } => WireCmd::DeviceInjectError,
            Command::DeviceDestroy { .. } => WireCmd::DeviceDestroy,
            Command::BufferMapAsync { .. } => WireCmd::BufferMapAsync,
            Command::BufferUpdateMappedData { .. } => WireCmd::BufferUpdateMappedData,
            Command::BufferUnmap { .. } => WireCmd::BufferUnmap,
            Command::BufferDestroy { .. } => WireCmd::BufferDestroy,
            Command::QueueWriteBuffer { .. } => WireCmd::QueueWriteBuffer,
            Command::QueueOnSubmittedWorkDone { .. } => WireCmd::QueueOnSubmittedWorkDone,
            Command::DestroyObject { .. } => WireCmd::DestroyObject,
            Command::DevicePushErrorScope { .. } => WireCmd::DevicePushErrorScope,
            Command::DevicePopErrorScope { .. } => WireCmd::DevicePopErrorScope,
        }
    }

    pub fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Decode one framed record through the command schema.
    pub fn decode(record: RawRecord<'a>) -> Result<Self, WireError> {
        let spec = schema::command_spec(record.command_id()).ok_or(WireError::UnknownCommand {
            id: record.command_id(),
        })?;
        (spec.decode)(record)
    }

    /// Visit every existing object the command operates on.
    pub fn for_each_input(&self, mut f: impl FnMut(ObjectType, ObjectHandle)) {
        match *self {
            Command::DeviceCreateBuffer { device, .. }
            | Command::DeviceCreateTexture { device, .. }
            | Command::DeviceCreateShaderModule { device, .. }
            | Command::DeviceGetQueue { device, .. }
            | Command::DeviceInjectError { device, .. }
            | Command::DeviceDestroy { device }
            | Command::DevicePushErrorScope { device, .. }
            | Command::DevicePopErrorScope { device, .. } => f(ObjectType::Device, device),
            Command::BufferMapAsync { buffer, .. }
            | Command::BufferUpdateMappedData { buffer, .. }
            | Command::BufferUnmap { buffer }
            | Command::BufferDestroy { buffer } => f(ObjectType::Buffer, buffer),
            Command::QueueWriteBuffer { queue, buffer, .. } => {
                f(ObjectType::Queue, queue);
                f(ObjectType::Buffer, buffer);
            }
            Command::QueueOnSubmittedWorkDone { queue, .. } => f(ObjectType::Queue, queue),
            Command::DestroyObject {
                object_type,
                object,
            } => f(object_type, object),
        }
    }

    /// The object a create command brings into existence.
    pub fn result(&self) -> Option<(ObjectType, ObjectHandle)> {
        match *self {
            Command::DeviceCreateBuffer { result, .. } => Some((ObjectType::Buffer, result)),
            Command::DeviceCreateTexture { result, .. } => Some((ObjectType::Texture, result)),
            Command::DeviceCreateShaderModule { result, .. } => {
                Some((ObjectType::ShaderModule, result))
            }
            Command::DeviceGetQueue { result, .. } => Some((ObjectType::Queue, result)),
            _ => None,
        }
    }
}

fn put<T: Pod>(out: &mut [u8], value: &T) {
    out.copy_from_slice(bytemuck::bytes_of(value));
}

impl WireRecord for Command<'_> {
    fn command_id(&self) -> u32 {
        self.id() as u32
    }

    fn name(&self) -> &'static str {
        Command::name(self)
    }

    fn fixed_size(&self) -> usize {
        schema::command_spec(self.id() as u32).map_or(0, |spec| spec.fixed_size)
    }

    fn trailing(&self) -> &[u8] {
        match *self {
            Command::DeviceCreateShaderModule { code, .. } => code.as_bytes(),
            Command::DeviceInjectError { message, .. } => message.as_bytes(),
            Command::BufferUpdateMappedData { data, .. } | Command::QueueWriteBuffer { data, .. } => {
                data
            }
            _ => &[],
        }
    }

    fn write_fixed(&self, hdr: CmdHeader, out: &mut [u8]) {
        match *self {
            Command::DeviceCreateBuffer {
                device,
                result,
                desc,
            } => put(
                out,
                &DeviceCreateBufferCmd {
                    hdr,
                    device,
                    result,
                    size: desc.size,
                    usage: desc.usage.bits(),
                    mapped_at_creation: desc.mapped_at_creation as u32,
                },
            ),
            Command::DeviceCreateTexture {
                device,
                result,
                desc,
            } => put(
                out,
                &DeviceCreateTextureCmd {
                    hdr,
                    device,
                    result,
                    width: desc.size.width,
                    height: desc.size.height,
                    depth_or_array_layers: desc.size.depth_or_array_layers,
                    mip_level_count: desc.mip_level_count,
                    format: desc.format.to_u32(),
                    usage: desc.usage.bits(),
                },
            ),
            Command::DeviceCreateShaderModule {
                device,
                result,
                code,
            } => put(
                out,
                &DeviceCreateShaderModuleCmd {
                    hdr,
                    device,
                    result,
                    code_len: code.len() as u64,
                },
            ),
            Command::DeviceGetQueue { device, result } => put(
                out,
                &DeviceGetQueueCmd {
                    hdr,
                    device,
                    result,
                },
            ),
            Command::DeviceInjectError {
                device,
                error_type,
                message,
            } => put(
                out,
                &DeviceInjectErrorCmd {
                    hdr,
                    device,
                    error_type: error_type.to_u32(),
                    reserved0: 0,
                    message_len: message.len() as u64,
                },
            ),
            Command::DeviceDestroy { device } => put(out, &DeviceDestroyCmd { hdr, device }),
            Command::BufferMapAsync {
                buffer,
                request_serial,
                mode,
                offset,
                size,
            } => put(
                out,
                &BufferMapAsyncCmd {
                    hdr,
                    buffer,
                    request_serial,
                    offset,
                    size,
                    mode: mode.to_u32(),
                    reserved0: 0,
                },
            ),
            Command::BufferUpdateMappedData {
                buffer,
                offset,
                data,
            } => put(
                out,
                &BufferUpdateMappedDataCmd {
                    hdr,
                    buffer,
                    offset,
                    data_len: data.len() as u64,
                },
            ),
            Command::BufferUnmap { buffer } => put(out, &BufferUnmapCmd { hdr, buffer }),
            Command::BufferDestroy { buffer } => put(out, &BufferDestroyCmd { hdr, buffer }),
            Command::QueueWriteBuffer {
                queue,
                buffer,
                offset,
                data,
            } => put(
                out,
                &QueueWriteBufferCmd {
                    hdr,
                    queue,
                    buffer,
                    offset,
                    data_len: data.len() as u64,
                },
            ),
            Command::QueueOnSubmittedWorkDone {
                queue,
                request_serial,
            } => put(
                out,
                &QueueOnSubmittedWorkDoneCmd {
                    hdr,
                    queue,
                    request_serial,
                },
            ),
            Command::DestroyObject {
                object_type,
                object,
            } => put(
                out,
                &DestroyObjectCmd {
                    hdr,
                    object_type: object_type.to_u32(),
                    reserved0: 0,
                    object,
                },
            ),
            Command::DevicePushErrorScope { device, filter } => put(
                out,
                &DevicePushErrorScopeCmd {
                    hdr,
                    device,
                    filter: filter.to_u32(),
                    reserved0: 0,
                },
            ),
            Command::DevicePopErrorScope {
                device,
                request_serial,
            } => put(
                out,
                &DevicePopErrorScopeCmd {
                    hdr,
                    device,
                    request_serial,
                },
            ),
        }
    }
}

fn decode_bool(command: &'static str, field: &'static str, value: u32) -> Result<bool, WireError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(WireError::InvalidEnum {
            command,
            field,
            value,
        }),
    }
}

pub(crate) fn decode_device_create_buffer(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DeviceCreateBuffer";
    let c: DeviceCreateBufferCmd = r.fixed_exact(NAME)?;
    let usage = BufferUsages::from_bits(c.usage).ok_or(WireError::InvalidEnum {
        command: NAME,
        field: "usage",
        value: c.usage,
    })?;
    Ok(Command::DeviceCreateBuffer {
        device: c.device,
        result: c.result,
        desc: BufferDescriptor {
            size: c.size,
            usage,
            mapped_at_creation: decode_bool(NAME, "mapped_at_creation", c.mapped_at_creation)?,
        },
    })
}

pub(crate) fn decode_device_create_texture(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DeviceCreateTexture";
    let c: DeviceCreateTextureCmd = r.fixed_exact(NAME)?;
    let usage = TextureUsages::from_bits(c.usage).ok_or(WireError::InvalidEnum {
        command: NAME,
        field: "usage",
        value: c.usage,
    })?;
    Ok(Command::DeviceCreateTexture {
        device: c.device,
        result: c.result,
        desc: TextureDescriptor {
            size: Extent3d {
                width: c.width,
                height: c.height,
                depth_or_array_layers: c.depth_or_array_layers,
            },
            mip_level_count: c.mip_level_count,
            format: decode_enum(NAME, c.format)?,
            usage,
        },
    })
}

pub(crate) fn decode_device_create_shader_module(
    r: RawRecord<'_>,
) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DeviceCreateShaderModule";
    let c: DeviceCreateShaderModuleCmd = r.fixed(NAME)?;
    let code = r.trailing_str(NAME, size_of::<DeviceCreateShaderModuleCmd>(), c.code_len)?;
    Ok(Command::DeviceCreateShaderModule {
        device: c.device,
        result: c.result,
        code,
    })
}

pub(crate) fn decode_device_get_queue(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    let c: DeviceGetQueueCmd = r.fixed_exact("DeviceGetQueue")?;
    Ok(Command::DeviceGetQueue {
        device: c.device,
        result: c.result,
    })
}

pub(crate) fn decode_device_inject_error(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DeviceInjectError";
    let c: DeviceInjectErrorCmd = r.fixed(NAME)?;
    let message = r.trailing_str(NAME, size_of::<DeviceInjectErrorCmd>(), c.message_len)?;
    Ok(Command::DeviceInjectError {
        device: c.device,
        error_type: decode_enum(NAME, c.error_type)?,
        message,
    })
}

pub(crate) fn decode_device_destroy(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    let c: DeviceDestroyCmd = r.fixed_exact("DeviceDestroy")?;
    Ok(Command::DeviceDestroy { device: c.device })
}

pub(crate) fn decode_buffer_map_async(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "BufferMapAsync";
    let c: BufferMapAsyncCmd = r.fixed_exact(NAME)?;
    Ok(Command::BufferMapAsync {
        buffer: c.buffer,
        request_serial: c.request_serial,
        mode: decode_enum(NAME, c.mode)?,
        offset: c.offset,
        size: c.size,
    })
}

pub(crate) fn decode_buffer_update_mapped_data(
    r: RawRecord<'_>,
) -> Result<Command<'_>, WireError> {
    const NAME: &str = "BufferUpdateMappedData";
    let c: BufferUpdateMappedDataCmd = r.fixed(NAME)?;
    let data = r.trailing(NAME, size_of::<BufferUpdateMappedDataCmd>(), c.data_len)?;
    Ok(Command::BufferUpdateMappedData {
        buffer: c.buffer,
        offset: c.offset,
        data,
    })
}

pub(crate) fn decode_buffer_unmap(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    let c: BufferUnmapCmd = r.fixed_exact("BufferUnmap")?;
    Ok(Command::BufferUnmap { buffer: c.buffer })
}

pub(crate) fn decode_buffer_destroy(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    let c: BufferDestroyCmd = r.fixed_exact("BufferDestroy")?;
    Ok(Command::BufferDestroy { buffer: c.buffer })
}

pub(crate) fn decode_queue_write_buffer(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "QueueWriteBuffer";
    let c: QueueWriteBufferCmd = r.fixed(NAME)?;
    let data = r.trailing(NAME, size_of::<QueueWriteBufferCmd>(), c.data_len)?;
    Ok(Command::QueueWriteBuffer {
        queue: c.queue,
        buffer: c.buffer,
        offset: c.offset,
        data,
    })
}

pub(crate) fn decode_queue_on_submitted_work_done(
    r: RawRecord<'_>,
) -> Result<Command<'_>, WireError> {
    let c: QueueOnSubmittedWorkDoneCmd = r.fixed_exact("QueueOnSubmittedWorkDone")?;
    Ok(Command::QueueOnSubmittedWorkDone {
        queue: c.queue,
        request_serial: c.request_serial,
    })
}

pub(crate) fn decode_destroy_object(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DestroyObject";
    let c: DestroyObjectCmd = r.fixed_exact(NAME)?;
    Ok(Command::DestroyObject {
        object_type: decode_enum(NAME, c.object_type)?,
        object: c.object,
    })
}

pub(crate) fn decode_device_push_error_scope(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    const NAME: &str = "DevicePushErrorScope";
    let c: DevicePushErrorScopeCmd = r.fixed_exact(NAME)?;
    Ok(Command::DevicePushErrorScope {
        device: c.device,
        filter: decode_enum(NAME, c.filter)?,
    })
}

pub(crate) fn decode_device_pop_error_scope(r: RawRecord<'_>) -> Result<Command<'_>, WireError> {
    let c: DevicePopErrorScopeCmd = r.fixed_exact("DevicePopErrorScope")?;
    Ok(Command::DevicePopErrorScope {
        device: c.device,
        request_serial: c.request_serial,
    })
}
