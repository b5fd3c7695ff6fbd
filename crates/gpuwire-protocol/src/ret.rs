//! Server-to-client return commands.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::record::{CmdHeader, RawRecord};
use crate::schema;
use crate::serializer::WireRecord;
use crate::{
    decode_enum, DeviceLostReason, ErrorType, LoggingType, MapAsyncStatus, ObjectHandle,
    PopErrorScopeStatus, WireEnum, WireError, WorkDoneStatus,
};

/// Server-to-client command ids. Ids are dense and start at 1.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReturnWireCmd {
    DeviceUncapturedError = 1,
    DeviceLost = 2,
    DeviceLogging = 3,
    BufferMapAsyncCallback = 4,
    QueueWorkDoneCallback = 5,
    DevicePopErrorScopeCallback = 6,
}

impl ReturnWireCmd {
    pub fn from_u32(id: u32) -> Option<Self> {
        Some(match id {
            1 => ReturnWireCmd::DeviceUncapturedError,
            2 => ReturnWireCmd::DeviceLost,
            3 => ReturnWireCmd::DeviceLogging,
            4 => ReturnWireCmd::BufferMapAsyncCallback,
            5 => ReturnWireCmd::QueueWorkDoneCallback,
            6 => ReturnWireCmd::DevicePopErrorScopeCallback,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        schema::return_spec(self as u32).map_or("?", |spec| spec.name)
    }
}

/// Followed by `message_len` bytes of UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnDeviceUncapturedErrorCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub error_type: u32,
    pub reserved0: u32,
    pub message_len: u64,
}

/// Followed by `message_len` bytes of UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnDeviceLostCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub reason: u32,
    pub reserved0: u32,
    pub message_len: u64,
}

/// Followed by `message_len` bytes of UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnDeviceLoggingCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub level: u32,
    pub reserved0: u32,
    pub message_len: u64,
}

/// Followed by `read_data_len` bytes of mapped contents for successful read maps.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnBufferMapAsyncCallbackCmd {
    pub hdr: CmdHeader,
    pub buffer: ObjectHandle,
    pub request_serial: u64,
    pub status: u32,
    pub reserved0: u32,
    pub read_data_len: u64,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnQueueWorkDoneCallbackCmd {
    pub hdr: CmdHeader,
    pub queue: ObjectHandle,
    pub request_serial: u64,
    pub status: u32,
    pub reserved0: u32,
}

/// Followed by `message_len` bytes of UTF-8.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct ReturnDevicePopErrorScopeCallbackCmd {
    pub hdr: CmdHeader,
    pub device: ObjectHandle,
    pub request_serial: u64,
    pub status: u32,
    pub error_type: u32,
    pub message_len: u64,
}

/// A decoded server-to-client notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnCommand<'a> {
    DeviceUncapturedError {
        device: ObjectHandle,
        error_type: ErrorType,
        message: &'a str,
    },
    DeviceLost {
        device: ObjectHandle,
        reason: DeviceLostReason,
        message: &'a str,
    },
    DeviceLogging {
        device: ObjectHandle,
        level: LoggingType,
        message: &'a str,
    },
    BufferMapAsyncCallback {
        buffer: ObjectHandle,
        request_serial: u64,
        status: MapAsyncStatus,
        /// Mapped contents for a successful read map, empty otherwise.
        data: &'a [u8],
    },
    QueueWorkDoneCallback {
        queue: ObjectHandle,
        request_serial: u64,
        status: WorkDoneStatus,
    },
    /// Result of popping an error scope. `error_type` is `NoError` when nothing was captured.
    DevicePopErrorScopeCallback {
        device: ObjectHandle,
        request_serial: u64,
        status: PopErrorScopeStatus,
        error_type: ErrorType,
        message: &'a str,
    },
}

impl<'a> ReturnCommand<'a> {
    pub fn id(&self) -> ReturnWireCmd {
        match self {
            ReturnCommand::DeviceUncapturedError { .. } => ReturnWireCmd::DeviceUncapturedError,
            ReturnCommand::DeviceLost { .. } => ReturnWireCmd::DeviceLost,
            ReturnCommand::DeviceLogging { .. } => ReturnWireCmd::DeviceLogging,
            ReturnCommand::BufferMapAsyncCallback { .. } => ReturnWireCmd::BufferMapAsyncCallback,
            ReturnCommand::QueueWorkDoneCallback { .. } => ReturnWireCmd::QueueWorkDoneCallback,
            ReturnCommand::DevicePopErrorScopeCallback { .. } => {
                ReturnWireCmd::DevicePopErrorScopeCallback
            }
        }
    }

    pub fn name(&self) -> &'static str {
        self.id().name()
    }

    /// Decode one framed record through the return schema.
    pub fn decode(record: RawRecord<'a>) -> Result<Self, WireError> {
        let spec = schema::return_spec(record.command_id()).ok_or(WireError::UnknownCommand {
            id: record.command_id(),
        })?;
        (spec.decode)(record)
    }
}

fn put<T: Pod>(out: &mut [u8], value: &T) {
    out.copy_from_slice(bytemuck::bytes_of(value));
}

impl WireRecord for ReturnCommand<'_> {
    fn command_id(&self) -> u32 {
        self.id() as u32
    }

    fn name(&self) -> &'static str {
        ReturnCommand::name(self)
    }

    fn fixed_size(&self) -> usize {
        schema::return_spec(self.id() as u32).map_or(0, |spec| spec.fixed_size)
    }

    fn trailing(&self) -> &[u8] {
        match *self {
            ReturnCommand::DeviceUncapturedError { message, .. }
            | ReturnCommand::DeviceLost { message, .. }
            | ReturnCommand::DeviceLogging { message, .. }
            | ReturnCommand::DevicePopErrorScopeCallback { message, .. } => message.as_bytes(),
            ReturnCommand::BufferMapAsyncCallback { data, .. } => data,
            ReturnCommand::QueueWorkDoneCallback { .. } => &[],
        }
    }

    fn write_fixed(&self, hdr: CmdHeader, out: &mut [u8]) {
        match *self {
            ReturnCommand::DeviceUncapturedError {
                device,
                error_type,
                message,
            } => put(
                out,
                &ReturnDeviceUncapturedErrorCmd {
                    hdr,
                    device,
                    error_type: error_type.to_u32(),
                    reserved0: 0,
                    message_len: message.len() as u64,
                },
            ),
            ReturnCommand::DeviceLost {
                device,
                reason,
                message,
            } => put(
                out,
                &ReturnDeviceLostCmd {
                    hdr,
                    device,
                    reason: reason.to_u32(),
                    reserved0: 0,
                    message_len: message.len() as u64,
                },
            ),
            ReturnCommand::DeviceLogging {
                device,
                level,
                message,
            } => put(
                out,
                &ReturnDeviceLoggingCmd {
                    hdr,
                    device,
                    level: level.to_u32(),
                    reserved0: 0,
                    message_len: message.len() as u64,
                },
            ),
            ReturnCommand::BufferMapAsyncCallback {
                buffer,
                request_serial,
                status,
                data,
            } => put(
                out,
                &ReturnBufferMapAsyncCallbackCmd {
                    hdr,
                    buffer,
                    request_serial,
                    status: status.to_u32(),
                    reserved0: 0,
                    read_data_len: data.len() as u64,
                },
            ),
            ReturnCommand::QueueWorkDoneCallback {
                queue,
                request_serial,
                status,
            } => put(
                out,
                &ReturnQueueWorkDoneCallbackCmd {
                    hdr,
                    queue,
                    request_serial,
                    status: status.to_u32(),
                    reserved0: 0,
                },
            ),
            ReturnCommand::DevicePopErrorScopeCallback {
                device,
                request_serial,
                status,
                error_type,
                message,
            } => put(
                out,
                &ReturnDevicePopErrorScopeCallbackCmd {
                    hdr,
                    device,
                    request_serial,
                    status: status.to_u32(),
                    error_type: error_type.to_u32(),
                    message_len: message.len() as u64,
                },
            ),
        }
    }
}

pub(crate) fn decode_device_uncaptured_error(
    r: RawRecord<'_>,
) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "DeviceUncapturedError";
    let c: ReturnDeviceUncapturedErrorCmd = r.fixed(NAME)?;
    let message = r.trailing_str(NAME, size_of::<ReturnDeviceUncapturedErrorCmd>(), c.message_len)?;
    Ok(ReturnCommand::DeviceUncapturedError {
        device: c.device,
        error_type: decode_enum(NAME, c.error_type)?,
        message,
    })
}

pub(crate) fn decode_device_lost(r: RawRecord<'_>) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "DeviceLost";
    let c: ReturnDeviceLostCmd = r.fixed(NAME)?;
    let message = r.trailing_str(NAME, size_of::<ReturnDeviceLostCmd>(), c.message_len)?;
    Ok(ReturnCommand::DeviceLost {
        device: c.device,
        reason: decode_enum(NAME, c.reason)?,
        message,
    })
}

pub(crate) fn decode_device_logging(r: RawRecord<'_>) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "DeviceLogging";
    let c: ReturnDeviceLoggingCmd = r.fixed(NAME)?;
    let message = r.trailing_str(NAME, size_of::<ReturnDeviceLoggingCmd>(), c.message_len)?;
    Ok(ReturnCommand::DeviceLogging {
        device: c.device,
        level: decode_enum(NAME, c.level)?,
        message,
    })
}

pub(crate) fn decode_buffer_map_async_callback(
    r: RawRecord<'_>,
) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "BufferMapAsyncCallback";
    let c: ReturnBufferMapAsyncCallbackCmd = r.fixed(NAME)?;
    let data = r.trailing(NAME, size_of::<ReturnBufferMapAsyncCallbackCmd>(), c.read_data_len)?;
    Ok(ReturnCommand::BufferMapAsyncCallback {
        buffer: c.buffer,
        request_serial: c.request_serial,
        status: decode_enum(NAME, c.status)?,
        data,
    })
}

pub(crate) fn decode_queue_work_done_callback(
    r: RawRecord<'_>,
) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "QueueWorkDoneCallback";
    let c: ReturnQueueWorkDoneCallbackCmd = r.fixed_exact(NAME)?;
    Ok(ReturnCommand::QueueWorkDoneCallback {
        queue: c.queue,
        request_serial: c.request_serial,
        status: decode_enum(NAME, c.status)?,
    })
}

pub(crate) fn decode_device_pop_error_scope_callback(
    r: RawRecord<'_>,
) -> Result<ReturnCommand<'_>, WireError> {
    const NAME: &str = "DevicePopErrorScopeCallback";
    let c: ReturnDevicePopErrorScopeCallbackCmd = r.fixed(NAME)?;
    let message = r.trailing_str(
        NAME,
        size_of::<ReturnDevicePopErrorScopeCallbackCmd>(),
        c.message_len,
    )?;
    Ok(ReturnCommand::DevicePopErrorScopeCallback {
        device: c.device,
        request_serial: c.request_serial,
        status: decode_enum(NAME, c.status)?,
        error_type: decode_enum(NAME, c.error_type)?,
        message,
    })
}
