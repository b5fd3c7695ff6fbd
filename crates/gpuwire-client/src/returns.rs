//! Return-command handlers.
//!
//! A return command whose object is gone, or whose request was already completed through
//! another path (unmap, destroy, release), is dropped. Data that contradicts the request it
//! answers is fatal.

use gpuwire_protocol::{schema, MapAsyncStatus, MapMode, RawRecord, ReturnCommand, WireError};

use crate::buffer::{zeroed, Mapping};
use crate::client::ClientObjects;

type ReturnHandler = fn(&mut ClientObjects, ReturnCommand<'_>) -> Result<(), WireError>;

/// Indexed by return command id - 1, parallel to `schema::RETURN_SCHEMA`.
const HANDLERS: [ReturnHandler; 6] = [
    device_uncaptured_error,
    device_lost,
    device_logging,
    buffer_map_async_callback,
    queue_work_done_callback,
    device_pop_error_scope_callback,
];

pub(crate) fn dispatch(objects: &mut ClientObjects, record: RawRecord<'_>) -> Result<(), WireError> {
    let id = record.command_id();
    let spec = schema::return_spec(id).ok_or(WireError::UnknownCommand { id })?;
    let handler = HANDLERS
        .get(id as usize - 1)
        .ok_or(WireError::UnknownCommand { id })?;
    let command = (spec.decode)(record)?;
    tracing::trace!(command = spec.name, "handling return command");
    handler(objects, command)
}

fn mismatched(command: &'static str) -> WireError {
    WireError::Protocol {
        command,
        reason: "handler received a different command",
    }
}

fn device_uncaptured_error(
    objects: &mut ClientObjects,
    command: ReturnCommand<'_>,
) -> Result<(), WireError> {
    let ReturnCommand::DeviceUncapturedError {
        device,
        error_type,
        message,
    } = command
    else {
        return Err(mismatched("DeviceUncapturedError"));
    };
    let Some(stub) = objects.devices.get_mut(device) else {
        tracing::debug!(%device, "dropping uncaptured error for a stale device");
        return Ok(());
    };
    match stub.error_callback.as_mut() {
        Some(callback) => callback(error_type, message),
        None => tracing::warn!(%device, ?error_type, detail = message, "uncaptured device error"),
    }
    Ok(())
}

fn device_lost(objects: &mut ClientObjects, command: ReturnCommand<'_>) -> Result<(), WireError> {
    let ReturnCommand::DeviceLost {
        device,
        reason,
        message,
    } = command
    else {
        return Err(mismatched("DeviceLost"));
    };
    let Some(stub) = objects.devices.get_mut(device) else {
        tracing::debug!(%device, "dropping device-lost for a stale device");
        return Ok(());
    };
    stub.lose(reason, message);
    Ok(())
}

fn device_logging(
    objects: &mut ClientObjects,
    command: ReturnCommand<'_>,
) -> Result<(), WireError> {
    let ReturnCommand::DeviceLogging {
        device,
        level,
        message,
    } = command
    else {
        return Err(mismatched("DeviceLogging"));
    };
    match objects
        .devices
        .get_mut(device)
        .and_then(|stub| stub.logging_callback.as_mut())
    {
        Some(callback) => callback(level, message),
        None => tracing::debug!(%device, ?level, detail = message, "dropping device log message"),
    }
    Ok(())
}

fn buffer_map_async_callback(
    objects: &mut ClientObjects,
    command: ReturnCommand<'_>,
) -> Result<(), WireError> {
    const NAME: &str = "BufferMapAsyncCallback";
    let ReturnCommand::BufferMapAsyncCallback {
        buffer,
        request_serial,
        status,
        data,
    } = command
    else {
        return Err(mismatched(NAME));
    };
    let Some(stub) = objects.buffers.get_mut(buffer) else {
        tracing::debug!(%buffer, request_serial, "dropping map callback for a stale buffer");
        return Ok(());
    };
    let Some((mode, offset, size)) = stub
        .pending_maps
        .get(&request_serial)
        .map(|r| (r.mode, r.offset, r.size))
    else {
        tracing::debug!(%buffer, request_serial, "dropping map callback with no pending request");
        return Ok(());
    };

    if status == MapAsyncStatus::Success {
        if stub.mapping.is_some() {
            return Err(WireError::Protocol {
                command: NAME,
                reason: "map succeeded on a buffer that is already mapped",
            });
        }
        let data = match mode {
            MapMode::Read if data.len() as u64 == size => data.to_vec(),
            MapMode::Read => {
                return Err(WireError::Protocol {
                    command: NAME,
                    reason: "read data length differs from the requested size",
                })
            }
            MapMode::Write if data.is_empty() => zeroed(size)?,
            MapMode::Write => {
                return Err(WireError::Protocol {
                    command: NAME,
                    reason: "read data delivered for a write map",
                })
            }
        };
        stub.mapping = Some(Mapping { mode, offset, data });
    } else if !data.is_empty() {
        return Err(WireError::Protocol {
            command: NAME,
            reason: "data delivered with a failed map",
        });
    }

    if let Some(request) = stub.pending_maps.remove(&request_serial) {
        (request.callback)(status);
    }
    Ok(())
}

fn queue_work_done_callback(
    objects: &mut ClientObjects,
    command: ReturnCommand<'_>,
) -> Result<(), WireError> {
    let ReturnCommand::QueueWorkDoneCallback {
        queue,
        request_serial,
        status,
    } = command
    else {
        return Err(mismatched("QueueWorkDoneCallback"));
    };
    let Some(callback) = objects
        .queues
        .get_mut(queue)
        .and_then(|stub| stub.pending.remove(&request_serial))
    else {
        tracing::debug!(%queue, request_serial, "dropping stale work-done callback");
        return Ok(());
    };
    callback(status);
    Ok(())
}

fn device_pop_error_scope_callback(
    objects: &mut ClientObjects,
    command: ReturnCommand<'_>,
) -> Result<(), WireError> {
    let ReturnCommand::DevicePopErrorScopeCallback {
        device,
        request_serial,
        status,
        error_type,
        message,
    } = command
    else {
        return Err(mismatched("DevicePopErrorScopeCallback"));
    };
    let Some(callback) = objects
        .devices
        .get_mut(device)
        .and_then(|stub| stub.pending_pops.remove(&request_serial))
    else {
        tracing::debug!(%device, request_serial, "dropping stale error scope result");
        return Ok(());
    };
    callback(status, error_type, message);
    Ok(())
}
