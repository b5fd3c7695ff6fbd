//! Per-command handlers.
//!
//! The dispatcher has already decoded the record, resolved its inputs, allocated any result
//! slot, and skipped commands with stale inputs. Handlers see `Valid` or `ErrorObject`
//! resolutions only, except creates, which see all three.

use gpuwire_protocol::{
    Command, Decoded, ErrorType, MapAsyncStatus, MapMode, ObjectHandle, ObjectType,
    PopErrorScopeStatus, Resolution, ReturnCommand, WireError, WorkDoneStatus,
};

use crate::server::{
    BufferObject, DeviceChild, ErrorScope, MapState, PendingMap, PendingWorkDone, Session,
};
use crate::{Backend, BackendError, BackendId};

pub(crate) type CommandHandler<B> = fn(&mut Session<B>, Decoded<'_>) -> Result<(), WireError>;

/// Handlers indexed by command id - 1, parallel to `schema::COMMAND_SCHEMA`.
pub(crate) fn handler_table<B: Backend>() -> [CommandHandler<B>; 15] {
    [
        device_create_buffer::<B>,
        device_create_texture::<B>,
        device_create_shader_module::<B>,
        device_get_queue::<B>,
        device_inject_error::<B>,
        device_destroy::<B>,
        buffer_map_async::<B>,
        buffer_update_mapped_data::<B>,
        buffer_unmap::<B>,
        buffer_destroy::<B>,
        queue_write_buffer::<B>,
        queue_on_submitted_work_done::<B>,
        destroy_object::<B>,
        device_push_error_scope::<B>,
        device_pop_error_scope::<B>,
    ]
}

fn mismatched(command: &'static str) -> WireError {
    WireError::Protocol {
        command,
        reason: "handler received a different command",
    }
}

/// Run a backend create for `result` and register the new object.
///
/// Returns `None` when the result slot stays an error object: the device input did not resolve,
/// or the backend failed and the failure was reported to the client.
fn create_object<B: Backend>(
    s: &mut Session<B>,
    resolution: Resolution,
    device: ObjectHandle,
    object_type: ObjectType,
    result: ObjectHandle,
    create: impl FnOnce(&mut B, BackendId) -> Result<BackendId, BackendError>,
) -> Result<Option<BackendId>, WireError> {
    let device_id = match resolution {
        Resolution::Valid => s.objects.devices.get(device).map(|d| d.backend),
        Resolution::ErrorObject | Resolution::Stale => None,
    };
    let Some(device_id) = device_id else {
        tracing::debug!(?object_type, %result, %device, ?resolution, "created error object");
        return Ok(None);
    };

    match create(&mut s.backend, device_id) {
        Ok(backend) => {
            s.reverse.insert(object_type, backend, result);
            Ok(Some(backend))
        }
        Err(err) => {
            tracing::debug!(?object_type, %result, "backend create failed; created error object");
            s.report_error(device, err)?;
            Ok(None)
        }
    }
}

fn device_create_buffer<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DeviceCreateBuffer {
        device,
        result,
        desc,
    } = d.command
    else {
        return Err(mismatched("DeviceCreateBuffer"));
    };
    let created = create_object(s, d.resolution, device, ObjectType::Buffer, result, |b, dev| {
        b.create_buffer(dev, &desc)
    })?;
    if let Some(backend) = created {
        let map_state = if desc.mapped_at_creation {
            MapState::Mapped {
                mode: MapMode::Write,
                offset: 0,
                size: desc.size,
            }
        } else {
            MapState::Unmapped
        };
        s.objects.buffers.set(
            result,
            BufferObject {
                backend,
                device,
                map_state,
                destroyed: false,
            },
        );
    }
    Ok(())
}

fn device_create_texture<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DeviceCreateTexture {
        device,
        result,
        desc,
    } = d.command
    else {
        return Err(mismatched("DeviceCreateTexture"));
    };
    let created = create_object(s, d.resolution, device, ObjectType::Texture, result, |b, dev| {
        b.create_texture(dev, &desc)
    })?;
    if let Some(backend) = created {
        s.objects
            .textures
            .set(result, DeviceChild { backend, device });
    }
    Ok(())
}

fn device_create_shader_module<B: Backend>(
    s: &mut Session<B>,
    d: Decoded<'_>,
) -> Result<(), WireError> {
    let Command::DeviceCreateShaderModule {
        device,
        result,
        code,
    } = d.command
    else {
        return Err(mismatched("DeviceCreateShaderModule"));
    };
    let created = create_object(
        s,
        d.resolution,
        device,
        ObjectType::ShaderModule,
        result,
        |b, dev| b.create_shader_module(dev, code),
    )?;
    if let Some(backend) = created {
        s.objects
            .shader_modules
            .set(result, DeviceChild { backend, device });
    }
    Ok(())
}

fn device_get_queue<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DeviceGetQueue { device, result } = d.command else {
        return Err(mismatched("DeviceGetQueue"));
    };
    let created = create_object(s, d.resolution, device, ObjectType::Queue, result, |b, dev| {
        b.get_queue(dev)
    })?;
    if let Some(backend) = created {
        s.objects.queues.set(result, DeviceChild { backend, device });
    }
    Ok(())
}

fn device_inject_error<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DeviceInjectError {
        device,
        error_type,
        message,
    } = d.command
    else {
        return Err(mismatched("DeviceInjectError"));
    };
    if s.objects.devices.get(device).is_none() {
        return Ok(());
    }
    let err = match error_type {
        ErrorType::Validation | ErrorType::OutOfMemory | ErrorType::Internal => {
            BackendError::new(error_type, message)
        }
        _ => BackendError::validation(format!("cannot inject an error of type {error_type:?}")),
    };
    s.report_error(device, err)
}

fn device_destroy<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DeviceDestroy { device } = d.command else {
        return Err(mismatched("DeviceDestroy"));
    };
    if let Some(dev) = s.objects.devices.get_mut(device) {
        dev.lost = true;
        s.backend.destroy_device(dev.backend);
    }
    Ok(())
}

fn buffer_map_async<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::BufferMapAsync {
        buffer,
        request_serial,
        mode,
        offset,
        size,
    } = d.command
    else {
        return Err(mismatched("BufferMapAsync"));
    };

    let serial = s.backend.last_submitted_serial();
    let accepted = match s.objects.buffers.get_mut(buffer) {
        None => {
            tracing::debug!(%buffer, request_serial, "map requested on an error buffer");
            false
        }
        Some(object) if object.map_state != MapState::Unmapped => {
            tracing::debug!(%buffer, request_serial, "map requested while mapped or pending");
            false
        }
        Some(object) => match s.backend.map_buffer(object.backend, mode, offset, size) {
            Ok(()) => {
                object.map_state = MapState::Pending {
                    request_serial,
                    mode,
                    offset,
                    size,
                };
                true
            }
            Err(err) => {
                tracing::debug!(%buffer, request_serial, %err, "backend rejected map");
                false
            }
        },
    };

    if accepted {
        s.pending_maps.enqueue(
            PendingMap {
                buffer,
                request_serial,
            },
            serial,
        );
        Ok(())
    } else {
        s.send(&ReturnCommand::BufferMapAsyncCallback {
            buffer,
            request_serial,
            status: MapAsyncStatus::ValidationError,
            data: &[],
        })
    }
}

fn buffer_update_mapped_data<B: Backend>(
    s: &mut Session<B>,
    d: Decoded<'_>,
) -> Result<(), WireError> {
    const NAME: &str = "BufferUpdateMappedData";
    let Command::BufferUpdateMappedData {
        buffer,
        offset,
        data,
    } = d.command
    else {
        return Err(mismatched(NAME));
    };
    let Some(object) = s.objects.buffers.get(buffer) else {
        return Ok(());
    };

    let MapState::Mapped {
        mode: MapMode::Write,
        offset: mapped_offset,
        size: mapped_size,
    } = object.map_state
    else {
        return Err(WireError::Protocol {
            command: NAME,
            reason: "buffer has no write mapping",
        });
    };
    let end = offset.checked_add(data.len() as u64);
    let mapped_end = mapped_offset.saturating_add(mapped_size);
    if offset < mapped_offset || end.map_or(true, |end| end > mapped_end) {
        return Err(WireError::Protocol {
            command: NAME,
            reason: "update lies outside the current write mapping",
        });
    }

    let (backend, device) = (object.backend, object.device);
    if let Err(err) = s.backend.write_mapped(backend, offset, data) {
        s.report_error(device, err)?;
    }
    Ok(())
}

fn buffer_unmap<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::BufferUnmap { buffer } = d.command else {
        return Err(mismatched("BufferUnmap"));
    };
    if let Some(object) = s.objects.buffers.get_mut(buffer) {
        if object.map_state != MapState::Unmapped {
            s.backend.unmap_buffer(object.backend);
            object.map_state = MapState::Unmapped;
        }
    }
    Ok(())
}

fn buffer_destroy<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::BufferDestroy { buffer } = d.command else {
        return Err(mismatched("BufferDestroy"));
    };
    if let Some(object) = s.objects.buffers.get_mut(buffer) {
        if !object.destroyed {
            s.backend.destroy_buffer(object.backend);
            object.destroyed = true;
            object.map_state = MapState::Unmapped;
        }
    }
    Ok(())
}

fn queue_write_buffer<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::QueueWriteBuffer {
        queue,
        buffer,
        offset,
        data,
    } = d.command
    else {
        return Err(mismatched("QueueWriteBuffer"));
    };
    if d.resolution == Resolution::ErrorObject {
        tracing::debug!(%queue, %buffer, "skipping write involving an error object");
        return Ok(());
    }
    let (Some(q), Some(b)) = (s.objects.queues.get(queue), s.objects.buffers.get(buffer)) else {
        return Ok(());
    };

    let (queue_id, buffer_id, device) = (q.backend, b.backend, q.device);
    if let Err(err) = s.backend.write_buffer(queue_id, buffer_id, offset, data) {
        s.report_error(device, err)?;
    }
    Ok(())
}

fn queue_on_submitted_work_done<B: Backend>(
    s: &mut Session<B>,
    d: Decoded<'_>,
) -> Result<(), WireError> {
    let Command::QueueOnSubmittedWorkDone {
        queue,
        request_serial,
    } = d.command
    else {
        return Err(mismatched("QueueOnSubmittedWorkDone"));
    };
    if d.resolution == Resolution::ErrorObject {
        return s.send(&ReturnCommand::QueueWorkDoneCallback {
            queue,
            request_serial,
            status: WorkDoneStatus::Error,
        });
    }
    let serial = s.backend.last_submitted_serial();
    s.pending_work.enqueue(
        PendingWorkDone {
            queue,
            request_serial,
        },
        serial,
    );
    Ok(())
}

fn destroy_object<B: Backend>(s: &mut Session<B>, d: Decoded<'_>) -> Result<(), WireError> {
    let Command::DestroyObject {
        object_type,
        object,
    } = d.command
    else {
        return Err(mismatched("DestroyObject"));
    };
    match s.objects.free(object_type, object) {
        Some(Some(backend)) => {
            s.reverse.remove(object_type, backend, object);
            s.backend.release(object_type, backend);
            tracing::trace!(?object_type, %object, "released object");
        }
        Some(None) => tracing::trace!(?object_type, %object, "released error object"),
        None => tracing::debug!(?object_type, %object, "destroying a stale object"),
    }
    Ok(())
}

fn device_push_error_scope<B: Backend>(
    s: &mut Session<B>,
    d: Decoded<'_>,
) -> Result<(), WireError> {
    let Command::DevicePushErrorScope { device, filter } = d.command else {
        return Err(mismatched("DevicePushErrorScope"));
    };
    if let Some(dev) = s.objects.devices.get_mut(device) {
        dev.error_scopes.push(ErrorScope {
            filter,
            captured: None,
        });
        tracing::trace!(%device, ?filter, depth = dev.error_scopes.len(), "pushed error scope");
    }
    Ok(())
}

fn device_pop_error_scope<B: Backend>(
    s: &mut Session<B>,
    d: Decoded<'_>,
) -> Result<(), WireError> {
    let Command::DevicePopErrorScope {
        device,
        request_serial,
    } = d.command
    else {
        return Err(mismatched("DevicePopErrorScope"));
    };
    let (error_type, message) = match s.objects.devices.get_mut(device) {
        None => (ErrorType::Unknown, "device is an error object".to_owned()),
        Some(dev) if dev.lost => (ErrorType::DeviceLost, "GPU device disconnected".to_owned()),
        Some(dev) => match dev.error_scopes.pop() {
            None => (ErrorType::Unknown, "No error scopes to pop".to_owned()),
            Some(scope) => scope
                .captured
                .unwrap_or((ErrorType::NoError, String::new())),
        },
    };
    s.send(&ReturnCommand::DevicePopErrorScopeCallback {
        device,
        request_serial,
        status: PopErrorScopeStatus::Success,
        error_type,
        message: &message,
    })
}
