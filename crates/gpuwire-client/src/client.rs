use gpuwire_protocol::{
    BufferDescriptor, BufferUsages, Command, CommandSerializer, DecodeProgress, DeviceLostReason,
    Direction, ErrorFilter, ErrorType, LoggingType, MapAsyncStatus, MapMode, ObjectHandle,
    ObjectType, PopErrorScopeStatus, StreamDecoder, TextureDescriptor, Transport, WireError,
    WireLimits, WorkDoneStatus, BOOTSTRAP_DEVICE,
};

use crate::buffer::{zeroed, Buffer, MapRequest, Mapping};
use crate::device::Device;
use crate::objects::{ObjectAllocator, Release};
use crate::queue::Queue;
use crate::returns;
use crate::{
    BufferId, ClientError, ClientObject, DeviceId, QueueId, ShaderModuleId, TextureId,
};

/// Every client identity table, one per object type.
pub(crate) struct ClientObjects {
    pub devices: ObjectAllocator<Device>,
    pub buffers: ObjectAllocator<Buffer>,
    pub textures: ObjectAllocator<()>,
    pub shader_modules: ObjectAllocator<()>,
    pub queues: ObjectAllocator<Queue>,
}

impl ClientObjects {
    pub fn new() -> Self {
        Self {
            devices: ObjectAllocator::new(ObjectType::Device),
            buffers: ObjectAllocator::new(ObjectType::Buffer),
            textures: ObjectAllocator::new(ObjectType::Texture),
            shader_modules: ObjectAllocator::new(ObjectType::ShaderModule),
            queues: ObjectAllocator::new(ObjectType::Queue),
        }
    }

    fn require(&self, object_type: ObjectType, handle: ObjectHandle) -> Result<(), ClientError> {
        let live = match object_type {
            ObjectType::Device => self.devices.contains(handle),
            ObjectType::Buffer => self.buffers.contains(handle),
            ObjectType::Texture => self.textures.contains(handle),
            ObjectType::ShaderModule => self.shader_modules.contains(handle),
            ObjectType::Queue => self.queues.contains(handle),
        };
        if live {
            Ok(())
        } else {
            Err(ClientError::UnknownObject {
                object_type,
                handle,
            })
        }
    }
}

/// One client session.
///
/// Commands are buffered until [`Client::flush`]. After [`Client::disconnect`] (or a fatal
/// error) nothing more is encoded and new asynchronous requests complete at once with an
/// `Unknown` status.
pub struct Client {
    serializer: CommandSerializer,
    decoder: StreamDecoder,
    objects: ClientObjects,
    device: DeviceId,
    disconnected: bool,
    corrupted: bool,
}

impl Client {
    pub fn new(limits: WireLimits) -> Result<Self, ClientError> {
        limits.validate()?;
        let mut objects = ClientObjects::new();
        let device = objects.devices.allocate(Device::default())?;
        debug_assert_eq!(device, BOOTSTRAP_DEVICE);
        Ok(Self {
            serializer: CommandSerializer::new(Direction::ClientToServer, limits),
            decoder: StreamDecoder::new(limits),
            objects,
            device: DeviceId(device),
            disconnected: false,
            corrupted: false,
        })
    }

    /// The device both ends start with.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Map, work-done and error scope requests still waiting for a return command.
    pub fn pending_callbacks(&self) -> usize {
        let maps: usize = self
            .objects
            .buffers
            .iter()
            .map(|(_, b)| b.pending_maps.len())
            .sum();
        let work: usize = self.objects.queues.iter().map(|(_, q)| q.pending.len()).sum();
        let pops: usize = self
            .objects
            .devices
            .iter()
            .map(|(_, d)| d.pending_pops.len())
            .sum();
        maps + work + pops
    }

    pub fn create_buffer(
        &mut self,
        device: DeviceId,
        desc: BufferDescriptor,
    ) -> Result<BufferId, ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        let mut buffer = Buffer::new(desc.size, desc.usage);
        if desc.mapped_at_creation {
            buffer.mapping = Some(Mapping {
                mode: MapMode::Write,
                offset: 0,
                data: zeroed(desc.size).map_err(WireError::from)?,
            });
        }
        let result = self.objects.buffers.allocate(buffer)?;
        self.encode(&Command::DeviceCreateBuffer {
            device: device.handle(),
            result,
            desc,
        })?;
        Ok(BufferId(result))
    }

    pub fn create_texture(
        &mut self,
        device: DeviceId,
        desc: TextureDescriptor,
    ) -> Result<TextureId, ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        let result = self.objects.textures.allocate(())?;
        self.encode(&Command::DeviceCreateTexture {
            device: device.handle(),
            result,
            desc,
        })?;
        Ok(TextureId(result))
    }

    pub fn create_shader_module(
        &mut self,
        device: DeviceId,
        code: &str,
    ) -> Result<ShaderModuleId, ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        let result = self.objects.shader_modules.allocate(())?;
        self.encode(&Command::DeviceCreateShaderModule {
            device: device.handle(),
            result,
            code,
        })?;
        Ok(ShaderModuleId(result))
    }

    pub fn get_queue(&mut self, device: DeviceId) -> Result<QueueId, ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        let result = self.objects.queues.allocate(Queue::new())?;
        self.encode(&Command::DeviceGetQueue {
            device: device.handle(),
            result,
        })?;
        Ok(QueueId(result))
    }

    /// Ask the server to raise `message` as an error on `device`. It reaches the innermost
    /// matching error scope, or the uncaptured error callback if no scope matches.
    pub fn inject_error(
        &mut self,
        device: DeviceId,
        error_type: ErrorType,
        message: &str,
    ) -> Result<(), ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        self.encode(&Command::DeviceInjectError {
            device: device.handle(),
            error_type,
            message,
        })
    }

    /// Destroy the backend device. Loss is reported back through the device-lost callback.
    pub fn destroy_device(&mut self, device: DeviceId) -> Result<(), ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        self.encode(&Command::DeviceDestroy {
            device: device.handle(),
        })
    }

    /// Start capturing errors that match `filter` until the matching [`Client::pop_error_scope`].
    pub fn push_error_scope(
        &mut self,
        device: DeviceId,
        filter: ErrorFilter,
    ) -> Result<(), ClientError> {
        self.objects.require(ObjectType::Device, device.handle())?;
        self.encode(&Command::DevicePushErrorScope {
            device: device.handle(),
            filter,
        })
    }

    /// Close the innermost error scope of `device`.
    ///
    /// `callback` receives the first error the scope captured, or `NoError`. It runs exactly
    /// once: from the server's answer, or with `Unknown` status if the device is released or the
    /// client disconnects first.
    pub fn pop_error_scope(
        &mut self,
        device: DeviceId,
        callback: impl FnOnce(PopErrorScopeStatus, ErrorType, &str) + Send + 'static,
    ) -> Result<(), ClientError> {
        let handle = device.handle();
        let stub = self.objects.devices.expect_mut(handle)?;
        if self.disconnected {
            callback(PopErrorScopeStatus::Unknown, ErrorType::Unknown, "");
            return Ok(());
        }
        let request_serial = stub.next_request_serial();
        stub.pending_pops.insert(request_serial, Box::new(callback));
        self.encode(&Command::DevicePopErrorScope {
            device: handle,
            request_serial,
        })
    }

    pub fn set_uncaptured_error_callback(
        &mut self,
        device: DeviceId,
        callback: impl FnMut(ErrorType, &str) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.objects.devices.expect_mut(device.handle())?.error_callback = Some(Box::new(callback));
        Ok(())
    }

    /// The callback fires at most once, with `Unknown` if the client disconnects first.
    pub fn set_device_lost_callback(
        &mut self,
        device: DeviceId,
        callback: impl FnOnce(DeviceLostReason, &str) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.objects.devices.expect_mut(device.handle())?.lost_callback = Some(Box::new(callback));
        Ok(())
    }

    pub fn set_logging_callback(
        &mut self,
        device: DeviceId,
        callback: impl FnMut(LoggingType, &str) + Send + 'static,
    ) -> Result<(), ClientError> {
        self.objects.devices.expect_mut(device.handle())?.logging_callback =
            Some(Box::new(callback));
        Ok(())
    }

    /// Request a mapping of `size` bytes at `offset`.
    ///
    /// `callback` runs exactly once: from a return command, from unmap or destroy of the buffer,
    /// or immediately if the request is invalid or the client is disconnected.
    pub fn buffer_map_async(
        &mut self,
        buffer: BufferId,
        mode: MapMode,
        offset: u64,
        size: u64,
        callback: impl FnOnce(MapAsyncStatus) + Send + 'static,
    ) -> Result<(), ClientError> {
        let handle = buffer.handle();
        let stub = self.objects.buffers.expect_mut(handle)?;
        if self.disconnected {
            callback(MapAsyncStatus::Unknown);
            return Ok(());
        }

        let required = match mode {
            MapMode::Read => BufferUsages::MAP_READ,
            MapMode::Write => BufferUsages::MAP_WRITE,
        };
        let in_range = offset.checked_add(size).is_some_and(|end| end <= stub.size);
        if !stub.usage.contains(required)
            || !in_range
            || stub.mapping.is_some()
            || !stub.pending_maps.is_empty()
        {
            tracing::debug!(buffer = %handle, ?mode, offset, size, "rejecting map request");
            callback(MapAsyncStatus::ValidationError);
            return Ok(());
        }

        let request_serial = stub.next_request_serial();
        stub.pending_maps.insert(
            request_serial,
            MapRequest {
                mode,
                offset,
                size,
                callback: Box::new(callback),
            },
        );
        self.encode(&Command::BufferMapAsync {
            buffer: handle,
            request_serial,
            mode,
            offset,
            size,
        })
    }

    pub fn buffer_mapped_range(&self, buffer: BufferId) -> Result<&[u8], ClientError> {
        let handle = buffer.handle();
        let stub = self
            .objects
            .buffers
            .get(handle)
            .ok_or(ClientError::UnknownObject {
                object_type: ObjectType::Buffer,
                handle,
            })?;
        stub.mapping
            .as_ref()
            .map(|m| m.data.as_slice())
            .ok_or(ClientError::NotMapped { buffer: handle })
    }

    pub fn buffer_mapped_range_mut(&mut self, buffer: BufferId) -> Result<&mut [u8], ClientError> {
        let handle = buffer.handle();
        let mapping = self
            .objects
            .buffers
            .expect_mut(handle)?
            .mapping
            .as_mut()
            .ok_or(ClientError::NotMapped { buffer: handle })?;
        if mapping.mode != MapMode::Write {
            return Err(ClientError::ReadOnlyMapping { buffer: handle });
        }
        Ok(&mut mapping.data)
    }

    /// Unmap `buffer`, flushing written data to the server and cancelling pending maps.
    pub fn buffer_unmap(&mut self, buffer: BufferId) -> Result<(), ClientError> {
        let handle = buffer.handle();
        let stub = self.objects.buffers.expect_mut(handle)?;
        let mapping = stub.mapping.take();
        stub.cancel_pending(MapAsyncStatus::UnmappedBeforeCallback);

        if let Some(Mapping {
            mode: MapMode::Write,
            offset,
            data,
        }) = &mapping
        {
            self.encode(&Command::BufferUpdateMappedData {
                buffer: handle,
                offset: *offset,
                data,
            })?;
        }
        self.encode(&Command::BufferUnmap { buffer: handle })
    }

    /// Destroy the GPU memory of `buffer`. The id stays live until its last release.
    pub fn buffer_destroy(&mut self, buffer: BufferId) -> Result<(), ClientError> {
        let handle = buffer.handle();
        let stub = self.objects.buffers.expect_mut(handle)?;
        stub.mapping = None;
        stub.cancel_pending(MapAsyncStatus::DestroyedBeforeCallback);
        self.encode(&Command::BufferDestroy { buffer: handle })
    }

    /// Queue-ordered write of `data` into `buffer` at `offset`.
    pub fn queue_write_buffer(
        &mut self,
        queue: QueueId,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), ClientError> {
        self.objects.require(ObjectType::Queue, queue.handle())?;
        self.objects.require(ObjectType::Buffer, buffer.handle())?;
        self.encode(&Command::QueueWriteBuffer {
            queue: queue.handle(),
            buffer: buffer.handle(),
            offset,
            data,
        })
    }

    pub fn queue_on_submitted_work_done(
        &mut self,
        queue: QueueId,
        callback: impl FnOnce(WorkDoneStatus) + Send + 'static,
    ) -> Result<(), ClientError> {
        let handle = queue.handle();
        let stub = self.objects.queues.expect_mut(handle)?;
        if self.disconnected {
            callback(WorkDoneStatus::Unknown);
            return Ok(());
        }
        let request_serial = stub.next_request_serial();
        stub.pending.insert(request_serial, Box::new(callback));
        self.encode(&Command::QueueOnSubmittedWorkDone {
            queue: handle,
            request_serial,
        })
    }

    pub fn reference<I: ClientObject>(&mut self, id: I) -> Result<(), ClientError> {
        let handle = id.handle();
        let live = match I::TYPE {
            ObjectType::Device => self.objects.devices.reference(handle),
            ObjectType::Buffer => self.objects.buffers.reference(handle),
            ObjectType::Texture => self.objects.textures.reference(handle),
            ObjectType::ShaderModule => self.objects.shader_modules.reference(handle),
            ObjectType::Queue => self.objects.queues.reference(handle),
        };
        if live {
            Ok(())
        } else {
            Err(ClientError::UnknownObject {
                object_type: I::TYPE,
                handle,
            })
        }
    }

    /// Drop one reference. The last release fires pending callbacks with a destroyed status,
    /// frees the id, and tells the server to free its object.
    pub fn release<I: ClientObject>(&mut self, id: I) -> Result<(), ClientError> {
        let handle = id.handle();
        let object_type = I::TYPE;
        let objects = &mut self.objects;
        let freed = match object_type {
            ObjectType::Device => teardown(objects.devices.release(handle), |mut d: Device| {
                d.cancel_pending();
                d.lose(DeviceLostReason::Destroyed, "device was released");
            }),
            ObjectType::Buffer => teardown(objects.buffers.release(handle), |mut b: Buffer| {
                b.cancel_pending(MapAsyncStatus::DestroyedBeforeCallback)
            }),
            ObjectType::Texture => teardown(objects.textures.release(handle), drop),
            ObjectType::ShaderModule => teardown(objects.shader_modules.release(handle), drop),
            ObjectType::Queue => teardown(objects.queues.release(handle), |mut q: Queue| {
                q.cancel_pending(WorkDoneStatus::Unknown)
            }),
        };

        match freed {
            None => Err(ClientError::UnknownObject {
                object_type,
                handle,
            }),
            Some(false) => Ok(()),
            Some(true) => self.encode(&Command::DestroyObject {
                object_type,
                object: handle,
            }),
        }
    }

    /// Send buffered commands. Returns the number of transport messages.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize, ClientError> {
        if self.disconnected {
            return Ok(0);
        }
        match self.serializer.flush(transport) {
            Ok(sent) => Ok(sent),
            Err(err) => {
                tracing::warn!(%err, "flush failed; disconnecting");
                self.disconnect();
                Err(err.into())
            }
        }
    }

    /// Feed received return-command bytes. Partial records are buffered.
    ///
    /// Callbacks completed by these bytes run before this returns, while the client is
    /// mutably borrowed, so they cannot call back into it. A callback that needs follow-up
    /// requests (a remap, another pop) should hand them to its owner, for example over a
    /// `std::sync::mpsc` channel that is drained once `handle_commands` returns.
    pub fn handle_commands(&mut self, bytes: &[u8]) -> Result<DecodeProgress, WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let objects = &mut self.objects;
        let result = self
            .decoder
            .decode(bytes, |record| returns::dispatch(objects, record));
        self.check(result)
    }

    /// Declare the end of the return stream.
    pub fn finish(&mut self) -> Result<(), WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let result = self.decoder.finish();
        self.check(result)
    }

    /// Stop encoding and complete every pending callback with `Unknown`.
    pub fn disconnect(&mut self) {
        if self.disconnected {
            return;
        }
        self.disconnected = true;
        self.serializer.discard();
        tracing::debug!(pending = self.pending_callbacks(), "client disconnected");

        for (_, buffer) in self.objects.buffers.iter_mut() {
            buffer.cancel_pending(MapAsyncStatus::Unknown);
        }
        for (_, queue) in self.objects.queues.iter_mut() {
            queue.cancel_pending(WorkDoneStatus::Unknown);
        }
        for (_, device) in self.objects.devices.iter_mut() {
            device.cancel_pending();
            device.lose(DeviceLostReason::Unknown, "client disconnected");
        }
    }

    fn encode(&mut self, command: &Command<'_>) -> Result<(), ClientError> {
        if self.disconnected {
            tracing::trace!(command = command.name(), "not encoding after disconnect");
            return Ok(());
        }
        if let Err(err) = self.serializer.serialize(command) {
            tracing::warn!(%err, command = command.name(), "encoding failed; disconnecting");
            self.disconnect();
            return Err(err.into());
        }
        Ok(())
    }

    fn check<T>(&mut self, result: Result<T, WireError>) -> Result<T, WireError> {
        if let Err(err) = &result {
            tracing::warn!(%err, "return stream corrupted; disconnecting");
            self.corrupted = true;
            self.disconnect();
        }
        result
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// `None` for a stale handle, otherwise whether the object was freed.
fn teardown<T>(release: Release<T>, on_free: impl FnOnce(T)) -> Option<bool> {
    match release {
        Release::Stale => None,
        Release::Referenced => Some(false),
        Release::Freed(object) => {
            on_free(object);
            Some(true)
        }
    }
}
