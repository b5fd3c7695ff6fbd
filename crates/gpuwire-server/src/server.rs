use gpuwire_protocol::{
    Command, CommandSerializer, DecodeProgress, Direction, ErrorFilter, ErrorType, MapAsyncStatus,
    MapMode, ObjectHandle, ObjectResolver, ObjectType, RawRecord, Resolution, ReturnCommand,
    StreamDecoder, Transport, WireError, WireLimits, WorkDoneStatus, BOOTSTRAP_DEVICE,
};
use gpuwire_serial::SerialQueue;

use crate::dispatch::{self, CommandHandler};
use crate::objects::{Entry, KnownObjects, ReverseIdTable};
use crate::{Backend, BackendError, BackendEvent, BackendId};

pub(crate) struct DeviceObject {
    pub backend: BackendId,
    /// Innermost scope last.
    pub error_scopes: Vec<ErrorScope>,
    pub lost: bool,
}

impl DeviceObject {
    fn new(backend: BackendId) -> Self {
        Self {
            backend,
            error_scopes: Vec::new(),
            lost: false,
        }
    }

    /// Offer an error to the scope stack. Returns `false` if no scope's filter matches.
    pub fn capture(&mut self, error_type: ErrorType, message: &str) -> bool {
        if error_type == ErrorType::DeviceLost {
            // Loss is fatal to the device, so every open scope reports it.
            for scope in &mut self.error_scopes {
                scope
                    .captured
                    .get_or_insert_with(|| (error_type, message.to_owned()));
            }
            return !self.error_scopes.is_empty();
        }
        let Some(scope) = self
            .error_scopes
            .iter_mut()
            .rev()
            .find(|scope| scope.filter.matches(error_type))
        else {
            return false;
        };
        // Only the first error in a scope is kept.
        scope
            .captured
            .get_or_insert_with(|| (error_type, message.to_owned()));
        true
    }
}

#[derive(Debug)]
pub(crate) struct ErrorScope {
    pub filter: ErrorFilter,
    pub captured: Option<(ErrorType, String)>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum MapState {
    Unmapped,
    Pending {
        request_serial: u64,
        mode: MapMode,
        offset: u64,
        size: u64,
    },
    Mapped {
        mode: MapMode,
        offset: u64,
        size: u64,
    },
}

pub(crate) struct BufferObject {
    pub backend: BackendId,
    pub device: ObjectHandle,
    pub map_state: MapState,
    pub destroyed: bool,
}

/// Textures, shader modules and queues: a backend object owned by a device.
pub(crate) struct DeviceChild {
    pub backend: BackendId,
    pub device: ObjectHandle,
}

pub(crate) struct ServerObjects {
    pub devices: KnownObjects<DeviceObject>,
    pub buffers: KnownObjects<BufferObject>,
    pub textures: KnownObjects<DeviceChild>,
    pub shader_modules: KnownObjects<DeviceChild>,
    pub queues: KnownObjects<DeviceChild>,
}

impl ServerObjects {
    fn new() -> Self {
        Self {
            devices: KnownObjects::new(ObjectType::Device),
            buffers: KnownObjects::new(ObjectType::Buffer),
            textures: KnownObjects::new(ObjectType::Texture),
            shader_modules: KnownObjects::new(ObjectType::ShaderModule),
            queues: KnownObjects::new(ObjectType::Queue),
        }
    }

    pub fn allocate(&mut self, object_type: ObjectType, handle: ObjectHandle) -> Result<(), WireError> {
        match object_type {
            ObjectType::Device => self.devices.allocate(handle),
            ObjectType::Buffer => self.buffers.allocate(handle),
            ObjectType::Texture => self.textures.allocate(handle),
            ObjectType::ShaderModule => self.shader_modules.allocate(handle),
            ObjectType::Queue => self.queues.allocate(handle),
        }
    }

    pub fn backend_id(&self, object_type: ObjectType, handle: ObjectHandle) -> Option<BackendId> {
        match object_type {
            ObjectType::Device => self.devices.get(handle).map(|o| o.backend),
            ObjectType::Buffer => self.buffers.get(handle).map(|o| o.backend),
            ObjectType::Texture => self.textures.get(handle).map(|o| o.backend),
            ObjectType::ShaderModule => self.shader_modules.get(handle).map(|o| o.backend),
            ObjectType::Queue => self.queues.get(handle).map(|o| o.backend),
        }
    }

    /// Free a live slot. `None` if `handle` is stale; `Some(None)` for an error object.
    pub fn free(
        &mut self,
        object_type: ObjectType,
        handle: ObjectHandle,
    ) -> Option<Option<BackendId>> {
        fn backend<T>(entry: Entry<T>, id: impl FnOnce(T) -> BackendId) -> Option<BackendId> {
            match entry {
                Entry::Valid(object) => Some(id(object)),
                Entry::Error => None,
            }
        }
        Some(match object_type {
            ObjectType::Device => backend(self.devices.free(handle)?, |o| o.backend),
            ObjectType::Buffer => backend(self.buffers.free(handle)?, |o| o.backend),
            ObjectType::Texture => backend(self.textures.free(handle)?, |o| o.backend),
            ObjectType::ShaderModule => backend(self.shader_modules.free(handle)?, |o| o.backend),
            ObjectType::Queue => backend(self.queues.free(handle)?, |o| o.backend),
        })
    }
}

impl ObjectResolver for ServerObjects {
    fn resolve(&self, object_type: ObjectType, handle: ObjectHandle) -> Resolution {
        match object_type {
            ObjectType::Device => self.devices.resolve(handle),
            ObjectType::Buffer => self.buffers.resolve(handle),
            ObjectType::Texture => self.textures.resolve(handle),
            ObjectType::ShaderModule => self.shader_modules.resolve(handle),
            ObjectType::Queue => self.queues.resolve(handle),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingMap {
    pub buffer: ObjectHandle,
    pub request_serial: u64,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct PendingWorkDone {
    pub queue: ObjectHandle,
    pub request_serial: u64,
}

/// Everything a command handler may touch. Kept apart from the stream decoder so the decoder
/// can borrow its input while handlers run.
pub(crate) struct Session<B: Backend> {
    pub backend: B,
    pub objects: ServerObjects,
    pub reverse: ReverseIdTable,
    pub pending_maps: SerialQueue<PendingMap>,
    pub pending_work: SerialQueue<PendingWorkDone>,
    pub returns: CommandSerializer,
    handlers: [CommandHandler<B>; 15],
}

impl<B: Backend> Session<B> {
    fn dispatch(&mut self, record: RawRecord<'_>) -> Result<(), WireError> {
        let decoded = Command::decode_resolved(record, &self.objects)?;
        let command = decoded.command;
        tracing::trace!(
            command = command.name(),
            resolution = ?decoded.resolution,
            "dispatching command"
        );

        if let Some((object_type, result)) = command.result() {
            self.objects.allocate(object_type, result)?;
        } else if decoded.resolution == Resolution::Stale {
            tracing::debug!(
                command = command.name(),
                "skipping command with a stale object reference"
            );
            return Ok(());
        }

        let handler = self.handlers[command.id() as usize - 1];
        handler(self, decoded)
    }

    pub fn send(&mut self, command: &ReturnCommand<'_>) -> Result<(), WireError> {
        self.returns.serialize(command)
    }

    /// Route a recoverable failure on `device` to its error scopes, or to the client as an
    /// uncaptured error when no scope takes it.
    pub fn report_error(&mut self, device: ObjectHandle, err: BackendError) -> Result<(), WireError> {
        self.raise(device, err.error_type, &err.message)
    }

    fn raise(
        &mut self,
        device: ObjectHandle,
        error_type: ErrorType,
        message: &str,
    ) -> Result<(), WireError> {
        if let Some(dev) = self.objects.devices.get_mut(device) {
            if dev.capture(error_type, message) {
                tracing::trace!(%device, ?error_type, error = message, "error captured by scope");
                return Ok(());
            }
        }
        tracing::debug!(%device, ?error_type, error = message, "uncaptured device error");
        self.send(&ReturnCommand::DeviceUncapturedError {
            device,
            error_type,
            message,
        })
    }

    fn tick(&mut self) -> Result<usize, WireError> {
        let before = self.returns.pending_records();
        let completed = self.backend.completed_serial();

        for map in self.pending_maps.take_up_to(completed) {
            self.complete_map(map)?;
        }
        for work in self.pending_work.take_up_to(completed) {
            if self.objects.queues.resolve(work.queue) == Resolution::Stale {
                tracing::debug!(queue = %work.queue, "dropping work-done for a released queue");
                continue;
            }
            self.send(&ReturnCommand::QueueWorkDoneCallback {
                queue: work.queue,
                request_serial: work.request_serial,
                status: WorkDoneStatus::Success,
            })?;
        }
        for event in self.backend.poll_events() {
            self.forward_event(event)?;
        }

        Ok(self.returns.pending_records() - before)
    }

    fn complete_map(&mut self, map: PendingMap) -> Result<(), WireError> {
        let Some(buffer) = self.objects.buffers.get_mut(map.buffer) else {
            tracing::debug!(buffer = %map.buffer, "dropping map completion for a released buffer");
            return Ok(());
        };

        let state = buffer.map_state;
        let (status, data) = match state {
            _ if buffer.destroyed => (MapAsyncStatus::DestroyedBeforeCallback, Vec::new()),
            MapState::Pending {
                request_serial,
                mode,
                offset,
                size,
            } if request_serial == map.request_serial => {
                let data = match mode {
                    MapMode::Read => self.backend.read_mapped(buffer.backend, offset, size),
                    MapMode::Write => Ok(Vec::new()),
                };
                match data {
                    Ok(data) if mode == MapMode::Write || data.len() as u64 == size => {
                        buffer.map_state = MapState::Mapped { mode, offset, size };
                        (MapAsyncStatus::Success, data)
                    }
                    Ok(data) => {
                        tracing::warn!(
                            buffer = %map.buffer,
                            expected = size,
                            actual = data.len(),
                            "backend returned a short read mapping"
                        );
                        self.backend.unmap_buffer(buffer.backend);
                        buffer.map_state = MapState::Unmapped;
                        (MapAsyncStatus::ValidationError, Vec::new())
                    }
                    Err(err) => {
                        tracing::debug!(buffer = %map.buffer, %err, "reading mapped range failed");
                        self.backend.unmap_buffer(buffer.backend);
                        buffer.map_state = MapState::Unmapped;
                        (MapAsyncStatus::ValidationError, Vec::new())
                    }
                }
            }
            _ => (MapAsyncStatus::UnmappedBeforeCallback, Vec::new()),
        };

        self.send(&ReturnCommand::BufferMapAsyncCallback {
            buffer: map.buffer,
            request_serial: map.request_serial,
            status,
            data: &data,
        })
    }

    fn forward_event(&mut self, event: BackendEvent) -> Result<(), WireError> {
        let Some(device) = self.reverse.get(ObjectType::Device, event.device()) else {
            tracing::debug!(backend = event.device().0, "dropping event for an unknown device");
            return Ok(());
        };
        match &event {
            BackendEvent::UncapturedError {
                error_type,
                message,
                ..
            } => self.raise(device, *error_type, message),
            BackendEvent::DeviceLost {
                reason, message, ..
            } => {
                if let Some(dev) = self.objects.devices.get_mut(device) {
                    dev.lost = true;
                }
                self.send(&ReturnCommand::DeviceLost {
                    device,
                    reason: *reason,
                    message,
                })
            }
            BackendEvent::Logging {
                level, message, ..
            } => self.send(&ReturnCommand::DeviceLogging {
                device,
                level: *level,
                message,
            }),
        }
    }
}

/// Server end of a wire session.
///
/// Commands are fed through [`Server::handle_commands`] in stream order. Asynchronous results
/// are produced by [`Server::tick`] and sent with [`Server::flush`]. After a fatal error every
/// entry point returns [`WireError::StreamCorrupted`].
pub struct Server<B: Backend> {
    decoder: StreamDecoder,
    session: Session<B>,
    corrupted: bool,
}

impl<B: Backend> Server<B> {
    /// Create a session whose bootstrap device is bound to `device`.
    pub fn new(backend: B, device: BackendId, limits: WireLimits) -> Result<Self, WireError> {
        limits.validate()?;

        let mut objects = ServerObjects::new();
        objects.devices.allocate(BOOTSTRAP_DEVICE)?;
        objects
            .devices
            .set(BOOTSTRAP_DEVICE, DeviceObject::new(device));
        let mut reverse = ReverseIdTable::new();
        reverse.insert(ObjectType::Device, device, BOOTSTRAP_DEVICE);

        Ok(Self {
            decoder: StreamDecoder::new(limits),
            session: Session {
                backend,
                objects,
                reverse,
                pending_maps: SerialQueue::new(),
                pending_work: SerialQueue::new(),
                returns: CommandSerializer::new(Direction::ServerToClient, limits),
                handlers: dispatch::handler_table(),
            },
            corrupted: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.session.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.session.backend
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted
    }

    /// How `handle` resolves in the table for `object_type`.
    pub fn resolve(&self, object_type: ObjectType, handle: ObjectHandle) -> Resolution {
        self.session.objects.resolve(object_type, handle)
    }

    /// Backend object bound to `handle`, if it is live and not an error object.
    pub fn backend_id(&self, object_type: ObjectType, handle: ObjectHandle) -> Option<BackendId> {
        self.session.objects.backend_id(object_type, handle)
    }

    /// Client handle a backend object was registered under.
    pub fn lookup_backend(&self, object_type: ObjectType, backend: BackendId) -> Option<ObjectHandle> {
        self.session.reverse.get(object_type, backend)
    }

    /// Map and work-done requests waiting on the backend's completed serial.
    pub fn pending_completions(&self) -> usize {
        self.session.pending_maps.len() + self.session.pending_work.len()
    }

    /// Return commands serialized but not yet flushed.
    pub fn pending_returns(&self) -> usize {
        self.session.returns.pending_records()
    }

    /// Decode and execute received command bytes. Partial records are buffered.
    pub fn handle_commands(&mut self, bytes: &[u8]) -> Result<DecodeProgress, WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let session = &mut self.session;
        let result = self.decoder.decode(bytes, |record| session.dispatch(record));
        self.check(result)
    }

    /// Declare the end of the command stream.
    pub fn finish(&mut self) -> Result<(), WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let result = self.decoder.finish();
        self.check(result)
    }

    /// Deliver completed map and work-done requests and forward backend events.
    ///
    /// Returns the number of return commands produced.
    pub fn tick(&mut self) -> Result<usize, WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let result = self.session.tick();
        self.check(result)
    }

    /// Send pending return commands. Returns the number of transport messages.
    pub fn flush(&mut self, transport: &mut dyn Transport) -> Result<usize, WireError> {
        if self.corrupted {
            return Err(WireError::StreamCorrupted);
        }
        let result = self.session.returns.flush(transport);
        self.check(result)
    }

    fn check<T>(&mut self, result: Result<T, WireError>) -> Result<T, WireError> {
        if let Err(err) = &result {
            tracing::warn!(%err, "command stream corrupted");
            self.corrupted = true;
            self.session.returns.discard();
        }
        result
    }
}
