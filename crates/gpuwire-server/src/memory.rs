//! In-memory [`Backend`] for tests and loopback sessions.
//!
//! Buffers are plain byte vectors. Submission and completion serials only move when the owner
//! calls [`MemoryBackend::submit`] and [`MemoryBackend::complete_all`], so callers control when
//! map and work-done requests become deliverable.

use std::collections::HashMap;

use gpuwire_protocol::{
    BufferDescriptor, BufferUsages, DeviceLostReason, ErrorType, LoggingType, MapMode, ObjectType,
    TextureDescriptor,
};
use gpuwire_serial::Serial;

use crate::{Backend, BackendError, BackendEvent, BackendId};

/// Largest buffer the in-memory backend will allocate.
pub const MAX_BUFFER_SIZE: u64 = 256 * 1024 * 1024;

#[derive(Debug)]
struct MemoryBuffer {
    usage: BufferUsages,
    data: Vec<u8>,
    mapping: Option<(MapMode, u64, u64)>,
    destroyed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    next_id: u64,
    /// Device id to lost flag.
    devices: HashMap<BackendId, bool>,
    buffers: HashMap<BackendId, MemoryBuffer>,
    objects: HashMap<BackendId, (ObjectType, BackendId)>,
    events: Vec<BackendEvent>,
    submitted: Serial,
    completed: Serial,
    fail_next: Option<BackendError>,
    released: Vec<(ObjectType, BackendId)>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_device(&mut self) -> BackendId {
        let id = self.next_id();
        self.devices.insert(id, false);
        id
    }

    /// Start a new submission. Requests made from now on complete with it.
    pub fn submit(&mut self) -> Serial {
        self.submitted = self.submitted.next();
        self.submitted
    }

    /// Mark every submission so far as finished on the GPU.
    pub fn complete_all(&mut self) {
        self.completed = self.submitted;
    }

    /// Make the next create call fail with `err`.
    pub fn fail_next(&mut self, err: BackendError) {
        self.fail_next = Some(err);
    }

    /// Raise a device loss as if the GPU had gone away.
    pub fn lose_device(&mut self, device: BackendId, reason: DeviceLostReason, message: &str) {
        if let Some(lost) = self.devices.get_mut(&device) {
            if !*lost {
                *lost = true;
                self.events.push(BackendEvent::DeviceLost {
                    device,
                    reason,
                    message: message.to_owned(),
                });
            }
        }
    }

    /// Raise an error the backend noticed on its own, outside any command.
    pub fn raise_error(&mut self, device: BackendId, error_type: ErrorType, message: &str) {
        self.events.push(BackendEvent::UncapturedError {
            device,
            error_type,
            message: message.to_owned(),
        });
    }

    pub fn log(&mut self, device: BackendId, level: LoggingType, message: &str) {
        self.events.push(BackendEvent::Logging {
            device,
            level,
            message: message.to_owned(),
        });
    }

    pub fn buffer_contents(&self, buffer: BackendId) -> Option<&[u8]> {
        self.buffers.get(&buffer).map(|b| b.data.as_slice())
    }

    pub fn buffer_contents_mut(&mut self, buffer: BackendId) -> Option<&mut [u8]> {
        self.buffers.get_mut(&buffer).map(|b| b.data.as_mut_slice())
    }

    pub fn is_buffer_mapped(&self, buffer: BackendId) -> bool {
        self.buffers
            .get(&buffer)
            .is_some_and(|b| b.mapping.is_some())
    }

    /// Objects handed to [`Backend::release`], oldest first.
    pub fn released(&self) -> &[(ObjectType, BackendId)] {
        &self.released
    }

    /// Buffers, textures, shader modules and queues not yet released.
    pub fn live_objects(&self) -> usize {
        self.buffers.len() + self.objects.len()
    }

    fn next_id(&mut self) -> BackendId {
        self.next_id += 1;
        BackendId(self.next_id)
    }

    fn check_device(&mut self, device: BackendId) -> Result<(), BackendError> {
        if let Some(err) = self.fail_next.take() {
            return Err(err);
        }
        match self.devices.get(&device) {
            Some(false) => Ok(()),
            Some(true) => Err(BackendError::new(ErrorType::DeviceLost, "device is lost")),
            None => Err(BackendError::validation("unknown device")),
        }
    }

    fn create_child(&mut self, device: BackendId, object_type: ObjectType) -> BackendId {
        let id = self.next_id();
        self.objects.insert(id, (object_type, device));
        id
    }

    fn buffer_range(
        buffer: &MemoryBuffer,
        offset: u64,
        size: u64,
    ) -> Result<std::ops::Range<usize>, BackendError> {
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= buffer.data.len() as u64)
            .ok_or_else(|| BackendError::validation("range is outside the buffer"))?;
        Ok(offset as usize..end as usize)
    }

    fn live_buffer(&mut self, buffer: BackendId) -> Result<&mut MemoryBuffer, BackendError> {
        match self.buffers.get_mut(&buffer) {
            Some(b) if !b.destroyed => Ok(b),
            Some(_) => Err(BackendError::validation("buffer is destroyed")),
            None => Err(BackendError::validation("unknown buffer")),
        }
    }
}

impl Backend for MemoryBackend {
    fn create_buffer(
        &mut self,
        device: BackendId,
        desc: &BufferDescriptor,
    ) -> Result<BackendId, BackendError> {
        self.check_device(device)?;
        if desc.usage.contains(BufferUsages::MAP_READ | BufferUsages::MAP_WRITE) {
            return Err(BackendError::validation(
                "MAP_READ and MAP_WRITE cannot be combined",
            ));
        }
        if desc.size > MAX_BUFFER_SIZE {
            return Err(BackendError::new(
                ErrorType::OutOfMemory,
                format!("buffer of {} bytes is too large", desc.size),
            ));
        }
        let id = self.next_id();
        self.buffers.insert(
            id,
            MemoryBuffer {
                usage: desc.usage,
                data: vec![0; desc.size as usize],
                mapping: desc
                    .mapped_at_creation
                    .then_some((MapMode::Write, 0, desc.size)),
                destroyed: false,
            },
        );
        Ok(id)
    }

    fn create_texture(
        &mut self,
        device: BackendId,
        desc: &TextureDescriptor,
    ) -> Result<BackendId, BackendError> {
        self.check_device(device)?;
        let extent = desc.size;
        if extent.width == 0 || extent.height == 0 || extent.depth_or_array_layers == 0 {
            return Err(BackendError::validation("texture extent is empty"));
        }
        if desc.mip_level_count == 0 {
            return Err(BackendError::validation("mip level count is zero"));
        }
        Ok(self.create_child(device, ObjectType::Texture))
    }

    fn create_shader_module(
        &mut self,
        device: BackendId,
        code: &str,
    ) -> Result<BackendId, BackendError> {
        self.check_device(device)?;
        if code.trim().is_empty() {
            return Err(BackendError::validation("shader source is empty"));
        }
        Ok(self.create_child(device, ObjectType::ShaderModule))
    }

    fn get_queue(&mut self, device: BackendId) -> Result<BackendId, BackendError> {
        self.check_device(device)?;
        Ok(self.create_child(device, ObjectType::Queue))
    }

    fn destroy_device(&mut self, device: BackendId) {
        self.lose_device(device, DeviceLostReason::Destroyed, "device destroyed");
    }

    fn map_buffer(
        &mut self,
        buffer: BackendId,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<(), BackendError> {
        let b = self.live_buffer(buffer)?;
        let required = match mode {
            MapMode::Read => BufferUsages::MAP_READ,
            MapMode::Write => BufferUsages::MAP_WRITE,
        };
        if !b.usage.contains(required) {
            return Err(BackendError::validation("buffer usage does not allow this map mode"));
        }
        if b.mapping.is_some() {
            return Err(BackendError::validation("buffer is already mapped"));
        }
        Self::buffer_range(b, offset, size)?;
        b.mapping = Some((mode, offset, size));
        Ok(())
    }

    fn read_mapped(
        &mut self,
        buffer: BackendId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError> {
        let b = self.live_buffer(buffer)?;
        let range = Self::buffer_range(b, offset, size)?;
        Ok(b.data[range].to_vec())
    }

    fn write_mapped(
        &mut self,
        buffer: BackendId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        let b = self.live_buffer(buffer)?;
        let range = Self::buffer_range(b, offset, data.len() as u64)?;
        b.data[range].copy_from_slice(data);
        Ok(())
    }

    fn unmap_buffer(&mut self, buffer: BackendId) {
        if let Some(b) = self.buffers.get_mut(&buffer) {
            b.mapping = None;
        }
    }

    fn destroy_buffer(&mut self, buffer: BackendId) {
        if let Some(b) = self.buffers.get_mut(&buffer) {
            b.destroyed = true;
            b.mapping = None;
        }
    }

    fn write_buffer(
        &mut self,
        queue: BackendId,
        buffer: BackendId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError> {
        if !matches!(self.objects.get(&queue), Some((ObjectType::Queue, _))) {
            return Err(BackendError::validation("unknown queue"));
        }
        let b = self.live_buffer(buffer)?;
        if !b.usage.contains(BufferUsages::COPY_DST) {
            return Err(BackendError::validation("buffer usage lacks COPY_DST"));
        }
        if b.mapping.is_some() {
            return Err(BackendError::validation("buffer is mapped"));
        }
        let range = Self::buffer_range(b, offset, data.len() as u64)?;
        b.data[range].copy_from_slice(data);
        Ok(())
    }

    fn last_submitted_serial(&self) -> Serial {
        self.submitted
    }

    fn completed_serial(&self) -> Serial {
        self.completed
    }

    fn release(&mut self, object_type: ObjectType, object: BackendId) {
        match object_type {
            ObjectType::Device => {
                self.devices.remove(&object);
            }
            ObjectType::Buffer => {
                self.buffers.remove(&object);
            }
            _ => {
                self.objects.remove(&object);
            }
        }
        tracing::trace!(?object_type, object = object.0, "released backend object");
        self.released.push((object_type, object));
    }

    fn poll_events(&mut self) -> Vec<BackendEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gpuwire_protocol::{Extent3d, TextureFormat, TextureUsages};

    fn buffer_desc(size: u64, usage: BufferUsages) -> BufferDescriptor {
        BufferDescriptor {
            size,
            usage,
            mapped_at_creation: false,
        }
    }

    #[test]
    fn created_buffers_start_zeroed() {
        let mut backend = MemoryBackend::new();
        let device = backend.create_device();
        let buffer = backend
            .create_buffer(device, &buffer_desc(16, BufferUsages::COPY_DST))
            .unwrap();
        assert_eq!(backend.buffer_contents(buffer), Some(&[0u8; 16][..]));
    }

    #[test]
    fn invalid_descriptors_fail_with_validation_errors() {
        let mut backend = MemoryBackend::new();
        let device = backend.create_device();
        let err = backend
            .create_buffer(
                device,
                &buffer_desc(4, BufferUsages::MAP_READ | BufferUsages::MAP_WRITE),
            )
            .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);

        let err = backend
            .create_texture(
                device,
                &TextureDescriptor {
                    size: Extent3d {
                        width: 0,
                        height: 4,
                        depth_or_array_layers: 1,
                    },
                    mip_level_count: 1,
                    format: TextureFormat::Rgba8Unorm,
                    usage: TextureUsages::TEXTURE_BINDING,
                },
            )
            .unwrap_err();
        assert_eq!(err.error_type, ErrorType::Validation);
        assert!(backend.create_shader_module(device, "  ").is_err());
    }

    #[test]
    fn write_buffer_requires_copy_dst_and_an_unmapped_buffer() {
        let mut backend = MemoryBackend::new();
        let device = backend.create_device();
        let queue = backend.get_queue(device).unwrap();
        let buffer = backend
            .create_buffer(device, &buffer_desc(8, BufferUsages::MAP_READ))
            .unwrap();
        assert!(backend.write_buffer(queue, buffer, 0, &[1, 2]).is_err());

        let buffer = backend
            .create_buffer(
                device,
                &buffer_desc(8, BufferUsages::MAP_READ | BufferUsages::COPY_DST),
            )
            .unwrap();
        backend.write_buffer(queue, buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert!(backend.write_buffer(queue, buffer, 6, &[1, 2, 3]).is_err());

        backend.map_buffer(buffer, MapMode::Read, 0, 8).unwrap();
        assert!(backend.write_buffer(queue, buffer, 0, &[9]).is_err());
        assert_eq!(
            backend.read_mapped(buffer, 0, 8).unwrap(),
            vec![0, 0, 0, 0, 1, 2, 3, 4]
        );
    }

    #[test]
    fn destroying_a_device_reports_loss_once() {
        let mut backend = MemoryBackend::new();
        let device = backend.create_device();
        backend.destroy_device(device);
        backend.destroy_device(device);
        let events = backend.poll_events();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            BackendEvent::DeviceLost {
                reason: DeviceLostReason::Destroyed,
                ..
            }
        ));
        assert!(backend.get_queue(device).is_err());
        assert!(backend.poll_events().is_empty());
    }
}
