//! Backend operation interface consumed by the dispatcher.
//!
//! One method per command the server executes. Backend objects are named by opaque
//! [`BackendId`]s; the server never looks inside them.

use gpuwire_protocol::{
    BufferDescriptor, DeviceLostReason, ErrorType, LoggingType, MapMode, ObjectType,
    TextureDescriptor,
};
use gpuwire_serial::Serial;

/// Opaque backend object name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BackendId(pub u64);

/// Recoverable backend failure. Reported to the client, never fatal for the stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error_type:?} error: {message}")]
pub struct BackendError {
    pub error_type: ErrorType,
    pub message: String,
}

impl BackendError {
    pub fn new(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorType::Validation, message)
    }
}

/// Asynchronous device notification raised by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    UncapturedError {
        device: BackendId,
        error_type: ErrorType,
        message: String,
    },
    DeviceLost {
        device: BackendId,
        reason: DeviceLostReason,
        message: String,
    },
    Logging {
        device: BackendId,
        level: LoggingType,
        message: String,
    },
}

impl BackendEvent {
    pub fn device(&self) -> BackendId {
        match self {
            BackendEvent::UncapturedError { device, .. }
            | BackendEvent::DeviceLost { device, .. }
            | BackendEvent::Logging { device, .. } => *device,
        }
    }
}

pub trait Backend {
    fn create_buffer(
        &mut self,
        device: BackendId,
        desc: &BufferDescriptor,
    ) -> Result<BackendId, BackendError>;

    fn create_texture(
        &mut self,
        device: BackendId,
        desc: &TextureDescriptor,
    ) -> Result<BackendId, BackendError>;

    fn create_shader_module(
        &mut self,
        device: BackendId,
        code: &str,
    ) -> Result<BackendId, BackendError>;

    fn get_queue(&mut self, device: BackendId) -> Result<BackendId, BackendError>;

    /// Destroy `device`. The backend reports the loss through [`Backend::poll_events`].
    fn destroy_device(&mut self, device: BackendId);

    /// Start mapping a range. Completion is observed through [`Backend::completed_serial`].
    fn map_buffer(
        &mut self,
        buffer: BackendId,
        mode: MapMode,
        offset: u64,
        size: u64,
    ) -> Result<(), BackendError>;

    /// Contents of a completed read mapping.
    fn read_mapped(
        &mut self,
        buffer: BackendId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, BackendError>;

    /// Store `data` into a write mapping at `offset`.
    fn write_mapped(
        &mut self,
        buffer: BackendId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    fn unmap_buffer(&mut self, buffer: BackendId);

    fn destroy_buffer(&mut self, buffer: BackendId);

    fn write_buffer(
        &mut self,
        queue: BackendId,
        buffer: BackendId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), BackendError>;

    /// Serial of the most recent submission. Completions requested now are delivered once
    /// [`Backend::completed_serial`] reaches it.
    fn last_submitted_serial(&self) -> Serial;

    fn completed_serial(&self) -> Serial;

    /// Drop the backend object behind a freed client handle.
    fn release(&mut self, object_type: ObjectType, object: BackendId);

    /// Take every event raised since the last call, oldest first.
    fn poll_events(&mut self) -> Vec<BackendEvent>;
}
