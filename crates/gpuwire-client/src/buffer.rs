use std::collections::BTreeMap;

use gpuwire_alloc::AllocError;
use gpuwire_protocol::{BufferUsages, MapAsyncStatus, MapMode};

/// Completion callback of `Client::buffer_map_async`.
pub type MapCallback = Box<dyn FnOnce(MapAsyncStatus) + Send>;

pub(crate) struct MapRequest {
    pub mode: MapMode,
    pub offset: u64,
    pub size: u64,
    pub callback: MapCallback,
}

/// Host-visible contents of a mapped buffer.
pub(crate) struct Mapping {
    pub mode: MapMode,
    pub offset: u64,
    pub data: Vec<u8>,
}

/// Client stub for a buffer.
pub(crate) struct Buffer {
    pub size: u64,
    pub usage: BufferUsages,
    pub mapping: Option<Mapping>,
    pub pending_maps: BTreeMap<u64, MapRequest>,
    next_request_serial: u64,
}

impl Buffer {
    pub fn new(size: u64, usage: BufferUsages) -> Self {
        Self {
            size,
            usage,
            mapping: None,
            pending_maps: BTreeMap::new(),
            next_request_serial: 0,
        }
    }

    pub fn next_request_serial(&mut self) -> u64 {
        let serial = self.next_request_serial;
        self.next_request_serial += 1;
        serial
    }

    /// Fire every pending map request with `status`, oldest first.
    pub fn cancel_pending(&mut self, status: MapAsyncStatus) {
        for (_, request) in std::mem::take(&mut self.pending_maps) {
            (request.callback)(status);
        }
    }
}

/// Zero-filled staging for a mapping of `size` bytes.
pub(crate) fn zeroed(size: u64) -> Result<Vec<u8>, AllocError> {
    let len = usize::try_from(size).map_err(|_| AllocError::OutOfMemory {
        requested: usize::MAX,
    })?;
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| AllocError::OutOfMemory { requested: len })?;
    data.resize(len, 0);
    Ok(data)
}
