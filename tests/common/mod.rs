//! Shared helpers for the end-to-end loopback tests.

use std::sync::{Arc, Mutex};

use gpuwire::client::BufferId;
use gpuwire::protocol::{BufferDescriptor, BufferUsages, ObjectType};
use gpuwire::server::{BackendId, MemoryBackend};
use gpuwire::Loopback;

#[allow(dead_code)]
pub type Log<T> = Arc<Mutex<Vec<T>>>;

pub fn loopback() -> Loopback<MemoryBackend> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    Loopback::in_memory().unwrap()
}

#[allow(dead_code)]
pub fn log<T>() -> Log<T> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Callback that appends its argument to `log`.
#[allow(dead_code)]
pub fn record<T: Send + 'static>(log: &Log<T>) -> impl FnOnce(T) + Send + 'static {
    let log = Arc::clone(log);
    move |value| log.lock().unwrap().push(value)
}

#[allow(dead_code)]
pub fn entries<T: Clone>(log: &Log<T>) -> Vec<T> {
    log.lock().unwrap().clone()
}

pub fn buffer(lb: &mut Loopback<MemoryBackend>, size: u64, usage: BufferUsages) -> BufferId {
    let device = lb.client.device();
    lb.client
        .create_buffer(
            device,
            BufferDescriptor {
                size,
                usage,
                mapped_at_creation: false,
            },
        )
        .unwrap()
}

/// Backend object behind a client buffer. Panics unless the server created it successfully.
#[allow(dead_code)]
pub fn backend_buffer(lb: &Loopback<MemoryBackend>, buffer: BufferId) -> BackendId {
    lb.server
        .backend_id(ObjectType::Buffer, buffer.handle())
        .unwrap()
}
