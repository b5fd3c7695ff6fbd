mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::{buffer, loopback};
use gpuwire::client::BufferId;
use gpuwire::protocol::{BufferUsages, MapAsyncStatus, MapMode, WorkDoneStatus};

const BUFFER_SIZE: u64 = 64;
const BUFFERS: usize = 6;

struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed)
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        (x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 32) as u32
    }

    fn below(&mut self, n: usize) -> usize {
        self.next_u32() as usize % n
    }
}

/// Hands out callbacks and counts how often each one ran.
#[derive(Default)]
struct Callbacks {
    fired: Vec<Arc<AtomicUsize>>,
}

impl Callbacks {
    fn next<T: 'static>(&mut self) -> impl FnOnce(T) + Send + 'static {
        let count = Arc::new(AtomicUsize::new(0));
        self.fired.push(Arc::clone(&count));
        move |_: T| {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn assert_each_fired_once(&self) {
        for (i, count) in self.fired.iter().enumerate() {
            assert_eq!(count.load(Ordering::SeqCst), 1, "callback {i}");
        }
    }
}

fn usage_for(slot: usize) -> (BufferUsages, MapMode) {
    if slot % 2 == 0 {
        (BufferUsages::MAP_READ | BufferUsages::COPY_DST, MapMode::Read)
    } else {
        (BufferUsages::MAP_WRITE, MapMode::Write)
    }
}

fn run(seed: u64, steps: usize) {
    let mut rng = Rng::new(seed);
    let mut lb = loopback();
    let device = lb.client.device();
    let queue = lb.client.get_queue(device).unwrap();
    let mut callbacks = Callbacks::default();
    let mut buffers: Vec<BufferId> = (0..BUFFERS)
        .map(|slot| buffer(&mut lb, BUFFER_SIZE, usage_for(slot).0))
        .collect();

    for _ in 0..steps {
        let slot = rng.below(BUFFERS);
        let buf = buffers[slot];
        let (usage, mode) = usage_for(slot);
        match rng.below(10) {
            0 | 1 => {
                // Occasionally out of range so the client rejects it locally.
                let offset = rng.below(BUFFER_SIZE as usize + 8) as u64;
                let size = rng.below(BUFFER_SIZE as usize) as u64;
                lb.client
                    .buffer_map_async(buf, mode, offset, size, callbacks.next::<MapAsyncStatus>())
                    .unwrap();
            }
            2 => lb.client.buffer_unmap(buf).unwrap(),
            3 => {
                if rng.below(4) == 0 {
                    lb.client.buffer_destroy(buf).unwrap();
                }
            }
            4 => {
                lb.client.release(buf).unwrap();
                buffers[slot] = buffer(&mut lb, BUFFER_SIZE, usage);
            }
            5 => {
                lb.backend_mut().submit();
            }
            6 => lb.backend_mut().complete_all(),
            7 => {
                lb.pump().unwrap();
            }
            8 => lb
                .client
                .queue_on_submitted_work_done(queue, callbacks.next::<WorkDoneStatus>())
                .unwrap(),
            _ => {
                if let Ok(range) = lb.client.buffer_mapped_range_mut(buf) {
                    let byte = rng.next_u32() as u8;
                    range.fill(byte);
                }
            }
        }
    }

    lb.backend_mut().complete_all();
    lb.pump().unwrap();
    lb.client.disconnect();
    assert_eq!(lb.client.pending_callbacks(), 0);
    callbacks.assert_each_fired_once();
    assert!(!lb.server.is_corrupted());
}

#[test]
fn every_callback_fires_exactly_once() {
    for seed in [1, 0x9E37_79B9_7F4A_7C15, 0xDEAD_BEEF, 42, 7] {
        run(seed, 2_000);
    }
}
