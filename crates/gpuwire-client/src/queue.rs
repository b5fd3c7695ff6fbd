use std::collections::BTreeMap;

use gpuwire_protocol::WorkDoneStatus;

/// Completion callback of `Client::queue_on_submitted_work_done`.
pub type WorkDoneCallback = Box<dyn FnOnce(WorkDoneStatus) + Send>;

/// Client stub for a queue.
pub(crate) struct Queue {
    pub pending: BTreeMap<u64, WorkDoneCallback>,
    next_request_serial: u64,
}

impl Queue {
    pub fn new() -> Self {
        Self {
            pending: BTreeMap::new(),
            next_request_serial: 0,
        }
    }

    pub fn next_request_serial(&mut self) -> u64 {
        let serial = self.next_request_serial;
        self.next_request_serial += 1;
        serial
    }

    pub fn cancel_pending(&mut self, status: WorkDoneStatus) {
        for (_, callback) in std::mem::take(&mut self.pending) {
            callback(status);
        }
    }
}
