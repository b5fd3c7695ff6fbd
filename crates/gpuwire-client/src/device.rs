use std::collections::BTreeMap;

use gpuwire_protocol::{DeviceLostReason, ErrorType, LoggingType, PopErrorScopeStatus};

pub type UncapturedErrorCallback = Box<dyn FnMut(ErrorType, &str) + Send>;
pub type DeviceLostCallback = Box<dyn FnOnce(DeviceLostReason, &str) + Send>;
pub type LoggingCallback = Box<dyn FnMut(LoggingType, &str) + Send>;
/// Completion callback of `Client::pop_error_scope`.
pub type PopErrorScopeCallback = Box<dyn FnOnce(PopErrorScopeStatus, ErrorType, &str) + Send>;

/// Client stub for a device.
#[derive(Default)]
pub(crate) struct Device {
    pub error_callback: Option<UncapturedErrorCallback>,
    pub lost_callback: Option<DeviceLostCallback>,
    pub logging_callback: Option<LoggingCallback>,
    pub pending_pops: BTreeMap<u64, PopErrorScopeCallback>,
    next_request_serial: u64,
    pub lost: bool,
}

impl Device {
    /// Mark the device lost and fire its lost callback, at most once per device.
    pub fn lose(&mut self, reason: DeviceLostReason, message: &str) {
        self.lost = true;
        if let Some(callback) = self.lost_callback.take() {
            callback(reason, message);
        }
    }

    pub fn next_request_serial(&mut self) -> u64 {
        let serial = self.next_request_serial;
        self.next_request_serial += 1;
        serial
    }

    /// Complete every outstanding pop whose result will never arrive.
    pub fn cancel_pending(&mut self) {
        for (_, callback) in std::mem::take(&mut self.pending_pops) {
            callback(PopErrorScopeStatus::Unknown, ErrorType::Unknown, "");
        }
    }
}
