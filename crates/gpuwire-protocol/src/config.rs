use serde::{Deserialize, Serialize};

use crate::{ChunkedCommandCmd, WireError, WIRE_ALIGNMENT};

/// Smallest `max_message_size` that still leaves room for a useful chunk payload.
pub const MIN_MESSAGE_SIZE: usize = 64;

/// Size limits for one wire session. Both ends of a session should agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WireLimits {
    /// Largest message handed to `Transport::send`. Larger records are chunked.
    pub max_message_size: usize,
    /// Largest single record accepted from the stream.
    pub max_record_size: usize,
    /// Largest command accepted through chunk reassembly.
    pub max_chunked_size: usize,
}

impl Default for WireLimits {
    fn default() -> Self {
        Self {
            max_message_size: 64 * 1024,
            max_record_size: 1024 * 1024,
            max_chunked_size: 256 * 1024 * 1024,
        }
    }
}

impl WireLimits {
    pub fn validate(&self) -> Result<(), WireError> {
        if self.max_message_size < MIN_MESSAGE_SIZE {
            return Err(WireError::InvalidLimits("max_message_size is below 64 bytes"));
        }
        if self.max_message_size % WIRE_ALIGNMENT != 0 {
            return Err(WireError::InvalidLimits(
                "max_message_size is not a multiple of 8",
            ));
        }
        if self.max_record_size < self.max_message_size {
            return Err(WireError::InvalidLimits(
                "max_record_size is smaller than max_message_size",
            ));
        }
        if self.max_chunked_size < self.max_record_size {
            return Err(WireError::InvalidLimits(
                "max_chunked_size is smaller than max_record_size",
            ));
        }
        if self.max_chunked_size > u32::MAX as usize {
            return Err(WireError::InvalidLimits(
                "max_chunked_size exceeds the 32-bit record size field",
            ));
        }
        Ok(())
    }

    /// Bytes of command payload carried by one chunk message.
    pub(crate) fn chunk_payload(&self) -> usize {
        (self.max_message_size - ChunkedCommandCmd::SIZE_BYTES) / WIRE_ALIGNMENT * WIRE_ALIGNMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        WireLimits::default().validate().unwrap();
        assert_eq!(WireLimits::default().chunk_payload(), 64 * 1024 - 24);
    }

    #[test]
    fn partial_config_falls_back_to_defaults() {
        let limits: WireLimits = serde_json::from_str(r#"{"max_message_size": 4096}"#).unwrap();
        assert_eq!(limits.max_message_size, 4096);
        assert_eq!(limits.max_record_size, WireLimits::default().max_record_size);
        limits.validate().unwrap();
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(serde_json::from_str::<WireLimits>(r#"{"max_message": 1}"#).is_err());
    }

    #[test]
    fn inconsistent_limits_are_rejected() {
        let tiny = WireLimits {
            max_message_size: 32,
            ..WireLimits::default()
        };
        assert!(matches!(tiny.validate(), Err(WireError::InvalidLimits(_))));

        let unaligned = WireLimits {
            max_message_size: 100,
            ..WireLimits::default()
        };
        assert!(unaligned.validate().is_err());

        let inverted = WireLimits {
            max_record_size: 1024,
            max_chunked_size: 512,
            max_message_size: 512,
        };
        assert!(inverted.validate().is_err());
    }
}
