use std::collections::VecDeque;

/// Failure reported by a [`Transport`]. Always fatal for the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport failed: {0}")]
pub struct TransportError(pub String);

/// Outgoing byte sink for one direction of the wire.
///
/// Each `send` delivers one message of at most `WireLimits::max_message_size` bytes. Message
/// boundaries carry no meaning for the receiver.
pub trait Transport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }
}

/// In-process transport that queues every message.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    messages: VecDeque<Vec<u8>>,
    bytes_sent: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Total bytes ever sent.
    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.messages.pop_front()
    }

    /// Take every queued message, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = Vec<u8>> + '_ {
        self.messages.drain(..)
    }

    /// Take every queued message concatenated into one byte stream.
    pub fn take_stream(&mut self) -> Vec<u8> {
        self.messages.drain(..).flatten().collect()
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.bytes_sent += bytes.len();
        self.messages.push_back(bytes.to_vec());
        Ok(())
    }
}
