//! gpuwire: a GPU command wire between a client that records API calls and a server that runs
//! them on a backend.
//!
//! The pieces live in member crates and are re-exported here:
//! - [`alloc`]: the command allocator and record iterator,
//! - [`serial`]: serial-indexed completion queues,
//! - [`protocol`]: the record format, command schema, serializer and stream decoder,
//! - [`client`] and [`server`]: the two session ends.
//!
//! [`Loopback`] wires a client and a server together in one process through in-memory
//! transports.

pub use gpuwire_alloc as alloc;
pub use gpuwire_client as client;
pub use gpuwire_protocol as protocol;
pub use gpuwire_serial as serial;
pub use gpuwire_server as server;

use gpuwire_client::{Client, ClientError};
use gpuwire_protocol::{MemoryTransport, WireError, WireLimits};
use gpuwire_server::{Backend, BackendId, MemoryBackend, Server};

#[derive(Debug, thiserror::Error)]
pub enum LoopbackError {
    #[error("client: {0}")]
    Client(#[from] ClientError),
    #[error("server: {0}")]
    Server(#[source] WireError),
}

/// What one [`Loopback::pump`] moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    /// Transport messages carrying commands to the server.
    pub command_messages: usize,
    /// Return commands sent to the client.
    pub returns: usize,
    /// Transport messages carrying return commands to the client.
    pub return_messages: usize,
}

/// A client and a server connected by in-memory transports.
pub struct Loopback<B: Backend> {
    pub client: Client,
    pub server: Server<B>,
    to_server: MemoryTransport,
    to_client: MemoryTransport,
}

impl Loopback<MemoryBackend> {
    /// Loopback over a fresh [`MemoryBackend`] with default limits.
    pub fn in_memory() -> Result<Self, LoopbackError> {
        let mut backend = MemoryBackend::new();
        let device = backend.create_device();
        Self::new(backend, device, WireLimits::default())
    }
}

impl<B: Backend> Loopback<B> {
    pub fn new(backend: B, device: BackendId, limits: WireLimits) -> Result<Self, LoopbackError> {
        Ok(Self {
            client: Client::new(limits)?,
            server: Server::new(backend, device, limits).map_err(LoopbackError::Server)?,
            to_server: MemoryTransport::new(),
            to_client: MemoryTransport::new(),
        })
    }

    pub fn backend(&self) -> &B {
        self.server.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.server.backend_mut()
    }

    /// Bytes sent to the server so far.
    pub fn bytes_to_server(&self) -> usize {
        self.to_server.bytes_sent()
    }

    /// Bytes sent to the client so far.
    pub fn bytes_to_client(&self) -> usize {
        self.to_client.bytes_sent()
    }

    /// One round trip: flush the client, run the commands, tick the server, and deliver its
    /// return commands.
    pub fn pump(&mut self) -> Result<PumpStats, LoopbackError> {
        let command_messages = self.client.flush(&mut self.to_server)?;
        for message in self.to_server.drain() {
            self.server
                .handle_commands(&message)
                .map_err(LoopbackError::Server)?;
        }

        self.server.tick().map_err(LoopbackError::Server)?;
        let returns = self.server.pending_returns();
        let return_messages = self
            .server
            .flush(&mut self.to_client)
            .map_err(LoopbackError::Server)?;
        for message in self.to_client.drain() {
            self.client
                .handle_commands(&message)
                .map_err(ClientError::from)?;
        }

        tracing::trace!(command_messages, returns, return_messages, "pumped loopback");
        Ok(PumpStats {
            command_messages,
            returns,
            return_messages,
        })
    }
}
