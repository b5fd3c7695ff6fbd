//! Server half of the gpuwire protocol.
//!
//! [`Server`] decodes the client's command stream, checks every object reference against its
//! identity tables, and executes commands on a [`Backend`]. Stale references make a command a
//! no-op; malformed input corrupts the session. Results of asynchronous requests are queued by
//! backend serial and turned into return commands by [`Server::tick`].

mod backend;
mod dispatch;
mod memory;
mod objects;
mod server;

pub use backend::{Backend, BackendError, BackendEvent, BackendId};
pub use memory::{MemoryBackend, MAX_BUFFER_SIZE};
pub use objects::{Entry, KnownObjects, ReverseIdTable};
pub use server::Server;
