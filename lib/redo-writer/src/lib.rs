//! Drains the Builder's output ring to a connected client, tracks
//! acknowledgments, and persists checkpoints through `redo-checkpoint`
//! (spec.md §4.6).

pub mod protocol;
pub mod sent_queue;
pub mod transport;
pub mod writer;

pub use protocol::{Request, Response, StartPosition};
pub use sent_queue::SentQueue;
pub use transport::{FileTransport, InMemoryTransport, Transport, TransportError};
pub use writer::{IncarnationHandle, Writer, WriterError};
