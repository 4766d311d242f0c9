//! Chunked memory allocation and transaction-page swap-to-disk
//! (spec.md §4.1, §3 "MemoryChunk").

pub mod chunk;
pub mod manager;
pub mod swap;

pub use chunk::{Chunk, ChunkId, Module};
pub use manager::{MemoryError, MemoryManager};
pub use swap::{SwapError, SwapTable};
