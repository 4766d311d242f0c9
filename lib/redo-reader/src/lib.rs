//! Reading a single redo log file into a shared ring buffer (spec.md §4.2).

pub mod file;
pub mod ring;
pub mod state;

pub use file::{FileOpenError, LogFile};
pub use ring::RingBuffer;
pub use state::{ReadOutcome, Reader, ReaderState};
