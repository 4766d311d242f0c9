use std::io;

use snafu::Snafu;

/// Error kinds as laid out in spec.md §7: each run loop's top-level catch
/// logs one of these and calls into `ClockGuardedShutdown::hard`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RedoError {
    /// Configuration or environment unusable at startup.
    #[snafu(display("boot error: {message}"))]
    Boot { message: String },

    /// Invalid JSON, unknown field, or out-of-range numeric in configuration.
    #[snafu(display("configuration error: {message}"))]
    Configuration { message: String },

    /// Malformed checkpoint, unknown opcode, or schema mismatch.
    #[snafu(display("data error: {message}"))]
    Data { message: String },

    /// Redo stream corruption: header checksum or block-sequence mismatch.
    #[snafu(display("redo error: {message}"))]
    Redo { message: String },

    /// Writer-side transport failure; never fatal on its own.
    #[snafu(display("network error: {source}"))]
    Network { source: io::Error },

    /// I/O error or resource exhaustion outside the redo stream itself.
    #[snafu(display("runtime error: {source}"))]
    Runtime { source: io::Error },

    /// The Parser is blocked on the memory manager and no transaction is
    /// swappable, nor can the Builder be drained.
    #[snafu(display(
        "out of memory while parsing: {message} (raise memory-max-mb or add the offending XID to skip-xid)"
    ))]
    OutOfMemory { message: String },
}

impl RedoError {
    /// Whether this error kind is masked by `disable-checks`, per spec.md §7.
    pub fn maskable(&self) -> bool {
        matches!(self, RedoError::Data { .. })
    }

    pub fn is_fatal(&self) -> bool {
        !matches!(self, RedoError::Network { .. })
    }
}

pub type Result<T, E = RedoError> = std::result::Result<T, E>;
