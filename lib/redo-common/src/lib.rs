//! Shared types and coordination primitives used by every crate in the redo
//! CDC pipeline: the `Scn`/`Xid` identifiers, the error taxonomy, shutdown
//! coordination, and a few pipeline-wide constants.

pub mod constants;
pub mod error;
pub mod scn;
pub mod shutdown;
pub mod xid;

pub use error::{RedoError, Result};
pub use scn::{Scn, ScnIdx};
pub use shutdown::ClockGuardedShutdown;
pub use xid::Xid;
