//! The durable replication position and the lifecycle that guards it
//! (spec.md §4.8 "Checkpoint/Metadata").

pub mod checkpoint;
pub mod lifecycle;
pub mod store;

pub use checkpoint::Checkpoint;
pub use lifecycle::{Metadata, Phase};
pub use store::{DirectoryStateStore, InMemoryStateStore, StateError, StateStore};
