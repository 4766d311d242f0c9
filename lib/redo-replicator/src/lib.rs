//! Log file selection (online vs. archive), sequence advancement, and
//! resetlogs (incarnation) handling (spec.md §4.7).

pub mod incarnation;
pub mod replicator;
pub mod selector;

pub use incarnation::{find_resetlogs_change, DbIncarnation};
pub use replicator::{IncarnationSink, Mode, Replicator, ReplicatorConfig};
pub use selector::{scan_archive_dir, sequence_from_filename};
