//! Decodes the byte stream between `buffer_start` and `buffer_end` into
//! ordered per-LWN batches of change vectors, then drives the transaction
//! buffer (spec.md §4.3).

pub mod cv;
pub mod lwn;
pub mod pairing;
pub mod parser;
pub mod pump;
pub mod record;

pub use cv::{ChangeVector, ColumnField};
pub use lwn::{LwnError, LwnGroup, LwnHeader, split_lwns};
pub use pairing::{pair_change_vectors, PairedOp};
pub use parser::{BuilderSink, Parser};
pub use pump::Pump;
pub use record::{decode_change_vectors, sort_members, split_records, RawRecord, RecordHeader};
