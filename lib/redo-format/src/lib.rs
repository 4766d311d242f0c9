//! Wire-format parsing primitives: headers, checksums, character sets,
//! column decoding, and opcode dispatch.
//!
//! This crate has no notion of threads, files, or transactions — it is the
//! pure, testable bottom layer that `redo-reader` and `redo-parser` build on.

pub mod charset;
pub mod column;
pub mod header;
pub mod metadata;
pub mod opcode;
pub mod scn_codec;

pub use charset::{CharacterSet, Decoder};
pub use column::{decode_number, decode_timestamp, decode_timestamp_tz, decode_varchar};
pub use header::{BlockHeader, BlockOutcome, Endianness, FileHeader, HeaderError};
pub use metadata::{ColumnDef, ColumnKind, InMemorySchema, SchemaProvider, TableDef};
pub use opcode::Opcode;
