//! Converts committed `RowOp`s into wire bytes and queues them for the
//! Writer (spec.md §4.5).

pub mod builder;
pub mod codec;
pub mod event;
pub mod message;
pub mod ring;

pub use builder::{Builder, FrameEncoder};
pub use codec::{EncodeError, JsonEncoder, TaggedBinaryEncoder};
pub use event::{row_frame, ColumnValue, Frame};
pub use message::{flags, BuilderMsg};
pub use ring::OutputRing;
