//! Per-transaction oplog buffering and the row-level operations it yields
//! (spec.md §4.4, §3 "Transaction"/"RowOp"/"ColVal").

pub mod buffer;
pub mod page;
pub mod rowop;

pub use buffer::{OversizePolicy, Transaction, TransactionBuffer, TxnError};
pub use page::OpEntry;
pub use rowop::{ColVal, RowId, RowOp, RowOpKind, Terminal};
