//! The Builder-level logical row operation, produced after undo/redo pairing
//! (spec.md §3 "RowOp"/"ColVal").

use redo_common::{Scn, Xid};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RowOpKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowId {
    pub obj: u32,
    pub dba: u32,
    pub slot: u16,
}

/// One column's pre/post image (spec.md §3 "ColVal"). `data` is the raw,
/// still-undecoded column bytes; decoding happens against a
/// [`redo_format::metadata::ColumnDef`] at emission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColVal {
    pub col_no: u16,
    pub data: Vec<u8>,
    pub flags: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOp {
    pub table_id: u32,
    pub row_id: RowId,
    pub kind: RowOpKind,
    pub before: Option<Vec<ColVal>>,
    pub after: Option<Vec<ColVal>>,
}

impl RowOp {
    pub fn insert(table_id: u32, row_id: RowId, after: Vec<ColVal>) -> Self {
        RowOp { table_id, row_id, kind: RowOpKind::Insert, before: None, after: Some(after) }
    }

    pub fn delete(table_id: u32, row_id: RowId, before: Vec<ColVal>) -> Self {
        RowOp { table_id, row_id, kind: RowOpKind::Delete, before: Some(before), after: None }
    }

    pub fn update(table_id: u32, row_id: RowId, before: Vec<ColVal>, after: Vec<ColVal>) -> Self {
        RowOp { table_id, row_id, kind: RowOpKind::Update, before: Some(before), after: Some(after) }
    }

    /// Merges fragments of an oversize column split across `FB_F -> FB_N* ->
    /// FB_L` change vectors into one contiguous buffer (spec.md §8, property
    /// 5). `fragments` must already be in chain order.
    pub fn merge_fragments(fragments: &[&[u8]]) -> Vec<u8> {
        let total: usize = fragments.iter().map(|f| f.len()).sum();
        let mut out = Vec::with_capacity(total);
        for f in fragments {
            out.extend_from_slice(f);
        }
        out
    }
}

/// A terminal marker emitted once a transaction's oplog is drained
/// (spec.md §8, property 4: exactly one `BEGIN` and one terminal frame).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminal {
    Commit { scn: Scn, xid: Xid, commit_time: u32 },
    Rollback { xid: Xid },
}
