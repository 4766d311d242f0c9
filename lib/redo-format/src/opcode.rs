//! Change-vector opcode dispatch (spec.md §4.3, design note in §9).
//!
//! The original system keys behavior off a `(major, minor)` byte pair
//! scattered across a long conditional chain. Packing the pair into a
//! single `u16` (`major << 8 | minor`) turns dispatch into a `match` over a
//! closed `Opcode` enum, which is both cheaper and easier to audit than
//! re-deriving the pair at every call site.

/// A redo/undo change vector's operation, keyed by the packed
/// `(major, minor)` opcode byte pair named in spec.md §4.3.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Opcode {
    /// `05.01` — undo: row-level undo record (insert/update/delete).
    UndoRow,
    /// `05.04` — undo: commit.
    Commit,
    /// `05.06` — undo: rollback to savepoint.
    Rollback,
    /// `05.0B` — undo: transaction chunk continuation.
    UndoChunk,
    /// `0B.02` — redo: insert row piece.
    InsertRow,
    /// `0B.03` — redo: delete row piece.
    DeleteRow,
    /// `0B.04` — redo: row lock; no-op for CDC purposes.
    Lock,
    /// `0B.05` — redo: update row piece.
    UpdateRow,
    /// `0B.06` — redo: overwrite row piece.
    OverwriteRow,
    /// `0B.0B` — redo: insert multiple rows.
    InsertMultiple,
    /// `0B.0C` — redo: delete multiple rows.
    DeleteMultiple,
    /// `0B.10` — redo: supplemental log row image, merged into the prior
    /// op's before/after image rather than emitted on its own.
    SupplementalLog,
    /// `18.01` — DDL: data dictionary language statement text.
    Ddl,
    /// Anything not named above; carried through as opaque bytes.
    Unknown(u16),
}

impl Opcode {
    pub const fn pack(major: u8, minor: u8) -> u16 {
        (major as u16) << 8 | minor as u16
    }

    pub const fn unpack(packed: u16) -> (u8, u8) {
        ((packed >> 8) as u8, packed as u8)
    }

    pub fn from_bytes(major: u8, minor: u8) -> Opcode {
        match Self::pack(major, minor) {
            0x0501 => Opcode::UndoRow,
            0x0504 => Opcode::Commit,
            0x0506 => Opcode::Rollback,
            0x050B => Opcode::UndoChunk,
            0x0B02 => Opcode::InsertRow,
            0x0B03 => Opcode::DeleteRow,
            0x0B04 => Opcode::Lock,
            0x0B05 => Opcode::UpdateRow,
            0x0B06 => Opcode::OverwriteRow,
            0x0B0B => Opcode::InsertMultiple,
            0x0B0C => Opcode::DeleteMultiple,
            0x0B10 => Opcode::SupplementalLog,
            0x1801 => Opcode::Ddl,
            other => Opcode::Unknown(other),
        }
    }

    /// Undo-side opcodes are paired with their redo counterpart by the
    /// Parser's lookahead buffer (spec.md §4.3) before a `RowOp` can be
    /// built; this reports which side a given opcode belongs to.
    pub fn is_undo(self) -> bool {
        matches!(
            self,
            Opcode::UndoRow | Opcode::Commit | Opcode::Rollback | Opcode::UndoChunk
        )
    }

    pub fn is_redo_row(self) -> bool {
        matches!(
            self,
            Opcode::InsertRow
                | Opcode::DeleteRow
                | Opcode::UpdateRow
                | Opcode::OverwriteRow
                | Opcode::InsertMultiple
                | Opcode::DeleteMultiple
        )
    }
}
