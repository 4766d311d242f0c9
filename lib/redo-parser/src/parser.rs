//! Change-vector analysis driving the [`TransactionBuffer`] and the
//! downstream sink (spec.md §4.3).

use std::collections::HashMap;

use redo_common::{Scn, Xid};
use redo_format::opcode::Opcode;
use redo_txn::{ColVal, OpEntry, RowId, RowOp, Terminal, TransactionBuffer};

use crate::cv::{flags, ChangeVector};
use crate::pairing::{pair_change_vectors, PairedOp};
use crate::record::RawRecord;

/// Where decoded transaction output goes. Implemented by `redo-builder`;
/// kept as a trait here so `redo-parser` never depends on it (spec.md §9,
/// "Cyclic references").
pub trait BuilderSink {
    fn emit_row_op(&mut self, scn: Scn, xid: Xid, row_op: RowOp);
    fn emit_ddl(&mut self, scn: Scn, xid: Xid, sql: String);
    fn emit_terminal(&mut self, scn: Scn, terminal: Terminal);

    /// Called once per completed LWN group, after every one of its records
    /// has been dispatched (spec.md §4.5 "Flush point"). Lets the Builder
    /// stamp `lwn_scn`/`lwn_idx` on pending messages and emit the
    /// client-resume watermark without the LWN-walking code (here,
    /// [`crate::pump::Pump`]) depending on `redo-builder` directly.
    fn flush_lwn_boundary(&mut self, lwn_scn: Scn, lwn_idx: u64);
}

/// Accumulates row-fragment change vectors (`FB_F -> FB_N* -> FB_L`) per
/// `(xid, dba)` until the chain completes (spec.md §8, property 5).
#[derive(Default)]
struct FragmentBuffer {
    pending: HashMap<(Xid, u32), Vec<ChangeVector>>,
}

impl FragmentBuffer {
    /// Feeds one change vector into the buffer. Returns `Some(merged_bytes)`
    /// once `FB_L` closes the chain for every fragmented column, or `None`
    /// while more fragments are expected.
    fn feed(&mut self, cv: &ChangeVector) -> Option<Vec<ChangeVector>> {
        if cv.flags & (flags::FB_F | flags::FB_N | flags::FB_L) == 0 {
            return Some(vec![cv.clone()]);
        }
        let key = (cv.xid, cv.dba);
        let entry = self.pending.entry(key).or_default();
        entry.push(cv.clone());
        if cv.is_last_fragment() {
            Some(self.pending.remove(&key).unwrap_or_default())
        } else {
            None
        }
    }
}

fn merge_columns(fragments: &[ChangeVector]) -> Vec<ColVal> {
    let mut by_col: HashMap<u16, Vec<&[u8]>> = HashMap::new();
    let mut order = Vec::new();
    for frag in fragments {
        for col in &frag.columns {
            if !by_col.contains_key(&col.col_no) {
                order.push(col.col_no);
            }
            by_col.entry(col.col_no).or_default().push(&col.data);
        }
    }
    order
        .into_iter()
        .map(|col_no| {
            let data = RowOp::merge_fragments(&by_col[&col_no]);
            ColVal { col_no, data, flags: 0 }
        })
        .collect()
}

fn with_supplemental(mut cols: Vec<ColVal>, fragments: &[ChangeVector]) -> Vec<ColVal> {
    for frag in fragments {
        for supp in &frag.supplemental {
            cols.push(ColVal { col_no: supp.col_no, data: supp.data.clone(), flags: 0 });
        }
    }
    cols
}

/// A standalone `0x0B.10` change vector carries only supplemental-log
/// columns for the row operation sharing its `(xid, dba)` in the same
/// record — it is never dispatched on its own (spec.md §4.3: "merge into
/// prior op's before/after image"). Folds each one into the matching row
/// change vector's `supplemental` list before pairing/dispatch sees either.
fn merge_supplemental_logs(cvs: Vec<ChangeVector>) -> Vec<ChangeVector> {
    let (supplemental_cvs, mut rest): (Vec<_>, Vec<_>) =
        cvs.into_iter().partition(|cv| cv.opcode == Opcode::SupplementalLog);
    for supp in supplemental_cvs {
        match rest.iter_mut().find(|cv| cv.xid == supp.xid && cv.dba == supp.dba && cv.opcode.is_redo_row()) {
            Some(target) => {
                target.supplemental.extend(supp.columns);
                target.supplemental.extend(supp.supplemental);
            }
            None => tracing::warn!(
                xid = %supp.xid,
                dba = supp.dba,
                "supplemental log change vector has no matching row op in this record"
            ),
        }
    }
    rest
}

/// Drives one record's change vectors through pairing and opcode dispatch.
pub struct Parser {
    fragments: FragmentBuffer,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser { fragments: FragmentBuffer::default() }
    }

    /// Processes one already-sorted record: decodes its change vectors,
    /// pairs undo/redo, and either appends to the transaction's oplog or —
    /// for commit/rollback/DDL — drains and dispatches immediately.
    pub fn process_record(
        &mut self,
        record: &RawRecord,
        txn_buffer: &mut TransactionBuffer,
        sink: &mut dyn BuilderSink,
    ) {
        let cvs = merge_supplemental_logs(crate::record::decode_change_vectors(record));
        let scn = record.header.scn;
        for paired in pair_change_vectors(cvs) {
            match paired {
                PairedOp::Paired(undo, redo) => self.dispatch_row(scn, undo, redo, txn_buffer),
                PairedOp::Single(cv) => self.dispatch_single(scn, cv, txn_buffer, sink),
            }
        }
    }

    fn dispatch_row(&mut self, scn: Scn, undo: ChangeVector, redo: ChangeVector, txn_buffer: &mut TransactionBuffer) {
        let xid = redo.xid;
        let opcode_tag = encode_opcode(redo.opcode);
        let data1 = encode_cv_for_storage(&undo);
        let data2 = encode_cv_for_storage(&redo);
        if let Err(err) = txn_buffer.append(xid, scn, 0, 0, opcode_tag, data1, data2) {
            tracing::warn!(%xid, %err, "dropping change vector pair");
        }
    }

    fn dispatch_single(&mut self, scn: Scn, cv: ChangeVector, txn_buffer: &mut TransactionBuffer, sink: &mut dyn BuilderSink) {
        match cv.opcode {
            Opcode::Commit => self.emit_commit(scn, cv.xid, txn_buffer, sink),
            Opcode::Rollback => {
                // S3: a rolled-back transaction emits nothing downstream.
                txn_buffer.rollback(cv.xid);
            }
            Opcode::Ddl => {
                let sql = cv
                    .columns
                    .first()
                    .map(|c| String::from_utf8_lossy(&c.data).into_owned())
                    .unwrap_or_default();
                sink.emit_ddl(scn, cv.xid, sql);
            }
            // spec.md §4.3: row lock, no-op for CDC purposes.
            Opcode::Lock => {}
            // Insert-multi/delete-multi (`0x0B.0B`/`0x0B.0C`) arrive from the
            // record layer as one change vector per row slot (spec.md
            // §4.3 "iterate `nrow` per-row slots"), so they fold into the
            // same single-row handling as their non-multi counterparts.
            Opcode::InsertRow
            | Opcode::DeleteRow
            | Opcode::UpdateRow
            | Opcode::OverwriteRow
            | Opcode::InsertMultiple
            | Opcode::DeleteMultiple => {
                if let Some(fragments) = self.fragments.feed(&cv) {
                    let cols = with_supplemental(merge_columns(&fragments), &fragments);
                    let row_id = RowId { obj: cv.obj, dba: cv.dba, slot: cv.slot };
                    let row_op = match cv.opcode {
                        Opcode::InsertRow | Opcode::InsertMultiple => RowOp::insert(cv.obj, row_id, cols),
                        Opcode::DeleteRow | Opcode::DeleteMultiple => RowOp::delete(cv.obj, row_id, cols),
                        _ => RowOp::update(cv.obj, row_id, vec![], cols),
                    };
                    sink.emit_row_op(scn, cv.xid, row_op);
                }
            }
            _ => {
                let opcode_tag = encode_opcode(cv.opcode);
                let data1 = encode_cv_for_storage(&cv);
                if let Err(err) = txn_buffer.append(cv.xid, scn, 0, 0, opcode_tag, data1, vec![]) {
                    tracing::warn!(xid = %cv.xid, %err, "dropping unmatched change vector");
                }
            }
        }
    }

    fn emit_commit(&mut self, scn: Scn, xid: Xid, txn_buffer: &mut TransactionBuffer, sink: &mut dyn BuilderSink) {
        let Ok((_txn, entries)) = txn_buffer.drain_for_commit(xid, scn) else { return };
        for entry in entries {
            if let Some((undo, redo)) = decode_stored_pair(&entry) {
                if let Some(fragments) = self.fragments.feed(&redo) {
                    let before = merge_columns(&[undo]);
                    let after = with_supplemental(merge_columns(&fragments), &fragments);
                    let row_id = RowId { obj: redo.obj, dba: redo.dba, slot: redo.slot };
                    sink.emit_row_op(scn, xid, RowOp::update(redo.obj, row_id, before, after));
                }
            }
        }
        sink.emit_terminal(scn, Terminal::Commit { scn, xid, commit_time: 0 });
    }
}

fn encode_opcode(opcode: Opcode) -> u16 {
    match opcode {
        Opcode::UndoRow => Opcode::pack(0x05, 0x01),
        Opcode::Commit => Opcode::pack(0x05, 0x04),
        Opcode::Rollback => Opcode::pack(0x05, 0x06),
        Opcode::UndoChunk => Opcode::pack(0x05, 0x0B),
        Opcode::InsertRow => Opcode::pack(0x0B, 0x02),
        Opcode::DeleteRow => Opcode::pack(0x0B, 0x03),
        Opcode::Lock => Opcode::pack(0x0B, 0x04),
        Opcode::UpdateRow => Opcode::pack(0x0B, 0x05),
        Opcode::OverwriteRow => Opcode::pack(0x0B, 0x06),
        Opcode::InsertMultiple => Opcode::pack(0x0B, 0x0B),
        Opcode::DeleteMultiple => Opcode::pack(0x0B, 0x0C),
        Opcode::SupplementalLog => Opcode::pack(0x0B, 0x10),
        Opcode::Ddl => Opcode::pack(0x18, 0x01),
        Opcode::Unknown(packed) => packed,
    }
}

/// Re-frames a decoded `ChangeVector` back into the same wire format
/// [`ChangeVector::parse`] reads, so it can be stored in the transaction's
/// oplog page and decoded again at commit time.
fn encode_cv_for_storage(cv: &ChangeVector) -> Vec<u8> {
    let (major, minor) = Opcode::unpack(encode_opcode(cv.opcode));
    let mut out = vec![major, minor, cv.flags, 0];
    out.extend_from_slice(&cv.xid.pack().to_le_bytes());
    out.extend_from_slice(&cv.obj.to_le_bytes());
    out.extend_from_slice(&cv.dba.to_le_bytes());
    out.extend_from_slice(&cv.bdba.to_le_bytes());
    out.extend_from_slice(&cv.slot.to_le_bytes());
    encode_fields(&mut out, &cv.columns);
    encode_fields(&mut out, &cv.supplemental);
    out
}

fn encode_fields(out: &mut Vec<u8>, fields: &[crate::cv::ColumnField]) {
    out.extend_from_slice(&(fields.len() as u16).to_le_bytes());
    for f in fields {
        out.extend_from_slice(&f.col_no.to_le_bytes());
        out.extend_from_slice(&(f.data.len() as u16).to_le_bytes());
        out.extend_from_slice(&f.data);
    }
}

fn decode_stored_pair(entry: &OpEntry) -> Option<(ChangeVector, ChangeVector)> {
    let undo = ChangeVector::parse(&entry.data1)?;
    let redo = ChangeVector::parse(&entry.data2)?;
    Some((undo, redo))
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_memory::{MemoryManager, Module};
    use redo_txn::OversizePolicy;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    struct RecordingSink {
        row_ops: Vec<(Xid, RowOp)>,
        terminals: Vec<Terminal>,
    }

    impl BuilderSink for RecordingSink {
        fn emit_row_op(&mut self, _scn: Scn, xid: Xid, row_op: RowOp) {
            self.row_ops.push((xid, row_op));
        }
        fn emit_ddl(&mut self, _scn: Scn, _xid: Xid, _sql: String) {}
        fn emit_terminal(&mut self, _scn: Scn, terminal: Terminal) {
            self.terminals.push(terminal);
        }
        fn flush_lwn_boundary(&mut self, _lwn_scn: Scn, _lwn_idx: u64) {}
    }

    fn txn_buffer() -> TransactionBuffer {
        let mut min = StdHashMap::new();
        min.insert(Module::Transactions, 8);
        let manager = Arc::new(MemoryManager::new(min, 32));
        let tmp = tempfile::tempdir().unwrap();
        TransactionBuffer::new(manager, tmp.path(), 1024 * 1024, OversizePolicy::Skip)
    }

    fn cv(opcode_major: u8, opcode_minor: u8, flags: u8, xid: Xid, dba: u32, columns: Vec<crate::cv::ColumnField>) -> ChangeVector {
        ChangeVector {
            opcode: Opcode::from_bytes(opcode_major, opcode_minor),
            xid,
            obj: 42,
            dba,
            bdba: dba,
            slot: 3,
            flags,
            columns,
            supplemental: vec![],
        }
    }

    #[test]
    fn s1_insert_then_commit_emits_row_op_and_commit() {
        let mut parser = Parser::new();
        let mut buf = txn_buffer();
        let mut sink = RecordingSink { row_ops: vec![], terminals: vec![] };
        let xid = Xid::new(0x0001, 0x002, 0x00000003);

        let undo = cv(0x05, 0x01, flags::FB_F | flags::FB_L, xid, 7, vec![]);
        let redo = cv(
            0x0B,
            0x02,
            flags::FB_F | flags::FB_L,
            xid,
            7,
            vec![
                crate::cv::ColumnField { col_no: 0, data: vec![0xC1, 0x2B] },
                crate::cv::ColumnField { col_no: 1, data: vec![0x68, 0x69] },
            ],
        );
        parser.dispatch_row(Scn::new(100), undo, redo, &mut buf);

        let commit = cv(0x05, 0x04, 0, xid, 0, vec![]);
        parser.dispatch_single(Scn::new(100), commit, &mut buf, &mut sink);

        assert_eq!(sink.row_ops.len(), 1);
        assert_eq!(sink.terminals.len(), 1);
        assert!(matches!(sink.terminals[0], Terminal::Commit { .. }));
    }

    #[test]
    fn s3_rollback_emits_nothing() {
        let mut parser = Parser::new();
        let mut buf = txn_buffer();
        let mut sink = RecordingSink { row_ops: vec![], terminals: vec![] };
        let xid = Xid::new(0x0001, 0x002, 0x00000003);

        let undo = cv(0x05, 0x01, flags::FB_F | flags::FB_L, xid, 7, vec![]);
        let redo = cv(0x0B, 0x02, flags::FB_F | flags::FB_L, xid, 7, vec![]);
        parser.dispatch_row(Scn::new(100), undo, redo, &mut buf);

        let rollback = cv(0x05, 0x06, 0, xid, 0, vec![]);
        parser.dispatch_single(Scn::new(100), rollback, &mut buf, &mut sink);

        assert!(sink.row_ops.is_empty());
        assert!(sink.terminals.is_empty());
        assert!(!buf.is_active(xid));
    }

    #[test]
    fn supplemental_log_merges_into_matching_row_op() {
        let mut sink = RecordingSink { row_ops: vec![], terminals: vec![] };
        let mut buf = txn_buffer();
        let mut parser = Parser::new();
        let xid = Xid::new(0x0001, 0x002, 0x00000003);

        let insert = cv(
            0x0B,
            0x02,
            flags::FB_F | flags::FB_L,
            xid,
            7,
            vec![crate::cv::ColumnField { col_no: 0, data: vec![0xC1, 0x2B] }],
        );
        let supp = cv(
            0x0B,
            0x10,
            0,
            xid,
            7,
            vec![crate::cv::ColumnField { col_no: 1, data: vec![0x68, 0x69] }],
        );

        let merged = merge_supplemental_logs(vec![insert, supp]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].supplemental.len(), 1);
        assert_eq!(merged[0].supplemental[0].col_no, 1);

        parser.dispatch_single(Scn::new(100), merged.into_iter().next().unwrap(), &mut buf, &mut sink);
        assert_eq!(sink.row_ops.len(), 1);
        let (_, row_op) = &sink.row_ops[0];
        assert!(row_op.after.iter().flatten().any(|c| c.col_no == 1));
    }

    #[test]
    fn orphan_supplemental_log_is_dropped_with_warning() {
        let xid = Xid::new(0x0001, 0x002, 0x00000003);
        let supp = cv(0x0B, 0x10, 0, xid, 7, vec![crate::cv::ColumnField { col_no: 1, data: vec![1] }]);
        let merged = merge_supplemental_logs(vec![supp]);
        assert!(merged.is_empty());
    }
}
