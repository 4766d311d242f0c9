//! Undo/redo lookahead pairing (spec.md §4.3, "Pairing rule").

use crate::cv::ChangeVector;

#[derive(Debug, Clone)]
pub enum PairedOp {
    Paired(ChangeVector, ChangeVector),
    Single(ChangeVector),
}

/// Greedily pairs adjacent undo/redo change vectors sharing an XID and
/// `dba`; anything else (commit, rollback, DDL, an undo with no matching
/// redo yet) passes through as [`PairedOp::Single`].
pub fn pair_change_vectors(cvs: Vec<ChangeVector>) -> Vec<PairedOp> {
    let mut out = Vec::with_capacity(cvs.len());
    let mut iter = cvs.into_iter().peekable();
    while let Some(cv) = iter.next() {
        if cv.opcode.is_undo() {
            if let Some(next) = iter.peek() {
                if next.opcode.is_redo_row() && next.xid == cv.xid && next.dba == cv.dba {
                    let redo = iter.next().expect("peeked");
                    out.push(PairedOp::Paired(cv, redo));
                    continue;
                }
            }
        }
        out.push(PairedOp::Single(cv));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_common::Xid;
    use redo_format::opcode::Opcode;

    fn cv(opcode: Opcode, xid: Xid, dba: u32) -> ChangeVector {
        ChangeVector { opcode, xid, obj: 1, dba, bdba: dba, slot: 0, flags: 0, columns: vec![], supplemental: vec![] }
    }

    #[test]
    fn pairs_matching_undo_redo() {
        let xid = Xid::new(1, 1, 1);
        let cvs = vec![cv(Opcode::UndoRow, xid, 7), cv(Opcode::InsertRow, xid, 7)];
        let paired = pair_change_vectors(cvs);
        assert_eq!(paired.len(), 1);
        assert!(matches!(paired[0], PairedOp::Paired(_, _)));
    }

    #[test]
    fn mismatched_dba_is_not_paired() {
        let xid = Xid::new(1, 1, 1);
        let cvs = vec![cv(Opcode::UndoRow, xid, 7), cv(Opcode::InsertRow, xid, 8)];
        let paired = pair_change_vectors(cvs);
        assert_eq!(paired.len(), 2);
        assert!(paired.iter().all(|p| matches!(p, PairedOp::Single(_))));
    }

    #[test]
    fn commit_is_always_single() {
        let xid = Xid::new(1, 1, 1);
        let cvs = vec![cv(Opcode::Commit, xid, 0)];
        let paired = pair_change_vectors(cvs);
        assert_eq!(paired.len(), 1);
        assert!(matches!(paired[0], PairedOp::Single(_)));
    }
}
