//! Per-XID append-only oplog with commit/rollback drain (spec.md §4.4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use redo_common::{Scn, Xid};
use redo_memory::swap::SwapTable;
use redo_memory::MemoryManager;
use snafu::Snafu;
use tracing::warn;

use crate::page::{read_trailer, write_trailer, OpEntry, PAGE_PAYLOAD_LEN};

#[derive(Debug, Snafu)]
pub enum TxnError {
    #[snafu(display("transaction {xid} exceeded transaction_size_max and is configured fatal"))]
    TooBig { xid: Xid },
    #[snafu(display("memory error while appending to {xid}: {source}"))]
    Memory { xid: Xid, source: redo_memory::MemoryError },
    #[snafu(display("swap error while appending to {xid}: {source}"))]
    Swap { xid: Xid, source: redo_memory::SwapError },
    #[snafu(display("unknown transaction {xid}"))]
    Unknown { xid: Xid },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OversizePolicy {
    Skip,
    Fatal,
}

/// Transaction metadata (spec.md §3 "Transaction"). The oplog bytes
/// themselves live in pages managed by [`SwapTable`], keyed by `xid`.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub xid: Xid,
    pub begin_scn: Scn,
    pub begin_time: u32,
    pub first_sequence: u32,
    pub last_sequence: u32,
    pub commit_scn: Option<Scn>,
    pub rollback_flag: bool,
    pub size_bytes: u64,
    pub too_big: bool,
    page_count: usize,
}

impl Transaction {
    fn new(xid: Xid, begin_scn: Scn, begin_time: u32, sequence: u32) -> Self {
        Transaction {
            xid,
            begin_scn,
            begin_time,
            first_sequence: sequence,
            last_sequence: sequence,
            commit_scn: None,
            rollback_flag: false,
            size_bytes: 0,
            too_big: false,
            page_count: 0,
        }
    }
}

pub struct TransactionBuffer {
    transactions: HashMap<Xid, Transaction>,
    swap: SwapTable,
    manager: Arc<MemoryManager>,
    skip_xids: HashSet<Xid>,
    transaction_size_max: u64,
    oversize_policy: OversizePolicy,
}

impl TransactionBuffer {
    pub fn new(
        manager: Arc<MemoryManager>,
        swap_dir: impl Into<std::path::PathBuf>,
        transaction_size_max: u64,
        oversize_policy: OversizePolicy,
    ) -> Self {
        TransactionBuffer {
            transactions: HashMap::new(),
            swap: SwapTable::new(swap_dir),
            manager,
            skip_xids: HashSet::new(),
            transaction_size_max,
            oversize_policy,
        }
    }

    pub fn skip(&mut self, xid: Xid) {
        self.skip_xids.insert(xid);
    }

    pub fn is_active(&self, xid: Xid) -> bool {
        self.transactions.contains_key(&xid)
    }

    /// Appends one undo/redo (or unpaired) entry to `xid`'s oplog.
    pub fn append(
        &mut self,
        xid: Xid,
        scn: Scn,
        time: u32,
        sequence: u32,
        opcode_tag: u16,
        data1: Vec<u8>,
        data2: Vec<u8>,
    ) -> Result<(), TxnError> {
        if self.skip_xids.contains(&xid) {
            return Ok(());
        }
        let entry = OpEntry { opcode_tag, data1, data2 };
        let entry_len = entry.encoded_len();
        assert!(entry_len <= PAGE_PAYLOAD_LEN, "single op too large for one page");

        let is_new = !self.transactions.contains_key(&xid);
        if is_new {
            self.transactions.insert(xid, Transaction::new(xid, scn, time, sequence));
        }

        let tail_index = {
            let txn = self.transactions.get(&xid).expect("inserted above");
            txn.page_count
        };
        let needs_new_page = if tail_index == 0 {
            true
        } else {
            let chunk = self
                .swap
                .swap_get(xid, tail_index - 1, &self.manager)
                .map_err(|source| TxnError::Swap { xid, source })?;
            let used = self.manager.with_chunk(chunk, read_trailer).expect("chunk present").0;
            used as usize + entry_len > PAGE_PAYLOAD_LEN
        };

        let write_index = if needs_new_page {
            self.swap.swap_grow(xid, &self.manager).map_err(|source| TxnError::Swap { xid, source })?;
            let txn = self.transactions.get_mut(&xid).expect("inserted above");
            txn.page_count += 1;
            txn.page_count - 1
        } else {
            tail_index - 1
        };

        let chunk = self
            .swap
            .swap_get(xid, write_index, &self.manager)
            .map_err(|source| TxnError::Swap { xid, source })?;
        self.manager
            .with_chunk_mut(chunk, |buf| {
                let (used, count) = read_trailer(buf);
                let used = used as usize;
                entry.encode_into(&mut buf[used..used + entry_len]);
                write_trailer(buf, (used + entry_len) as u64, count + 1);
            })
            .expect("chunk present");

        let txn = self.transactions.get_mut(&xid).expect("inserted above");
        txn.size_bytes += entry_len as u64;
        txn.last_sequence = sequence;
        if txn.size_bytes > self.transaction_size_max {
            txn.too_big = true;
            match self.oversize_policy {
                OversizePolicy::Skip => warn!(%xid, "transaction exceeded transaction_size_max, skipping"),
                OversizePolicy::Fatal => return TooBigSnafu { xid }.fail(),
            }
        }
        Ok(())
    }

    /// Marks `xid` as explicit rollback (spec.md §4.4 "Rollback semantics",
    /// kind 1) and discards its pages; the Builder never sees its ops.
    pub fn rollback(&mut self, xid: Xid) {
        if let Some(txn) = self.transactions.get_mut(&xid) {
            txn.rollback_flag = true;
        }
        self.swap.swap_remove(xid);
        self.transactions.remove(&xid);
    }

    /// Walks `xid`'s oplog in append order, returning every stored entry;
    /// the caller (Parser/Builder glue) decodes columns and emits `RowOp`s,
    /// then a terminal `COMMIT`. Removes the transaction afterward.
    pub fn drain_for_commit(&mut self, xid: Xid, commit_scn: Scn) -> Result<(Transaction, Vec<OpEntry>), TxnError> {
        let mut txn = self.transactions.remove(&xid).ok_or(TxnError::Unknown { xid })?;
        txn.commit_scn = Some(commit_scn);

        let mut entries = Vec::new();
        for index in 0..txn.page_count {
            let chunk = self.swap.swap_get(xid, index, &self.manager).map_err(|source| TxnError::Swap { xid, source })?;
            let bytes = self.manager.with_chunk(chunk, |buf| {
                let (used, _count) = read_trailer(buf);
                buf[..used as usize].to_vec()
            }).expect("chunk present");
            let mut pos = 0;
            while pos < bytes.len() {
                let (entry, consumed) = OpEntry::decode_from(&bytes[pos..]).expect("well-formed page");
                entries.push(entry);
                pos += consumed;
            }
        }
        self.swap.swap_remove(xid);
        Ok((txn, entries))
    }

    pub fn transaction(&self, xid: Xid) -> Option<&Transaction> {
        self.transactions.get(&xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_memory::Module;
    use std::collections::HashMap as StdHashMap;

    fn buffer() -> TransactionBuffer {
        let mut min = StdHashMap::new();
        min.insert(Module::Transactions, 8);
        let manager = Arc::new(MemoryManager::new(min, 32));
        let tmp = tempfile::tempdir().unwrap();
        TransactionBuffer::new(manager, tmp.path(), 1024 * 1024, OversizePolicy::Skip)
    }

    #[test]
    fn append_then_commit_preserves_order() {
        let mut buf = buffer();
        let xid = Xid::new(1, 2, 3);
        buf.append(xid, Scn::new(100), 0, 1, 0x0501, vec![1], vec![]).unwrap();
        buf.append(xid, Scn::new(100), 0, 1, 0x0B02, vec![2], vec![9]).unwrap();

        let (txn, entries) = buf.drain_for_commit(xid, Scn::new(100)).unwrap();
        assert_eq!(txn.xid, xid);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data1, vec![1]);
        assert_eq!(entries[1].data1, vec![2]);
        assert_eq!(entries[1].data2, vec![9]);
        assert!(!buf.is_active(xid));
    }

    #[test]
    fn rollback_discards_without_commit() {
        let mut buf = buffer();
        let xid = Xid::new(1, 2, 3);
        buf.append(xid, Scn::new(100), 0, 1, 0x0501, vec![1], vec![]).unwrap();
        buf.rollback(xid);
        assert!(!buf.is_active(xid));
        assert!(buf.drain_for_commit(xid, Scn::new(101)).is_err());
    }

    #[test]
    fn skipped_xid_never_accumulates() {
        let mut buf = buffer();
        let xid = Xid::new(9, 9, 9);
        buf.skip(xid);
        buf.append(xid, Scn::new(1), 0, 1, 0x0501, vec![1, 2, 3], vec![]).unwrap();
        assert!(!buf.is_active(xid));
    }

    #[test]
    fn oversize_transaction_is_flagged() {
        let mut min = StdHashMap::new();
        min.insert(Module::Transactions, 8);
        let manager = Arc::new(MemoryManager::new(min, 32));
        let tmp = tempfile::tempdir().unwrap();
        let mut buf = TransactionBuffer::new(manager, tmp.path(), 4, OversizePolicy::Skip);
        let xid = Xid::new(1, 1, 1);
        buf.append(xid, Scn::new(1), 0, 1, 0x0501, vec![1, 2, 3, 4, 5], vec![]).unwrap();
        assert!(buf.transaction(xid).unwrap().too_big);
    }
}
