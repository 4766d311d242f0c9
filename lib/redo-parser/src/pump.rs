//! Drives the byte-layer decode between the Reader's ring buffer and the
//! per-record [`Parser`] (spec.md §4.3, "Layered decode" steps 1-3: block
//! layer, LWN layer, record layer). This is what runs on the Parser's own
//! OS thread (spec.md §5): it never touches I/O directly, only the shared
//! [`RingBuffer`] the Reader/Replicator publishes into.

use std::sync::Arc;
use std::time::Duration;

use redo_common::constants::BLOCK_HEADER_SIZE;
use redo_common::ClockGuardedShutdown;
use redo_reader::RingBuffer;
use redo_txn::TransactionBuffer;
use tracing::warn;

use crate::lwn::split_lwns;
use crate::parser::{BuilderSink, Parser};
use crate::record::{sort_members, split_records};

/// Owns the carry-over bytes between ring reads (a partially-received LWN
/// spans many ring reads; up to 512 MiB per spec.md §4.3) and the running
/// LWN index stamped on each [`BuilderSink::flush_lwn_boundary`] call.
pub struct Pump {
    block_size: usize,
    carry: Vec<u8>,
    lwn_idx: u64,
}

impl Pump {
    pub fn new(block_size: usize) -> Self {
        Pump { block_size, carry: Vec::new(), lwn_idx: 0 }
    }

    /// Strips the 14-byte header off every whole block currently published
    /// in `ring`, decodes as many complete LWNs as the now-larger carry
    /// buffer contains, and dispatches every record in each through
    /// `parser`/`txn_buffer`/`sink`. Returns the number of whole blocks
    /// consumed from the ring (0 means "wait for more data").
    pub fn pump_once(
        &mut self,
        ring: &RingBuffer,
        parser: &mut Parser,
        txn_buffer: &mut TransactionBuffer,
        sink: &mut dyn BuilderSink,
    ) -> usize {
        let available = ring.available();
        let whole_blocks = (available / self.block_size as u64) as usize;
        if whole_blocks == 0 {
            return 0;
        }

        let take_bytes = whole_blocks * self.block_size;
        let raw = ring.peek(take_bytes as u64);
        for block in raw.chunks(self.block_size) {
            if block.len() > BLOCK_HEADER_SIZE {
                self.carry.extend_from_slice(&block[BLOCK_HEADER_SIZE..]);
            }
        }
        ring.advance_start(take_bytes as u64);

        match split_lwns(&self.carry) {
            Ok((groups, leftover)) => {
                let consumed = self.carry.len() - leftover;
                for group in &groups {
                    let records = sort_members(split_records(&group.body));
                    for record in &records {
                        parser.process_record(record, txn_buffer, sink);
                    }
                    sink.flush_lwn_boundary(group.header.scn_base, self.lwn_idx);
                    self.lwn_idx += 1;
                }
                self.carry.drain(0..consumed);
            }
            Err(err) => {
                warn!(%err, "dropping unparseable LWN stream, resyncing at next block boundary");
                self.carry.clear();
            }
        }

        whole_blocks
    }

    /// The Parser thread's main loop (spec.md §5 "Parser x1"): pumps until
    /// shutdown, blocking on the ring's not-empty condition when starved
    /// rather than busy-polling.
    pub fn run(
        &mut self,
        ring: &Arc<RingBuffer>,
        parser: &mut Parser,
        txn_buffer: &mut TransactionBuffer,
        sink: &mut dyn BuilderSink,
        shutdown: &ClockGuardedShutdown,
    ) {
        while !shutdown.is_hard() {
            let consumed = self.pump_once(ring, parser, txn_buffer, sink);
            if consumed == 0 {
                if shutdown.is_soft() {
                    break;
                }
                ring.wait_not_empty(Duration::from_millis(200));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_common::{Scn, Xid};
    use redo_memory::{MemoryManager, Module};
    use redo_txn::{OversizePolicy, RowOp, Terminal};
    use std::collections::HashMap;

    const BLOCK_SIZE: usize = 32;

    struct RecordingSink {
        row_ops: Vec<(Xid, RowOp)>,
        commits: Vec<Scn>,
        boundaries: Vec<(Scn, u64)>,
    }

    impl BuilderSink for RecordingSink {
        fn emit_row_op(&mut self, _scn: Scn, xid: Xid, row_op: RowOp) {
            self.row_ops.push((xid, row_op));
        }
        fn emit_ddl(&mut self, _scn: Scn, _xid: Xid, _sql: String) {}
        fn emit_terminal(&mut self, scn: Scn, terminal: Terminal) {
            if matches!(terminal, Terminal::Commit { .. }) {
                self.commits.push(scn);
            }
        }
        fn flush_lwn_boundary(&mut self, lwn_scn: Scn, lwn_idx: u64) {
            self.boundaries.push((lwn_scn, lwn_idx));
        }
    }

    fn ring() -> Arc<RingBuffer> {
        let mut min = HashMap::new();
        min.insert(Module::Reader, 4);
        let manager = Arc::new(MemoryManager::new(min, 16));
        Arc::new(RingBuffer::new(manager, 8 * redo_common::constants::CHUNK_SIZE as u64))
    }

    fn txn_buffer() -> TransactionBuffer {
        let mut min = HashMap::new();
        min.insert(Module::Transactions, 8);
        let manager = Arc::new(MemoryManager::new(min, 32));
        let tmp = tempfile::tempdir().unwrap();
        TransactionBuffer::new(manager, tmp.path(), 1024 * 1024, OversizePolicy::Skip)
    }

    /// Builds one record carrying a single unpaired DDL change vector, then
    /// frames it as a record and wraps the whole thing as one LWN. `sql`
    /// must be exactly 16 bytes so the encoded LWN lands on an exact
    /// multiple of the block payload grain used by the tests below (no
    /// padding needed, so no spurious trailing zero bytes leak into the
    /// decoded stream as a bogus zero-length LWN header).
    fn encode_ddl_lwn(scn: u64, sql: &[u8]) -> Vec<u8> {
        assert_eq!(sql.len(), 16);
        let mut cv = vec![0x18u8, 0x01, 0, 0];
        cv.extend_from_slice(&Xid::new(1, 1, 1).pack().to_le_bytes());
        cv.extend_from_slice(&0u32.to_le_bytes()); // obj
        cv.extend_from_slice(&0u32.to_le_bytes()); // dba
        cv.extend_from_slice(&0u32.to_le_bytes()); // bdba
        cv.extend_from_slice(&0u16.to_le_bytes()); // slot
        cv.extend_from_slice(&1u16.to_le_bytes()); // one column field
        cv.extend_from_slice(&0u16.to_le_bytes()); // col_no
        cv.extend_from_slice(&(sql.len() as u16).to_le_bytes());
        cv.extend_from_slice(sql);
        cv.extend_from_slice(&0u16.to_le_bytes()); // zero supplemental fields

        let mut record = scn.to_le_bytes().to_vec();
        record.extend_from_slice(&0u16.to_le_bytes()); // subscn
        record.extend_from_slice(&1u32.to_le_bytes()); // block
        record.extend_from_slice(&0u32.to_le_bytes()); // offset
        record.extend_from_slice(&1u16.to_le_bytes()); // one cv
        record.extend_from_slice(&(cv.len() as u32).to_le_bytes());
        record.extend_from_slice(&cv);

        let lwn_len = (12 + record.len()) as u32;
        let mut lwn = lwn_len.to_le_bytes().to_vec();
        lwn.extend_from_slice(&0u32.to_le_bytes()); // timestamp
        lwn.extend_from_slice(&scn.to_le_bytes()); // scn_base
        lwn.extend_from_slice(&record);
        lwn
    }

    /// Writes `payload` (length must be an exact multiple of the block
    /// payload grain) as a sequence of full `BLOCK_SIZE` blocks, each
    /// prefixed with an all-zero header `pump_once` strips unconditionally.
    fn push_as_blocks(ring: &RingBuffer, payload: &[u8]) {
        let grain = BLOCK_SIZE - BLOCK_HEADER_SIZE;
        assert_eq!(payload.len() % grain, 0, "test payload must fill whole blocks");
        for chunk in payload.chunks(grain) {
            let mut block = vec![0u8; BLOCK_HEADER_SIZE];
            block.extend_from_slice(chunk);
            ring.write_bytes(&block).unwrap();
        }
    }

    #[test]
    fn pumps_one_ddl_lwn_through_to_the_sink() {
        let ring = ring();
        let payload = encode_ddl_lwn(777, b"XXXXXXXXXXXXXXXX");
        push_as_blocks(&ring, &payload);

        let mut pump = Pump::new(BLOCK_SIZE);
        let mut parser = Parser::new();
        let mut buf = txn_buffer();
        let mut sink = RecordingSink { row_ops: vec![], commits: vec![], boundaries: vec![] };

        let consumed = pump.pump_once(&ring, &mut parser, &mut buf, &mut sink);
        assert!(consumed > 0);
        assert_eq!(sink.boundaries, vec![(Scn::new(777), 0)]);
    }

    #[test]
    fn leftover_bytes_carry_to_the_next_pump() {
        let ring = ring();
        let payload = encode_ddl_lwn(5, b"YYYYYYYYYYYYYYYY");
        // 90 bytes total = 5 blocks of 18; split after 2 blocks so the ring
        // only ever has a block-aligned prefix of the LWN at first.
        let grain = BLOCK_SIZE - BLOCK_HEADER_SIZE;
        let first_half = &payload[..2 * grain];
        push_as_blocks(&ring, first_half);

        let mut pump = Pump::new(BLOCK_SIZE);
        let mut parser = Parser::new();
        let mut buf = txn_buffer();
        let mut sink = RecordingSink { row_ops: vec![], commits: vec![], boundaries: vec![] };

        pump.pump_once(&ring, &mut parser, &mut buf, &mut sink);
        assert!(sink.boundaries.is_empty(), "incomplete LWN must not flush yet");

        push_as_blocks(&ring, &payload[first_half.len()..]);
        pump.pump_once(&ring, &mut parser, &mut buf, &mut sink);
        assert_eq!(sink.boundaries.len(), 1);
    }
}
