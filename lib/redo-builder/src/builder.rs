//! Ties schema-aware column decoding, the chosen wire encoder, and the
//! output ring together behind [`redo_parser::BuilderSink`] (spec.md §4.5).

use std::sync::Arc;

use bytes::BytesMut;
use redo_common::{Scn, Xid};
use redo_format::metadata::SchemaProvider;
use redo_memory::MemoryManager;
use redo_parser::BuilderSink;
use redo_txn::{RowOp, Terminal};
use tokio_util::codec::Encoder;
use tracing::warn;

use crate::codec::EncodeError;
use crate::event::{row_frame, Frame};
use crate::message::{flags, BuilderMsg};
use crate::ring::OutputRing;

/// Picks which wire encoding `Builder` serializes frames with (spec.md §1,
/// "JSON or tagged binary").
pub trait FrameEncoder: Send {
    fn encode_frame(&mut self, frame: Frame) -> Result<Vec<u8>, EncodeError>;
}

impl<E> FrameEncoder for E
where
    E: Encoder<Frame, Error = EncodeError> + Send,
{
    fn encode_frame(&mut self, frame: Frame) -> Result<Vec<u8>, EncodeError> {
        let mut buf = BytesMut::new();
        self.encode(frame, &mut buf)?;
        Ok(buf.to_vec())
    }
}

/// The Builder (spec.md §4.5): converts `RowOp`/DDL/commit frames into
/// wire bytes and queues them on the output ring, stamping the LWN
/// checkpoint watermark at each flush point.
pub struct Builder<S: SchemaProvider> {
    schema: S,
    encoder: Box<dyn FrameEncoder>,
    ring: Arc<OutputRing>,
    queue_id: u64,
    current_lwn_scn: Scn,
    current_lwn_idx: u64,
}

impl<S: SchemaProvider> Builder<S> {
    pub fn new(schema: S, encoder: Box<dyn FrameEncoder>, manager: Arc<MemoryManager>, max_bytes: u64) -> Self {
        Builder {
            schema,
            encoder,
            ring: Arc::new(OutputRing::new(manager, max_bytes)),
            queue_id: 0,
            current_lwn_scn: Scn::zero(),
            current_lwn_idx: 0,
        }
    }

    pub fn ring(&self) -> Arc<OutputRing> {
        Arc::clone(&self.ring)
    }

    fn push_frame(&mut self, scn: Scn, frame: Frame, flags: u8) {
        let data = match self.encoder.encode_frame(frame) {
            Ok(data) => data,
            Err(err) => {
                warn!(%err, "dropping frame that failed to encode");
                return;
            }
        };
        let msg = BuilderMsg {
            id: self.ring.next_id(),
            queue_id: self.queue_id,
            scn,
            lwn_scn: self.current_lwn_scn,
            lwn_idx: self.current_lwn_idx,
            flags,
            data,
        };
        if let Err(err) = self.ring.push(&msg) {
            warn!(%err, "failed to queue message on the output ring");
        }
    }

    /// Stamps the current `lwn_scn`/`lwn_idx` on subsequent messages and
    /// emits a `CHECKPOINT` pseudo-message carrying the client-resume
    /// watermark (spec.md §4.5, "Flush point").
    pub fn flush_lwn_boundary(&mut self, lwn_scn: Scn, lwn_idx: u64) {
        self.current_lwn_scn = lwn_scn;
        self.current_lwn_idx = lwn_idx;
        let msg = BuilderMsg {
            id: self.ring.next_id(),
            queue_id: self.queue_id,
            scn: lwn_scn,
            lwn_scn,
            lwn_idx,
            flags: flags::CHECKPOINT,
            data: Vec::new(),
        };
        if let Err(err) = self.ring.push(&msg) {
            warn!(%err, "failed to queue checkpoint message");
        }
        self.queue_id += 1;
    }
}

impl<S: SchemaProvider> BuilderSink for Builder<S> {
    fn emit_row_op(&mut self, scn: Scn, xid: Xid, row_op: RowOp) {
        let frame = row_frame(&self.schema, scn, xid, &row_op);
        self.push_frame(scn, frame, flags::REDO);
    }

    fn emit_ddl(&mut self, scn: Scn, xid: Xid, sql: String) {
        self.push_frame(scn, Frame::Ddl { scn, xid, sql }, flags::REDO);
    }

    fn emit_terminal(&mut self, scn: Scn, terminal: Terminal) {
        if let Terminal::Commit { scn, xid, .. } = terminal {
            self.push_frame(scn, Frame::Commit { scn, xid }, flags::REDO);
        }
    }

    fn flush_lwn_boundary(&mut self, lwn_scn: Scn, lwn_idx: u64) {
        Builder::flush_lwn_boundary(self, lwn_scn, lwn_idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonEncoder;
    use redo_format::metadata::InMemorySchema;
    use redo_memory::Module;
    use redo_txn::RowId;
    use std::collections::HashMap;

    fn manager() -> Arc<MemoryManager> {
        let mut min = HashMap::new();
        min.insert(Module::Builder, 8);
        Arc::new(MemoryManager::new(min, 32))
    }

    #[test]
    fn emits_row_then_commit_and_checkpoint_stamps_lwn() {
        let mut builder = Builder::new(InMemorySchema::new(), Box::new(JsonEncoder), manager(), 4 * redo_common::constants::CHUNK_SIZE as u64);
        let xid = Xid::new(1, 2, 3);
        let row_id = RowId { obj: 42, dba: 7, slot: 0 };
        let row_op = RowOp::insert(42, row_id, vec![]);

        builder.flush_lwn_boundary(Scn::new(500), 7);
        builder.emit_row_op(Scn::new(100), xid, row_op);
        builder.emit_terminal(Scn::new(100), Terminal::Commit { scn: Scn::new(100), xid, commit_time: 0 });

        let ring = builder.ring();
        let messages = ring.read_from(0);
        assert_eq!(messages.len(), 3);
        assert!(messages[0].1.is_checkpoint());
        assert_eq!(messages[1].1.lwn_scn, Scn::new(500));
        assert_eq!(messages[1].1.lwn_idx, 7);
    }
}
