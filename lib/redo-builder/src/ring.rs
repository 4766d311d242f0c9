//! The Builder's output-buffer ring: a byte-addressable, chunk-backed ring
//! the Writer walks from `old_size` and the Builder appends
//! [`BuilderMsg`]s to (spec.md §4.5, §4.6).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use redo_common::constants::CHUNK_SIZE;
use redo_memory::{ChunkId, MemoryError, MemoryManager, Module};

use crate::message::BuilderMsg;

struct State {
    chunks: VecDeque<ChunkId>,
    base_offset: u64,
    buffer_start: u64,
    buffer_end: u64,
}

/// Singly-linked list of chunks holding framed [`BuilderMsg`]s (spec.md
/// §4.5, "Output-buffer ring"). Grounded on the same byte-addressable ring
/// design as the Reader's ring buffer, applied to the `Builder` memory
/// module and message framing instead of raw log bytes.
pub struct OutputRing {
    manager: Arc<MemoryManager>,
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    max_bytes: u64,
    next_id: Mutex<u64>,
}

impl OutputRing {
    pub fn new(manager: Arc<MemoryManager>, max_bytes: u64) -> Self {
        OutputRing {
            manager,
            state: Mutex::new(State { chunks: VecDeque::new(), base_offset: 0, buffer_start: 0, buffer_end: 0 }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            max_bytes,
            next_id: Mutex::new(0),
        }
    }

    pub fn buffer_start(&self) -> u64 {
        self.state.lock().buffer_start
    }

    pub fn buffer_end(&self) -> u64 {
        self.state.lock().buffer_end
    }

    pub fn next_id(&self) -> u64 {
        let mut guard = self.next_id.lock();
        let id = *guard;
        *guard += 1;
        id
    }

    /// Appends one message, allocating chunks through the `MemoryManager`
    /// (`Module::Builder`) as needed and blocking while the ring is at
    /// `max_bytes` (spec.md §4.5, "Back-pressure").
    pub fn push(&self, msg: &BuilderMsg) -> Result<u64, MemoryError> {
        let len = msg.encoded_len() as u64;
        let mut guard = self.state.lock();
        while guard.buffer_end - guard.buffer_start + len > self.max_bytes {
            self.not_full.wait_for(&mut guard, Duration::from_millis(200));
        }

        let start_offset = guard.buffer_end;
        let mut bytes = vec![0u8; len as usize];
        msg.encode_into(&mut bytes);

        let mut cursor = 0usize;
        let mut write_offset = guard.buffer_end;
        while cursor < bytes.len() {
            let chunk_index = ((write_offset - guard.base_offset) / CHUNK_SIZE as u64) as usize;
            if chunk_index >= guard.chunks.len() {
                let id = self.manager.get_chunk(Module::Builder, true)?;
                guard.chunks.push_back(id);
            }
            let chunk_id = guard.chunks[chunk_index];
            let within = (write_offset - guard.base_offset) as usize % CHUNK_SIZE;
            let take = (bytes.len() - cursor).min(CHUNK_SIZE - within);
            self.manager.with_chunk_mut(chunk_id, |buf| buf[within..within + take].copy_from_slice(&bytes[cursor..cursor + take]));
            cursor += take;
            write_offset += take as u64;
        }
        guard.buffer_end = write_offset;
        drop(guard);
        self.not_empty.notify_all();
        Ok(start_offset)
    }

    /// Decodes every complete message starting at ring offset `from`, for
    /// the Writer's walk (spec.md §4.6, "Walk the output-buffer ring from
    /// `old_size`").
    pub fn read_from(&self, from: u64) -> Vec<(u64, BuilderMsg)> {
        let guard = self.state.lock();
        let mut out = Vec::new();
        let mut offset = from.max(guard.buffer_start);
        loop {
            let avail = guard.buffer_end - offset;
            if avail == 0 {
                break;
            }
            let peek_len = avail.min(CHUNK_SIZE as u64 * 2);
            let bytes = Self::read_locked(&guard, &self.manager, offset, peek_len);
            match BuilderMsg::decode_from(&bytes) {
                Some((msg, consumed)) => {
                    let next = offset + consumed as u64;
                    out.push((offset, msg));
                    offset = next;
                }
                None => break,
            }
        }
        out
    }

    fn read_locked(guard: &State, manager: &MemoryManager, start: u64, len: u64) -> Vec<u8> {
        let mut out = Vec::with_capacity(len as usize);
        let mut offset = start;
        let mut remaining = len.min(guard.buffer_end - start);
        while remaining > 0 {
            let chunk_index = ((offset - guard.base_offset) / CHUNK_SIZE as u64) as usize;
            if chunk_index >= guard.chunks.len() {
                break;
            }
            let within = (offset - guard.base_offset) as usize % CHUNK_SIZE;
            let take = remaining.min((CHUNK_SIZE - within) as u64) as usize;
            let chunk_id = guard.chunks[chunk_index];
            manager.with_chunk(chunk_id, |data| out.extend_from_slice(&data[within..within + take]));
            offset += take as u64;
            remaining -= take as u64;
        }
        out
    }

    /// Releases chunks fully behind `bytes`, called once the Writer's
    /// acknowledgment protocol confirms everything up to that offset
    /// (spec.md §4.6, "Acknowledgment protocol").
    pub fn advance_start(&self, bytes: u64) {
        let mut guard = self.state.lock();
        guard.buffer_start = guard.buffer_start.max(bytes);
        while let Some(&front) = guard.chunks.front() {
            if guard.base_offset + CHUNK_SIZE as u64 > guard.buffer_start {
                break;
            }
            guard.chunks.pop_front();
            guard.base_offset += CHUNK_SIZE as u64;
            self.manager.free_chunk(front);
        }
        drop(guard);
        self.not_full.notify_all();
    }

    pub fn wait_not_empty(&self, timeout: Duration) {
        let mut guard = self.state.lock();
        if guard.buffer_end == guard.buffer_start {
            self.not_empty.wait_for(&mut guard, timeout);
        }
    }
}
