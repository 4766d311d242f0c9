//! The Reader/Parser ring buffer of [`Chunk`](redo_memory::Chunk)s
//! (spec.md §4.2).
//!
//! `buffer_start`/`buffer_end` are logical byte offsets since the file was
//! opened. The Reader appends by allocating a fresh chunk from the
//! `MemoryManager` whenever the tail chunk fills; the Parser consumes from
//! the front and the buffer reclaims chunks once fully read.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use redo_common::constants::CHUNK_SIZE;
use redo_memory::{ChunkId, MemoryError, MemoryManager, Module};

struct State {
    chunks: VecDeque<ChunkId>,
    /// Logical byte offset of `chunks[0]`'s first byte.
    base_offset: u64,
    buffer_start: u64,
    buffer_end: u64,
}

/// A byte-addressable ring of chunks shared between one Reader and its
/// Parser (spec.md §4.2, "Ring-buffer contract").
pub struct RingBuffer {
    manager: Arc<MemoryManager>,
    state: Mutex<State>,
    not_full: Condvar,
    not_empty: Condvar,
    max_bytes: u64,
}

impl RingBuffer {
    pub fn new(manager: Arc<MemoryManager>, max_bytes: u64) -> Self {
        RingBuffer {
            manager,
            state: Mutex::new(State { chunks: VecDeque::new(), base_offset: 0, buffer_start: 0, buffer_end: 0 }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            max_bytes,
        }
    }

    pub fn buffer_start(&self) -> u64 {
        self.state.lock().buffer_start
    }

    pub fn buffer_end(&self) -> u64 {
        self.state.lock().buffer_end
    }

    pub fn available(&self) -> u64 {
        let s = self.state.lock();
        s.buffer_end - s.buffer_start
    }

    /// Reserves `len` bytes of writable tail space, allocating chunks as
    /// needed, blocking while `buffer_end - buffer_start == max_bytes`
    /// (spec.md §4.2). Returns the chunk ids and intra-chunk byte ranges the
    /// caller should write into, in order.
    pub fn reserve_write(&self, len: u64) -> Result<Vec<(ChunkId, usize, usize)>, MemoryError> {
        let mut guard = self.state.lock();
        while guard.buffer_end - guard.buffer_start + len > self.max_bytes {
            self.not_full.wait_for(&mut guard, Duration::from_millis(200));
        }

        let mut spans = Vec::new();
        let mut remaining = len;
        let mut write_offset = guard.buffer_end;
        while remaining > 0 {
            let chunk_index = ((write_offset - guard.base_offset) / CHUNK_SIZE as u64) as usize;
            if chunk_index >= guard.chunks.len() {
                let id = self.manager.get_chunk(Module::Reader, true)?;
                guard.chunks.push_back(id);
            }
            let chunk_id = guard.chunks[chunk_index];
            let within = (write_offset - guard.base_offset) as usize % CHUNK_SIZE;
            let take = remaining.min((CHUNK_SIZE - within) as u64) as usize;
            spans.push((chunk_id, within, take));
            write_offset += take as u64;
            remaining -= take as u64;
        }
        Ok(spans)
    }

    /// Publishes bytes written via [`Self::reserve_write`] so the Parser can
    /// see them; `bytes` must equal the length previously reserved.
    pub fn advance_end(&self, bytes: u64) {
        let mut guard = self.state.lock();
        guard.buffer_end += bytes;
        drop(guard);
        self.not_empty.notify_all();
    }

    /// Reserves space for `data`, copies it in, and publishes it — the
    /// Reader's one-shot way to append a validated block (spec.md §4.2).
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), MemoryError> {
        let spans = self.reserve_write(data.len() as u64)?;
        let mut cursor = 0usize;
        for (chunk, within, take) in spans {
            self.manager.with_chunk_mut(chunk, |buf| buf[within..within + take].copy_from_slice(&data[cursor..cursor + take]));
            cursor += take;
        }
        self.advance_end(data.len() as u64);
        Ok(())
    }

    /// Reads out up to `max_len` published bytes starting at `buffer_start`
    /// without consuming them (the Parser re-reads until it calls
    /// [`Self::advance_start`]).
    pub fn peek(&self, max_len: u64) -> Vec<u8> {
        let guard = self.state.lock();
        let avail = guard.buffer_end - guard.buffer_start;
        let len = avail.min(max_len);
        let mut out = Vec::with_capacity(len as usize);
        let mut offset = guard.buffer_start;
        let mut remaining = len;
        while remaining > 0 {
            let chunk_index = ((offset - guard.base_offset) / CHUNK_SIZE as u64) as usize;
            let within = (offset - guard.base_offset) as usize % CHUNK_SIZE;
            let take = remaining.min((CHUNK_SIZE - within) as u64) as usize;
            let chunk_id = guard.chunks[chunk_index];
            self.manager.with_chunk(chunk_id, |data| out.extend_from_slice(&data[within..within + take]));
            offset += take as u64;
            remaining -= take as u64;
        }
        out
    }

    /// Consumer-side advance: frees any chunk that is now entirely behind
    /// `buffer_start`.
    pub fn advance_start(&self, bytes: u64) {
        let mut guard = self.state.lock();
        guard.buffer_start += bytes;
        while let Some(&front) = guard.chunks.front() {
            let chunk_start = guard.base_offset;
            if chunk_start + CHUNK_SIZE as u64 > guard.buffer_start {
                break;
            }
            guard.chunks.pop_front();
            guard.base_offset += CHUNK_SIZE as u64;
            self.manager.free_chunk(front);
        }
        drop(guard);
        self.not_full.notify_all();
    }

    /// Blocks until at least one byte is published or `timeout` elapses.
    pub fn wait_not_empty(&self, timeout: Duration) {
        let mut guard = self.state.lock();
        if guard.buffer_end == guard.buffer_start {
            self.not_empty.wait_for(&mut guard, timeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> Arc<MemoryManager> {
        let mut min = HashMap::new();
        min.insert(Module::Reader, 4);
        Arc::new(MemoryManager::new(min, 8))
    }

    #[test]
    fn write_then_read_round_trips() {
        let mgr = manager();
        let ring = RingBuffer::new(mgr.clone(), 4 * CHUNK_SIZE as u64);
        let payload = b"hello ring buffer";
        let spans = ring.reserve_write(payload.len() as u64).unwrap();
        let mut cursor = 0;
        for (chunk, within, take) in spans {
            mgr.with_chunk_mut(chunk, |data| data[within..within + take].copy_from_slice(&payload[cursor..cursor + take]));
            cursor += take;
        }
        ring.advance_end(payload.len() as u64);

        let out = ring.peek(payload.len() as u64);
        assert_eq!(out, payload);
        ring.advance_start(payload.len() as u64);
        assert_eq!(ring.available(), 0);
    }

    #[test]
    fn spans_cross_chunk_boundary() {
        let mgr = manager();
        let ring = RingBuffer::new(mgr.clone(), 4 * CHUNK_SIZE as u64);
        let near_boundary = CHUNK_SIZE as u64 - 4;
        ring.advance_end(0);
        let spans = ring.reserve_write(near_boundary).unwrap();
        assert_eq!(spans.len(), 1);
        let spans2 = ring.reserve_write(16).unwrap();
        assert_eq!(spans2.len(), 2, "second write should straddle the chunk boundary");
    }
}
