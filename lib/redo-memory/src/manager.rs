//! Chunk allocation with per-module minimums and a global maximum
//! (spec.md §4.1).

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use snafu::Snafu;

use crate::chunk::{Chunk, ChunkId, Module};

#[derive(Debug, Snafu)]
pub enum MemoryError {
    #[snafu(display(
        "out of memory while parsing: module {module:?} at {used}/{max} chunks \
         (raise memory-max-mb or add the offending XID to skip-xid)"
    ))]
    OutOfMemory { module: Module, used: usize, max: usize },
    #[snafu(display("shutdown while waiting for a free chunk"))]
    ShuttingDown,
}

struct Inner {
    min: HashMap<Module, usize>,
    max_total: usize,
    counts: HashMap<Module, usize>,
    chunks: HashMap<ChunkId, (Module, Chunk)>,
    next_id: u64,
    stopping: bool,
}

impl Inner {
    fn total(&self) -> usize {
        self.chunks.len()
    }

    /// Room is available for `module` if the global pool isn't exhausted, or
    /// if `module` hasn't yet reached the minimum reserved for it — the
    /// Reader and Builder must always be able to make progress even when
    /// every other module has saturated the pool (spec.md §4.1).
    fn has_room(&self, module: Module) -> bool {
        if self.total() < self.max_total {
            return true;
        }
        let used = *self.counts.get(&module).unwrap_or(&0);
        let reserved = *self.min.get(&module).unwrap_or(&0);
        used < reserved
    }
}

/// Allocates and frees 1 MiB chunks against per-module minimums and a
/// global maximum, blocking callers when the pool is saturated. Swap-to-disk
/// of `Transactions`-owned pages is handled by [`crate::swap::SwapTable`],
/// which calls back into this manager to free reclaimed chunks.
pub struct MemoryManager {
    inner: Mutex<Inner>,
    not_full: Condvar,
}

impl MemoryManager {
    pub fn new(min: HashMap<Module, usize>, max_total: usize) -> Self {
        let mut counts = HashMap::new();
        for module in Module::ALL {
            counts.insert(module, 0);
        }
        MemoryManager {
            inner: Mutex::new(Inner {
                min,
                max_total,
                counts,
                chunks: HashMap::new(),
                next_id: 0,
                stopping: false,
            }),
            not_full: Condvar::new(),
        }
    }

    /// Allocates a chunk for `module`. Blocks until room is available or
    /// shutdown is requested; if `may_swap` is false the call fails
    /// immediately with [`MemoryError::OutOfMemory`] instead of waiting.
    pub fn get_chunk(&self, module: Module, may_swap: bool) -> Result<ChunkId, MemoryError> {
        let mut guard = self.inner.lock();
        if !guard.has_room(module) {
            if !may_swap {
                return OutOfMemorySnafu { module, used: guard.total(), max: guard.max_total }.fail();
            }
            loop {
                if guard.stopping {
                    return ShuttingDownSnafu.fail();
                }
                if guard.has_room(module) {
                    break;
                }
                self.not_full.wait_for(&mut guard, Duration::from_secs(10));
            }
        }

        let id = ChunkId(guard.next_id);
        guard.next_id += 1;
        guard.chunks.insert(id, (module, Chunk::zeroed()));
        *guard.counts.entry(module).or_insert(0) += 1;
        Ok(id)
    }

    pub fn free_chunk(&self, id: ChunkId) {
        let mut guard = self.inner.lock();
        if let Some((module, _)) = guard.chunks.remove(&id) {
            if let Some(count) = guard.counts.get_mut(&module) {
                *count = count.saturating_sub(1);
            }
        }
        self.not_full.notify_all();
    }

    pub fn with_chunk<R>(&self, id: ChunkId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = self.inner.lock();
        guard.chunks.get(&id).map(|(_, chunk)| f(chunk.as_slice()))
    }

    pub fn with_chunk_mut<R>(&self, id: ChunkId, f: impl FnOnce(&mut [u8]) -> R) -> Option<R> {
        let mut guard = self.inner.lock();
        guard.chunks.get_mut(&id).map(|(_, chunk)| f(chunk.as_mut_slice()))
    }

    pub fn count_for(&self, module: Module) -> usize {
        *self.inner.lock().counts.get(&module).unwrap_or(&0)
    }

    pub fn total(&self) -> usize {
        self.inner.lock().total()
    }

    pub fn request_shutdown(&self) {
        self.inner.lock().stopping = true;
        self.not_full.notify_all();
    }
}
