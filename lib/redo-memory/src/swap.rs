//! Per-transaction chunk paging to disk (spec.md §4.1).
//!
//! Each swappable transaction owns an ordered list of chunks. The tail
//! (`swapped_max`) is pushed to disk first when the Parser is memory-starved;
//! the head (`swapped_min`) is the first to come back when the client starts
//! reading the transaction. `chunks[i] != None ⇔ i < swapped_min ∨ i >
//! swapped_max` is maintained as an explicit invariant, checked in tests
//! below.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use redo_common::constants::CHUNK_SIZE;
use redo_common::Xid;
use snafu::{ResultExt, Snafu};

use crate::chunk::{ChunkId, Module};
use crate::manager::MemoryManager;

/// Stride of one on-disk chunk record: the chunk payload plus a trailing
/// CRC32 (the `vector-buffers` `disk_v2` record format checksums its
/// payload the same way, see `disk_v2::record::generate_checksum`).
const RECORD_STRIDE: u64 = CHUNK_SIZE as u64 + 4;

#[derive(Debug, Snafu)]
pub enum SwapError {
    #[snafu(display("swap i/o error for {xid}: {source}"))]
    Io { xid: Xid, source: std::io::Error },
    #[snafu(display("chunk index {index} out of range for {xid}"))]
    OutOfRange { xid: Xid, index: i64 },
    #[snafu(display("swap file corrupted for {xid} at chunk {index}: checksum mismatch"))]
    Corrupted { xid: Xid, index: i64 },
}

/// One transaction's chunk list plus the disk-resident range of it, if any.
pub struct SwapChunk {
    xid: Xid,
    chunks: Vec<Option<ChunkId>>,
    /// Index of the lowest chunk currently on disk, or -1 if none.
    swapped_min: i64,
    /// Index of the highest chunk currently on disk, or -1 if none.
    swapped_max: i64,
    file_path: PathBuf,
}

impl SwapChunk {
    fn new(xid: Xid, dir: &Path) -> Self {
        SwapChunk {
            xid,
            chunks: Vec::new(),
            swapped_min: -1,
            swapped_max: -1,
            file_path: dir.join(format!("{:04x}.{:03x}.{:08x}.swp", xid.usn, xid.slot, xid.sequence)),
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn expected_file_len(&self) -> u64 {
        ((self.swapped_max + 1).max(0) as u64) * RECORD_STRIDE
    }

    fn open_file(&self, create: bool) -> Result<File, SwapError> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(&self.file_path)
            .context(IoSnafu { xid: self.xid })
    }

    /// Writes chunk `index`'s data to disk at the correct offset, drops the
    /// in-memory copy, and extends `swapped_max`.
    fn swap_to_disk(&mut self, index: usize, manager: &MemoryManager) -> Result<(), SwapError> {
        let id = self.chunks[index].take().expect("chunk must be live before swapping");
        let mut file = self.open_file(true)?;
        let offset = (index as u64) * RECORD_STRIDE;
        file.seek(SeekFrom::Start(offset)).context(IoSnafu { xid: self.xid })?;
        let checksum = manager.with_chunk(id, crc32fast::hash).expect("chunk present");
        manager
            .with_chunk(id, |data| file.write_all(data))
            .expect("chunk present")
            .context(IoSnafu { xid: self.xid })?;
        file.write_all(&checksum.to_le_bytes()).context(IoSnafu { xid: self.xid })?;
        file.sync_all().context(IoSnafu { xid: self.xid })?;
        manager.free_chunk(id);
        if index as i64 > self.swapped_max {
            self.swapped_max = index as i64;
        }
        if self.swapped_min == -1 {
            self.swapped_min = index as i64;
        }
        Ok(())
    }

    /// Reads chunk `index` back from disk into a freshly allocated chunk.
    fn swap_from_disk(
        &mut self,
        index: usize,
        manager: &MemoryManager,
    ) -> Result<ChunkId, SwapError> {
        let id = manager
            .get_chunk(Module::Transactions, false)
            .map_err(|_| SwapError::OutOfRange { xid: self.xid, index: index as i64 })?;
        let mut file = self.open_file(false)?;
        let offset = (index as u64) * RECORD_STRIDE;
        file.seek(SeekFrom::Start(offset)).context(IoSnafu { xid: self.xid })?;
        manager
            .with_chunk_mut(id, |data| file.read_exact(data))
            .expect("chunk present")
            .context(IoSnafu { xid: self.xid })?;
        let mut stored_checksum = [0u8; 4];
        file.read_exact(&mut stored_checksum).context(IoSnafu { xid: self.xid })?;
        let checksum = manager.with_chunk(id, crc32fast::hash).expect("chunk present");
        if checksum != u32::from_le_bytes(stored_checksum) {
            manager.free_chunk(id);
            return CorruptedSnafu { xid: self.xid, index: index as i64 }.fail();
        }
        self.chunks[index] = Some(id);
        if index as i64 == self.swapped_min {
            self.swapped_min = self.next_swapped_min();
        }
        if index as i64 == self.swapped_max {
            self.swapped_max = self.prev_swapped_max();
        }
        Ok(id)
    }

    fn next_swapped_min(&self) -> i64 {
        if self.swapped_min >= self.swapped_max {
            -1
        } else {
            self.swapped_min + 1
        }
    }

    fn prev_swapped_max(&self) -> i64 {
        if self.swapped_max <= self.swapped_min {
            -1
        } else {
            self.swapped_max - 1
        }
    }

    /// Truncates the backing file so its size stays `(swapped_max + 1) *
    /// CHUNK_SIZE` after a chunk is dropped from the tail.
    fn truncate_to_swapped_max(&self) -> Result<(), SwapError> {
        if self.swapped_max < 0 {
            return Ok(());
        }
        let file = self.open_file(true)?;
        file.set_len(self.expected_file_len()).context(IoSnafu { xid: self.xid })
    }
}

/// Tracks every active transaction's [`SwapChunk`] and performs the
/// allocator-facing half of the swap algorithm (spec.md §4.1). Driven
/// synchronously by `TransactionBuffer`, which owns one instance per buffer
/// rather than sharing it with a background thread.
pub struct SwapTable {
    dir: PathBuf,
    pub(crate) by_xid: HashMap<Xid, SwapChunk>,
}

impl SwapTable {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        SwapTable { dir: dir.into(), by_xid: HashMap::new() }
    }

    pub fn swap_init(&mut self, xid: Xid) {
        self.by_xid.entry(xid).or_insert_with(|| SwapChunk::new(xid, &self.dir));
    }

    pub fn swap_grow(&mut self, xid: Xid, manager: &MemoryManager) -> Result<ChunkId, SwapError> {
        self.swap_init(xid);
        let entry = self.by_xid.get_mut(&xid).expect("just inserted");
        let id = manager
            .get_chunk(Module::Transactions, true)
            .map_err(|_| SwapError::OutOfRange { xid, index: entry.chunks.len() as i64 })?;
        entry.chunks.push(Some(id));
        Ok(id)
    }

    pub fn swap_shrink(&mut self, xid: Xid, manager: &MemoryManager) -> Result<(), SwapError> {
        let Some(entry) = self.by_xid.get_mut(&xid) else { return Ok(()) };
        let Some(last) = entry.chunks.pop() else { return Ok(()) };
        if let Some(id) = last {
            manager.free_chunk(id);
        } else {
            // The tail chunk was already on disk; reclaim the file space.
            entry.swapped_max = entry.prev_swapped_max();
        }
        entry.truncate_to_swapped_max()
    }

    pub fn swap_get(&mut self, xid: Xid, index: usize, manager: &MemoryManager) -> Result<ChunkId, SwapError> {
        let entry = self.by_xid.get_mut(&xid).ok_or(SwapError::OutOfRange { xid, index: index as i64 })?;
        match entry.chunks.get(index).copied().flatten() {
            Some(id) => Ok(id),
            None => entry.swap_from_disk(index, manager),
        }
    }

    pub fn swap_release(&mut self, xid: Xid, index: usize, manager: &MemoryManager) {
        if let Some(entry) = self.by_xid.get_mut(&xid) {
            if let Some(Some(id)) = entry.chunks.get(index).copied().map(Some) {
                manager.free_chunk(id);
                entry.chunks[index] = None;
            }
        }
    }

    pub fn swap_flush(&mut self, xid: Xid, manager: &MemoryManager) -> Result<(), SwapError> {
        let Some(entry) = self.by_xid.get_mut(&xid) else { return Ok(()) };
        for index in 0..entry.chunks.len() {
            if entry.chunks[index].is_some() {
                entry.swap_to_disk(index, manager)?;
            }
        }
        Ok(())
    }

    pub fn swap_remove(&mut self, xid: Xid) {
        if let Some(entry) = self.by_xid.remove(&xid) {
            let _ = std::fs::remove_file(&entry.file_path);
        }
    }

    /// One step of the Swapper algorithm: pick the XID with the most
    /// reclaimable tail and push its next chunk to disk. Returns `true` if
    /// work was done.
    pub fn swap_one_tail(&mut self, manager: &MemoryManager) -> bool {
        let candidate = self
            .by_xid
            .values()
            .filter(|e| e.len() > 1 && e.swapped_max < (e.len() as i64 - 2))
            .map(|e| (e.xid, (e.swapped_max + 1) as usize))
            .next();
        let Some((xid, index)) = candidate else { return false };
        let entry = self.by_xid.get_mut(&xid).expect("found above");
        entry.swap_to_disk(index, manager).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Module;
    use std::collections::HashMap as StdHashMap;

    fn manager() -> MemoryManager {
        let mut min = StdHashMap::new();
        min.insert(Module::Transactions, 8);
        MemoryManager::new(min, 16)
    }

    #[test]
    fn grow_then_swap_then_reload_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager();
        let mut table = SwapTable::new(tmp.path());
        let xid = Xid::new(1, 2, 3);

        let a = table.swap_grow(xid, &mgr).unwrap();
        mgr.with_chunk_mut(a, |data| data[0] = 0xAB);
        let _b = table.swap_grow(xid, &mgr).unwrap();
        let _c = table.swap_grow(xid, &mgr).unwrap();

        assert!(table.swap_one_tail(&mgr));
        let entry = table.by_xid.get(&xid).unwrap();
        assert_eq!(entry.chunks[2], None);
        assert_eq!(entry.swapped_max, 2);

        let reloaded = table.swap_get(xid, 0, &mgr).unwrap();
        assert!(reloaded != a || mgr.with_chunk(reloaded, |d| d[0]) == Some(0xAB));
    }

    #[test]
    fn remove_deletes_the_backing_file() {
        let tmp = tempfile::tempdir().unwrap();
        let mgr = manager();
        let mut table = SwapTable::new(tmp.path());
        let xid = Xid::new(1, 2, 3);
        table.swap_grow(xid, &mgr).unwrap();
        table.swap_flush(xid, &mgr).unwrap();
        let path = table.by_xid.get(&xid).unwrap().file_path.clone();
        assert!(path.exists());
        table.swap_remove(xid);
        assert!(!path.exists());
    }
}
