//! The 1 MiB `MemoryChunk` unit (spec.md §3) and the module it is charged
//! against.

use redo_common::constants::CHUNK_SIZE;

/// The module a chunk is currently charged against; only `MemoryManager`
/// moves a chunk between modules (spec.md §4.1).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Module {
    Builder,
    Misc,
    Parser,
    Reader,
    Transactions,
    Writer,
}

impl Module {
    pub const ALL: [Module; 6] = [
        Module::Builder,
        Module::Misc,
        Module::Parser,
        Module::Reader,
        Module::Transactions,
        Module::Writer,
    ];
}

/// A fixed 1 MiB aligned buffer. Chunks are heap-allocated individually
/// (rather than sliced from one arena) so a swapped-out chunk can be dropped
/// and a reloaded one allocated fresh without disturbing chunk identity.
pub struct Chunk {
    data: Box<[u8; CHUNK_SIZE]>,
}

impl Chunk {
    pub fn zeroed() -> Self {
        Chunk { data: Box::new([0u8; CHUNK_SIZE]) }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.as_mut_slice()
    }
}

impl std::fmt::Debug for Chunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunk").field("len", &self.data.len()).finish()
    }
}

/// Opaque handle identifying one allocation from the `MemoryManager`. Using
/// an index rather than a raw pointer lets `Transaction`, `Parser`, and
/// `Builder` reference each other's chunks without forming reference cycles
/// (spec.md §9 design note).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_is_chunk_size() {
        let chunk = Chunk::zeroed();
        assert_eq!(chunk.as_slice().len(), CHUNK_SIZE);
    }
}
