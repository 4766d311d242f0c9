/// One chunk owned by the memory manager is always exactly this size
/// (spec.md §3, `MemoryChunk`).
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Redo-error retry budget before a corrupted-block condition becomes fatal
/// (spec.md §7).
pub const BAD_CDC_MAX_CNT: u32 = 20;

/// The block sizes a log file's header is allowed to declare (spec.md §3).
pub const VALID_BLOCK_SIZES: [u32; 3] = [512, 1024, 4096];

/// Maximum size of a single LWN, in bytes (spec.md §4.3).
pub const LWN_MAX_BYTES: u64 = 512 * 1024 * 1024;

/// Fixed size of the per-block header every redo block carries ahead of its
/// payload (spec.md §3, `Block`).
pub const BLOCK_HEADER_SIZE: usize = 14;
