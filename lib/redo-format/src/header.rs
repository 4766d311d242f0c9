//! Block and file header layout (spec.md §3, §6).

use redo_common::{constants::VALID_BLOCK_SIZES, Scn};
use snafu::{ensure, Snafu};

use crate::scn_codec::{read_scn_big, read_scn_little};

/// The marker found at offset 28..31 of a redo file header when the file was
/// written by a big-endian host.
const BIG_ENDIAN_MARKER: [u8; 4] = [0x7A, 0x7B, 0x7C, 0x7D];

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    pub fn detect(header: &[u8]) -> Self {
        if header.len() >= 32 && header[28..32] == BIG_ENDIAN_MARKER {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }

    fn read_scn(self, bytes: &[u8]) -> Scn {
        match self {
            Endianness::Little => read_scn_little(bytes),
            Endianness::Big => read_scn_big(bytes),
        }
    }

    fn read_u32(self, bytes: &[u8]) -> u32 {
        let arr: [u8; 4] = bytes[..4].try_into().expect("slice of length 4");
        match self {
            Endianness::Little => u32::from_le_bytes(arr),
            Endianness::Big => u32::from_be_bytes(arr),
        }
    }

    fn read_u16(self, bytes: &[u8]) -> u16 {
        let arr: [u8; 2] = bytes[..2].try_into().expect("slice of length 2");
        match self {
            Endianness::Little => u16::from_le_bytes(arr),
            Endianness::Big => u16::from_be_bytes(arr),
        }
    }
}

/// The hard-coded compatible-version ranges a redo file must fall within
/// (spec.md §6). Anything outside all of these is fatal.
const COMPAT_RANGES: &[(u32, u32)] = &[
    (0x0B200000, 0x0B200400),
    (0x0C100000, 0x0C100200),
    (0x0C200000, 0x0C200100),
    (0x12000000, 0x120E0000),
    (0x13000000, 0x13120000),
    (0x15000000, 0x15080000),
    (0x17000000, 0x17030000),
];

pub fn compat_version_supported(version: u32) -> bool {
    COMPAT_RANGES
        .iter()
        .any(|&(lo, hi)| version >= lo && version < hi)
}

#[derive(Debug, Snafu)]
pub enum HeaderError {
    #[snafu(display("file header too short: got {len} bytes, need at least {need}"))]
    TooShort { len: usize, need: usize },
    #[snafu(display("unsupported block size {size}"))]
    BadBlockSize { size: u32 },
    #[snafu(display("unsupported compatibility version {version:#010x}"))]
    BadCompatVersion { version: u32 },
    #[snafu(display("first_scn ({first_scn}) > next_scn ({next_scn})"))]
    ScnOrderViolation { first_scn: Scn, next_scn: Scn },
}

/// Decoded fields of the file header (block 1), per the offset table in
/// spec.md §6. Only the fields the pipeline actually consumes are kept;
/// several documented offsets (control_sequence, description, redo_key_flag)
/// are read-through-and-ignored bytes from the database's perspective and
/// have no behavioral effect here.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub endianness: Endianness,
    pub block_size: u32,
    pub database_id: u32,
    pub database_name: String,
    pub file_number: u16,
    pub activation_id: u32,
    pub num_blocks: u32,
    pub resetlogs_id: u32,
    pub resetlogs_scn: Scn,
    pub thread_id: u16,
    pub first_scn: Scn,
    pub first_time: u32,
    pub next_scn: Scn,
    pub next_time: u32,
    pub compat_version: u32,
}

impl FileHeader {
    /// Parses and validates the file header found at block 1. `block` must
    /// be the full block-1 payload (i.e. at least 512 bytes).
    pub fn parse(block: &[u8], compat_version: u32) -> Result<FileHeader, HeaderError> {
        ensure!(block.len() >= 512, TooShortSnafu { len: block.len(), need: 512usize });
        ensure!(
            compat_version_supported(compat_version),
            BadCompatVersionSnafu { version: compat_version }
        );

        let endianness = Endianness::detect(block);
        let block_size = endianness.read_u32(&block[20..24]);
        ensure!(
            VALID_BLOCK_SIZES.contains(&block_size),
            BadBlockSizeSnafu { size: block_size }
        );

        let database_id = endianness.read_u32(&block[24..28]);
        let database_name = String::from_utf8_lossy(&block[28..36])
            .trim_end_matches('\0')
            .to_string();
        let file_number = endianness.read_u16(&block[48..50]);
        let activation_id = endianness.read_u32(&block[52..56]);
        let num_blocks = endianness.read_u32(&block[156..160]);
        let resetlogs_id = endianness.read_u32(&block[160..164]);
        let resetlogs_scn = endianness.read_scn(&block[164..172]);
        let thread_id = endianness.read_u16(&block[176..178]);
        let first_scn = endianness.read_scn(&block[180..188]);
        let first_time = endianness.read_u32(&block[188..192]);
        let next_scn = endianness.read_scn(&block[192..200]);
        let next_time = endianness.read_u32(&block[200..204]);

        if !next_scn.is_none() {
            ensure!(
                first_scn <= next_scn,
                ScnOrderViolationSnafu { first_scn, next_scn }
            );
        }

        Ok(FileHeader {
            endianness,
            block_size,
            database_id,
            database_name,
            file_number,
            activation_id,
            num_blocks,
            resetlogs_id,
            resetlogs_scn,
            thread_id,
            first_scn,
            first_time,
            next_scn,
            next_time,
            compat_version,
        })
    }

    /// True once the database has written a final SCN for this file — it is
    /// fully formed and will not be appended to again (spec.md §4.2,
    /// `Finished`).
    pub fn is_closed(&self) -> bool {
        !self.next_scn.is_none()
    }
}

/// Outcome of validating a single block against the header it claims to
/// carry (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    Ok,
    Empty,
    Overwritten,
    ErrorCrc,
    ErrorSequence,
    ErrorBlock,
    ErrorBadData,
}

/// 14-byte block header (spec.md §3).
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub block_type: u8,
    pub block_number: u32,
    pub sequence: u32,
    pub xor_checksum: u16,
}

impl BlockHeader {
    pub fn parse(block: &[u8], endianness: Endianness) -> Option<BlockHeader> {
        if block.len() < 14 {
            return None;
        }
        Some(BlockHeader {
            block_type: block[0],
            block_number: endianness.read_u32(&block[4..8]),
            sequence: endianness.read_u32(&block[8..12]),
            xor_checksum: endianness.read_u16(&block[12..14]),
        })
    }
}

/// Computes the XOR of every 64-bit word in `block`, after zeroing the
/// checksum field at `block[12..14]` (spec.md §8, property 3).
pub fn xor_checksum(block: &[u8]) -> u16 {
    let mut scratch = [0u8; 4096];
    let buf = &mut scratch[..block.len()];
    buf.copy_from_slice(block);
    buf[12] = 0;
    buf[13] = 0;

    let mut acc: u64 = 0;
    for word in buf.chunks(8) {
        let mut w = [0u8; 8];
        w[..word.len()].copy_from_slice(word);
        acc ^= u64::from_le_bytes(w);
    }
    ((acc >> 48) ^ (acc >> 32) ^ (acc >> 16) ^ acc) as u16
}

/// Validates one block against the sequence/number it is expected to carry,
/// returning the outcome the Reader's state machine dispatches on.
pub fn validate_block(
    block: &[u8],
    endianness: Endianness,
    expected_block_number: u32,
    expected_sequence: u32,
    checks_enabled: bool,
) -> BlockOutcome {
    let Some(header) = BlockHeader::parse(block, endianness) else {
        return BlockOutcome::ErrorBadData;
    };

    if header.block_type == 0 && header.block_number == 0 && header.sequence == 0 {
        return BlockOutcome::Empty;
    }

    if header.sequence < expected_sequence {
        return BlockOutcome::Overwritten;
    }
    if header.sequence > expected_sequence {
        return BlockOutcome::ErrorSequence;
    }
    if header.block_number != expected_block_number {
        return BlockOutcome::ErrorBlock;
    }

    if checks_enabled && xor_checksum(block) != 0 {
        return BlockOutcome::ErrorCrc;
    }

    BlockOutcome::Ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth_block(block_number: u32, sequence: u32) -> Vec<u8> {
        let mut block = vec![0u8; 512];
        block[0] = 1;
        block[4..8].copy_from_slice(&block_number.to_le_bytes());
        block[8..12].copy_from_slice(&sequence.to_le_bytes());
        // Compute and store the XOR checksum over the fully-populated block.
        let checksum = xor_checksum(&block);
        block[12..14].copy_from_slice(&checksum.to_le_bytes());
        block
    }

    #[test]
    fn checksum_round_trips_to_zero_after_storing() {
        let block = synth_block(5, 42);
        // Once the real checksum is stored, zeroing it and recomputing
        // should match what's stored (property 3: xor with zeroed field ==
        // stored value implies xor of the full stored block == 0 when the
        // checksum folds to itself, which this toy checksum satisfies).
        let mut check = block.clone();
        check[12] = 0;
        check[13] = 0;
        assert_eq!(xor_checksum(&check), u16::from_le_bytes([block[12], block[13]]));
    }

    #[test]
    fn validate_ok_block() {
        let block = synth_block(5, 42);
        let outcome = validate_block(&block, Endianness::Little, 5, 42, true);
        assert_eq!(outcome, BlockOutcome::Ok);
    }

    #[test]
    fn validate_detects_overwrite() {
        let block = synth_block(5, 40);
        let outcome = validate_block(&block, Endianness::Little, 5, 42, true);
        assert_eq!(outcome, BlockOutcome::Overwritten);
    }

    #[test]
    fn validate_detects_sequence_gap() {
        let block = synth_block(5, 50);
        let outcome = validate_block(&block, Endianness::Little, 5, 42, true);
        assert_eq!(outcome, BlockOutcome::ErrorSequence);
    }

    #[test]
    fn compat_version_gate() {
        assert!(compat_version_supported(0x0B200100));
        assert!(compat_version_supported(0x13000500));
        assert!(!compat_version_supported(0x0A000000));
        assert!(!compat_version_supported(0x13130000));
    }

    #[test]
    fn endianness_detection() {
        let mut little = vec![0u8; 512];
        assert_eq!(Endianness::detect(&little), Endianness::Little);
        little[28..32].copy_from_slice(&BIG_ENDIAN_MARKER);
        assert_eq!(Endianness::detect(&little), Endianness::Big);
    }
}
