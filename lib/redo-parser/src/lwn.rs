//! LWN (Log Write Number) group framing (spec.md §4.3, "LWN layer").
//!
//! An LWN is a set of records flushed together; it may span up to 512 MiB
//! (spec.md §4.3), so the Parser allocates its working buffer in chunk-sized
//! pieces rather than one contiguous allocation — represented here simply as
//! a `Vec<u8>` since the allocation strategy is a `redo-memory` concern, not
//! a framing one.

use redo_common::constants::LWN_MAX_BYTES;
use redo_common::Scn;
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum LwnError {
    #[snafu(display("LWN header truncated"))]
    Truncated,
    #[snafu(display("LWN body length {len} exceeds the {max} byte span limit"))]
    TooLarge { len: u64, max: u64 },
}

#[derive(Debug, Clone)]
pub struct LwnHeader {
    pub timestamp: u32,
    pub scn_base: Scn,
}

/// One decoded LWN: its header plus the still-framed record bytes (to be
/// split by [`crate::record::split_records`]).
#[derive(Debug, Clone)]
pub struct LwnGroup {
    pub header: LwnHeader,
    pub body: Vec<u8>,
}

/// Splits a byte stream (already stripped of block headers) into LWN
/// groups framed as `lwn_len:u32, timestamp:u32, scn_base:u64, body`.
/// Returns the groups found plus the number of trailing bytes that did not
/// form a complete group (the caller should leave those unconsumed in the
/// ring buffer until more data arrives).
pub fn split_lwns(bytes: &[u8]) -> Result<(Vec<LwnGroup>, usize), LwnError> {
    let mut out = Vec::new();
    let mut pos = 0;
    while pos + 16 <= bytes.len() {
        let lwn_len = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as u64;
        if lwn_len > LWN_MAX_BYTES {
            return TooLargeSnafu { len: lwn_len, max: LWN_MAX_BYTES }.fail();
        }
        if pos as u64 + 4 + lwn_len > bytes.len() as u64 {
            break;
        }
        let timestamp = u32::from_le_bytes(bytes[pos + 4..pos + 8].try_into().unwrap());
        let scn_base = Scn::new(u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap()));
        let body_start = pos + 16;
        let body_end = pos + 4 + lwn_len as usize;
        out.push(LwnGroup { header: LwnHeader { timestamp, scn_base }, body: bytes[body_start..body_end].to_vec() });
        pos = body_end;
    }
    Ok((out, bytes.len() - pos))
}
