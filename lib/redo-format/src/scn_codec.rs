//! Wire encoding for `Scn` values (spec.md §6).
//!
//! An SCN is stored as 6 bytes when it fits in 47 bits; once it doesn't, the
//! database switches to an 8-byte form and sets the top bit of byte 5 as a
//! marker, with bytes 6-7 extending the high bits.

use redo_common::Scn;

const WIDE_MARKER_BIT: u8 = 0x80;

/// Reads a little-endian-encoded SCN field, handling both the narrow (6
/// byte) and wide (8 byte) forms.
pub fn read_scn_little(bytes: &[u8]) -> Scn {
    debug_assert!(bytes.len() >= 6);
    if bytes.len() >= 8 && bytes[5] & WIDE_MARKER_BIT != 0 {
        let low = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
        let high = u16::from_le_bytes([bytes[4], bytes[5] & !WIDE_MARKER_BIT]) as u64;
        let ext = u16::from_le_bytes([bytes[6], bytes[7]]) as u64;
        Scn::new(low | (high << 32) | (ext << 48))
    } else {
        let low = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as u64;
        let high = u16::from_le_bytes([bytes[4], bytes[5]]) as u64;
        Scn::new(low | (high << 32))
    }
}

/// Reads a big-endian-encoded SCN field (used when the file header's
/// endianness marker indicates a big-endian-authored log).
pub fn read_scn_big(bytes: &[u8]) -> Scn {
    debug_assert!(bytes.len() >= 6);
    if bytes.len() >= 8 && bytes[2] & WIDE_MARKER_BIT != 0 {
        let low = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as u64;
        let high = u16::from_be_bytes([bytes[2] & !WIDE_MARKER_BIT, bytes[3]]) as u64;
        let ext = u16::from_be_bytes([bytes[0], bytes[1]]) as u64;
        Scn::new(low | (high << 32) | (ext << 48))
    } else {
        let low = u32::from_be_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as u64;
        let high = u16::from_be_bytes([bytes[0], bytes[1]]) as u64;
        Scn::new(low | (high << 32))
    }
}

/// Writes `scn` in the little-endian wire form, choosing the narrow or wide
/// encoding automatically. Used only by tests to exercise the round-trip
/// invariant (spec.md §8, property 6); the pipeline itself never originates
/// redo bytes.
pub fn write_scn_little(scn: Scn, out: &mut [u8; 8]) -> usize {
    let data = scn.get();
    if data >> 47 == 0 {
        out[0..4].copy_from_slice(&(data as u32).to_le_bytes());
        out[4..6].copy_from_slice(&((data >> 32) as u16).to_le_bytes());
        6
    } else {
        out[0..4].copy_from_slice(&(data as u32).to_le_bytes());
        let high = ((data >> 32) as u16) | 0x8000;
        out[4..6].copy_from_slice(&high.to_le_bytes());
        out[6..8].copy_from_slice(&((data >> 48) as u16).to_le_bytes());
        8
    }
}

/// Writes `scn` in the big-endian wire form, mirroring [`read_scn_big`]'s
/// byte layout (narrow: 2-byte high followed by a 4-byte low; wide: a
/// 2-byte extension, then a marker-tagged 2-byte high, then the 4-byte
/// low). Used only by tests to exercise the round-trip invariant (spec.md
/// §8, property 6) on big-endian-authored logs.
pub fn write_scn_big(scn: Scn, out: &mut [u8; 8]) -> usize {
    let data = scn.get();
    if data >> 47 == 0 {
        let high = (data >> 32) as u16;
        out[0..2].copy_from_slice(&high.to_be_bytes());
        out[2..6].copy_from_slice(&(data as u32).to_be_bytes());
        6
    } else {
        let ext = (data >> 48) as u16;
        let high = ((data >> 32) as u16) | 0x8000;
        out[0..2].copy_from_slice(&ext.to_be_bytes());
        out[2..4].copy_from_slice(&high.to_be_bytes());
        out[4..8].copy_from_slice(&(data as u32).to_be_bytes());
        8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn narrow_round_trip() {
        let scn = Scn::new(0x0000_7FFF_FFFF_FFFF);
        let mut buf = [0u8; 8];
        let n = write_scn_little(scn, &mut buf);
        assert_eq!(n, 6);
        assert_eq!(read_scn_little(&buf[..6]), scn);
    }

    #[test]
    fn wide_round_trip() {
        let scn = Scn::new(0x0003_FFFF_FFFF_FFFF);
        let mut buf = [0u8; 8];
        let n = write_scn_little(scn, &mut buf);
        assert_eq!(n, 8);
        assert_eq!(read_scn_little(&buf), scn);
    }

    #[test]
    fn narrow_round_trip_big_endian() {
        let scn = Scn::new(0x0000_7FFF_FFFF_FFFF);
        let mut buf = [0u8; 8];
        let n = write_scn_big(scn, &mut buf);
        assert_eq!(n, 6);
        assert_eq!(read_scn_big(&buf[..6]), scn);
    }

    #[test]
    fn wide_round_trip_big_endian() {
        let scn = Scn::new(0x0003_FFFF_FFFF_FFFF);
        let mut buf = [0u8; 8];
        let n = write_scn_big(scn, &mut buf);
        assert_eq!(n, 8);
        assert_eq!(read_scn_big(&buf), scn);
    }

    proptest! {
        #[test]
        fn round_trip_prop(data in 0u64..(1u64 << 62)) {
            let scn = Scn::new(data);
            let mut buf = [0u8; 8];
            write_scn_little(scn, &mut buf);
            prop_assert_eq!(read_scn_little(&buf), scn);
        }

        #[test]
        fn round_trip_prop_big_endian(data in 0u64..(1u64 << 62)) {
            let scn = Scn::new(data);
            let mut buf = [0u8; 8];
            write_scn_big(scn, &mut buf);
            prop_assert_eq!(read_scn_big(&buf), scn);
        }
    }
}
