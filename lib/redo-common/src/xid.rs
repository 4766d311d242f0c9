use std::fmt;

use serde::{Deserialize, Serialize};

/// Transaction identifier: `(undo_segment_number, slot, sequence)` packed
/// into 64 bits, unique per active transaction within an incarnation.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Xid {
    pub usn: u16,
    pub slot: u16,
    pub sequence: u32,
}

impl Xid {
    pub const fn new(usn: u16, slot: u16, sequence: u32) -> Self {
        Xid { usn, slot, sequence }
    }

    /// Packs into the 64-bit representation the redo stream carries inline
    /// in change-vector headers.
    pub const fn pack(self) -> u64 {
        (self.usn as u64) << 48 | (self.slot as u64) << 32 | self.sequence as u64
    }

    pub const fn unpack(data: u64) -> Self {
        Xid {
            usn: (data >> 48) as u16,
            slot: (data >> 32) as u16,
            sequence: data as u32,
        }
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({})", self)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}.{:03x}.{:08x}", self.usn, self.slot, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let xid = Xid::new(0x0001, 0x002, 0x0000_0003);
        assert_eq!(Xid::unpack(xid.pack()), xid);
    }

    #[test]
    fn display_matches_scenario_s1_format() {
        let xid = Xid::new(0x0001, 0x002, 3);
        assert_eq!(xid.to_string(), "0001.002.00000003");
    }
}
