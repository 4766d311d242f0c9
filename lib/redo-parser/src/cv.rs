//! Change vectors: one typed operation on a single database block
//! (spec.md §3 "ChangeVector").

use redo_common::Xid;
use redo_format::opcode::Opcode;

/// Flag byte bits. A row fragmented across multiple change vectors chains
/// `FB_F -> FB_N* -> FB_L`; `FB_P` marks a continuation from a prior part
/// (spec.md §3, §8 property 5).
pub mod flags {
    pub const FB_F: u8 = 0x01;
    pub const FB_L: u8 = 0x02;
    pub const FB_P: u8 = 0x04;
    pub const FB_N: u8 = 0x08;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnField {
    pub col_no: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeVector {
    pub opcode: Opcode,
    pub xid: Xid,
    pub obj: u32,
    pub dba: u32,
    pub bdba: u32,
    pub slot: u16,
    pub flags: u8,
    pub columns: Vec<ColumnField>,
    pub supplemental: Vec<ColumnField>,
}

impl ChangeVector {
    pub fn is_first_fragment(&self) -> bool {
        self.flags & flags::FB_F != 0
    }

    pub fn is_last_fragment(&self) -> bool {
        self.flags & flags::FB_L != 0
    }

    /// Decodes one change vector from its framed byte representation (the
    /// record layer hands each CV its own length-prefixed slice; see
    /// [`crate::record`]).
    pub fn parse(bytes: &[u8]) -> Option<ChangeVector> {
        let mut pos = 0;
        let major = *bytes.get(pos)?;
        pos += 1;
        let minor = *bytes.get(pos)?;
        pos += 1;
        let flags = *bytes.get(pos)?;
        pos += 1;
        pos += 1; // reserved/padding byte, keeps the header 8-byte aligned
        let xid_packed = u64::from_le_bytes(bytes.get(pos..pos + 8)?.try_into().ok()?);
        pos += 8;
        let obj = u32::from_le_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let dba = u32::from_le_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let bdba = u32::from_le_bytes(bytes.get(pos..pos + 4)?.try_into().ok()?);
        pos += 4;
        let slot = u16::from_le_bytes(bytes.get(pos..pos + 2)?.try_into().ok()?);
        pos += 2;

        let (columns, next) = Self::parse_fields(bytes, pos)?;
        pos = next;
        let (supplemental, next) = Self::parse_fields(bytes, pos)?;
        pos = next;
        let _ = pos;

        Some(ChangeVector {
            opcode: Opcode::from_bytes(major, minor),
            xid: Xid::unpack(xid_packed),
            obj,
            dba,
            bdba,
            slot,
            flags,
            columns,
            supplemental,
        })
    }

    fn parse_fields(bytes: &[u8], mut pos: usize) -> Option<(Vec<ColumnField>, usize)> {
        let count = u16::from_le_bytes(bytes.get(pos..pos + 2)?.try_into().ok()?) as usize;
        pos += 2;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            let col_no = u16::from_le_bytes(bytes.get(pos..pos + 2)?.try_into().ok()?);
            pos += 2;
            let len = u16::from_le_bytes(bytes.get(pos..pos + 2)?.try_into().ok()?) as usize;
            pos += 2;
            let data = bytes.get(pos..pos + len)?.to_vec();
            pos += len;
            fields.push(ColumnField { col_no, data });
        }
        Some((fields, pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_fields(fields: &[(u16, &[u8])]) -> Vec<u8> {
        let mut out = (fields.len() as u16).to_le_bytes().to_vec();
        for (col_no, data) in fields {
            out.extend_from_slice(&col_no.to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
        }
        out
    }

    fn encode_cv(major: u8, minor: u8, flags: u8, xid: Xid, obj: u32, dba: u32, bdba: u32, slot: u16, columns: &[(u16, &[u8])]) -> Vec<u8> {
        let mut out = vec![major, minor, flags, 0];
        out.extend_from_slice(&xid.pack().to_le_bytes());
        out.extend_from_slice(&obj.to_le_bytes());
        out.extend_from_slice(&dba.to_le_bytes());
        out.extend_from_slice(&bdba.to_le_bytes());
        out.extend_from_slice(&slot.to_le_bytes());
        out.extend_from_slice(&encode_fields(columns));
        out.extend_from_slice(&encode_fields(&[]));
        out
    }

    #[test]
    fn parses_s1_style_insert_cv() {
        let xid = Xid::new(0x0001, 0x002, 0x00000003);
        let bytes = encode_cv(0x0B, 0x02, flags::FB_F | flags::FB_L, xid, 42, 7, 7, 3, &[
            (0, &[0xC1, 0x2B]),
            (1, &[0x68, 0x69]),
        ]);
        let cv = ChangeVector::parse(&bytes).unwrap();
        assert_eq!(cv.opcode, Opcode::InsertRow);
        assert_eq!(cv.xid, xid);
        assert_eq!(cv.obj, 42);
        assert!(cv.is_first_fragment() && cv.is_last_fragment());
        assert_eq!(cv.columns.len(), 2);
        assert_eq!(cv.columns[0].data, vec![0xC1, 0x2B]);
    }

    #[test]
    fn truncated_bytes_fail_to_parse() {
        assert!(ChangeVector::parse(&[0x0B, 0x02]).is_none());
    }
}
