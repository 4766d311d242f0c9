//! `BuilderMsg` header and the output-ring wire framing (spec.md §4.5).

use redo_common::Scn;

/// `flags` bits on a [`BuilderMsg`] (spec.md §4.5).
pub mod flags {
    /// `data` lives in a side-allocated buffer rather than inline after the header.
    pub const ALLOCATED: u8 = 0x01;
    /// The Writer has received `CONFIRM` covering this message.
    pub const CONFIRMED: u8 = 0x02;
    /// A pseudo-message carrying the client-resume watermark at an LWN boundary.
    pub const CHECKPOINT: u8 = 0x04;
    /// Carries a serialized `RowOp`/DDL/commit frame rather than control data.
    pub const REDO: u8 = 0x08;
}

/// One entry in the Builder's output-buffer ring (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderMsg {
    pub id: u64,
    pub queue_id: u64,
    pub scn: Scn,
    pub lwn_scn: Scn,
    pub lwn_idx: u64,
    pub flags: u8,
    pub data: Vec<u8>,
}

impl BuilderMsg {
    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn is_checkpoint(&self) -> bool {
        self.flags & flags::CHECKPOINT != 0
    }

    /// Header + data framing used by [`crate::ring::OutputRing`]:
    /// `id, queue_id, scn, lwn_scn, lwn_idx, flags, data_len, data`. Public
    /// so the Writer can compute ring offsets without re-deriving framing.
    pub fn encoded_len(&self) -> usize {
        8 + 8 + 8 + 8 + 8 + 1 + 4 + self.data.len()
    }

    pub(crate) fn encode_into(&self, out: &mut [u8]) {
        let mut pos = 0;
        macro_rules! put {
            ($bytes:expr) => {{
                let b = $bytes;
                out[pos..pos + b.len()].copy_from_slice(&b);
                pos += b.len();
            }};
        }
        put!(self.id.to_le_bytes());
        put!(self.queue_id.to_le_bytes());
        put!(self.scn.get().to_le_bytes());
        put!(self.lwn_scn.get().to_le_bytes());
        put!(self.lwn_idx.to_le_bytes());
        out[pos] = self.flags;
        pos += 1;
        put!((self.data.len() as u32).to_le_bytes());
        out[pos..pos + self.data.len()].copy_from_slice(&self.data);
    }

    /// Decodes one message starting at `bytes[0]`, returning it plus the
    /// number of bytes consumed. `None` if `bytes` doesn't hold a full frame.
    pub(crate) fn decode_from(bytes: &[u8]) -> Option<(BuilderMsg, usize)> {
        if bytes.len() < 45 {
            return None;
        }
        let id = u64::from_le_bytes(bytes[0..8].try_into().ok()?);
        let queue_id = u64::from_le_bytes(bytes[8..16].try_into().ok()?);
        let scn = Scn::new(u64::from_le_bytes(bytes[16..24].try_into().ok()?));
        let lwn_scn = Scn::new(u64::from_le_bytes(bytes[24..32].try_into().ok()?));
        let lwn_idx = u64::from_le_bytes(bytes[32..40].try_into().ok()?);
        let flags = bytes[40];
        let data_len = u32::from_le_bytes(bytes[41..45].try_into().ok()?) as usize;
        if bytes.len() < 45 + data_len {
            return None;
        }
        let data = bytes[45..45 + data_len].to_vec();
        Some((BuilderMsg { id, queue_id, scn, lwn_scn, lwn_idx, flags, data }, 45 + data_len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let msg = BuilderMsg {
            id: 1,
            queue_id: 2,
            scn: Scn::new(100),
            lwn_scn: Scn::new(100),
            lwn_idx: 3,
            flags: flags::REDO,
            data: vec![1, 2, 3, 4],
        };
        let mut buf = vec![0u8; msg.encoded_len()];
        msg.encode_into(&mut buf);
        let (decoded, consumed) = BuilderMsg::decode_from(&buf).unwrap();
        assert_eq!(consumed, buf.len());
        assert_eq!(decoded, msg);
    }

    #[test]
    fn checkpoint_flag_is_recognized() {
        let msg = BuilderMsg { id: 0, queue_id: 0, scn: Scn::zero(), lwn_scn: Scn::zero(), lwn_idx: 0, flags: flags::CHECKPOINT, data: vec![] };
        assert!(msg.is_checkpoint());
    }
}
