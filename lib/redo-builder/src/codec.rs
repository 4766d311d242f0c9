//! JSON and tagged-binary serializers for a [`Frame`], mirroring the
//! `tokio_util::codec::Encoder<Event>` shape the source system's downstream
//! transports already use (spec.md §1, "JSON or tagged binary").

use bytes::{BufMut, BytesMut};
use snafu::{ResultExt, Snafu};
use tokio_util::codec::Encoder;

use crate::event::{ColumnValue, Frame};

#[derive(Debug, Snafu)]
pub enum EncodeError {
    #[snafu(display("failed to serialize frame as JSON: {source}"))]
    Json { source: serde_json::Error },
}

/// One newline-delimited JSON object per frame.
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder;

impl Encoder<Frame> for JsonEncoder {
    type Error = EncodeError;

    fn encode(&mut self, frame: Frame, buffer: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(buffer.writer(), &frame).context(JsonSnafu)?;
        buffer.put_u8(b'\n');
        Ok(())
    }
}

/// Tag byte identifying a [`Frame`] variant in [`TaggedBinaryEncoder`]'s
/// output.
mod tag {
    pub const ROW: u8 = 0;
    pub const DDL: u8 = 1;
    pub const COMMIT: u8 = 2;
}

/// A compact binary framing: `tag:u8, scn:u64, xid:u64` followed by
/// variant-specific fields, all length-prefixed where variable. Used when
/// the downstream client opts out of JSON for throughput (spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct TaggedBinaryEncoder;

impl TaggedBinaryEncoder {
    fn put_str(buffer: &mut BytesMut, s: &str) {
        buffer.put_u32_le(s.len() as u32);
        buffer.put_slice(s.as_bytes());
    }

    fn put_columns(buffer: &mut BytesMut, cols: &Option<Vec<ColumnValue>>) {
        match cols {
            None => buffer.put_u8(0),
            Some(cols) => {
                buffer.put_u8(1);
                buffer.put_u32_le(cols.len() as u32);
                for col in cols {
                    Self::put_str(buffer, &col.name);
                    let value = serde_json::to_vec(&col.value).unwrap_or_default();
                    buffer.put_u32_le(value.len() as u32);
                    buffer.put_slice(&value);
                }
            }
        }
    }
}

impl Encoder<Frame> for TaggedBinaryEncoder {
    type Error = EncodeError;

    fn encode(&mut self, frame: Frame, buffer: &mut BytesMut) -> Result<(), Self::Error> {
        match frame {
            Frame::Row { scn, xid, table, op, before, after } => {
                buffer.put_u8(tag::ROW);
                buffer.put_u64_le(scn.get());
                buffer.put_u64_le(xid.pack());
                Self::put_str(buffer, &table);
                Self::put_str(buffer, &op);
                Self::put_columns(buffer, &before);
                Self::put_columns(buffer, &after);
            }
            Frame::Ddl { scn, xid, sql } => {
                buffer.put_u8(tag::DDL);
                buffer.put_u64_le(scn.get());
                buffer.put_u64_le(xid.pack());
                Self::put_str(buffer, &sql);
            }
            Frame::Commit { scn, xid } => {
                buffer.put_u8(tag::COMMIT);
                buffer.put_u64_le(scn.get());
                buffer.put_u64_le(xid.pack());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_common::{Scn, Xid};

    #[test]
    fn json_encoder_emits_newline_delimited_object() {
        let mut encoder = JsonEncoder;
        let mut buf = BytesMut::new();
        encoder.encode(Frame::Commit { scn: Scn::new(1), xid: Xid::new(1, 1, 1) }, &mut buf).unwrap();
        assert!(buf.ends_with(b"\n"));
        assert!(String::from_utf8(buf[..buf.len() - 1].to_vec()).unwrap().contains("\"type\":\"commit\""));
    }

    #[test]
    fn tagged_binary_encoder_tags_commit() {
        let mut encoder = TaggedBinaryEncoder;
        let mut buf = BytesMut::new();
        encoder.encode(Frame::Commit { scn: Scn::new(1), xid: Xid::new(1, 1, 1) }, &mut buf).unwrap();
        assert_eq!(buf[0], tag::COMMIT);
    }

    #[test]
    fn tagged_binary_encoder_round_trips_row_column_count() {
        let mut encoder = TaggedBinaryEncoder;
        let mut buf = BytesMut::new();
        let frame = Frame::Row {
            scn: Scn::new(1),
            xid: Xid::new(1, 1, 1),
            table: "APP.T".to_string(),
            op: "insert".to_string(),
            before: None,
            after: Some(vec![ColumnValue { name: "ID".to_string(), value: serde_json::Value::String("1".to_string()) }]),
        };
        encoder.encode(frame, &mut buf).unwrap();
        assert_eq!(buf[0], tag::ROW);
    }
}
