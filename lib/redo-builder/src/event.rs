//! Converts a [`RowOp`] plus its column decodings into the JSON-shaped
//! [`Frame`] the encoders in [`crate::codec`] serialize (spec.md §4.5).

use redo_common::{Scn, Xid};
use redo_format::column::{decode_number, decode_timestamp, decode_timestamp_tz, decode_varchar};
use redo_format::metadata::{ColumnDef, ColumnKind, SchemaProvider, TableDef};
use redo_txn::{ColVal, RowOp, RowOpKind};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnValue {
    pub name: String,
    pub value: Value,
}

/// Everything the Builder can hand the Writer: a decoded row change, a DDL
/// statement, or a transaction's terminal marker (spec.md §4.5).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Row {
        scn: Scn,
        xid: Xid,
        table: String,
        op: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        before: Option<Vec<ColumnValue>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        after: Option<Vec<ColumnValue>>,
    },
    Ddl {
        scn: Scn,
        xid: Xid,
        sql: String,
    },
    Commit {
        scn: Scn,
        xid: Xid,
    },
}

fn op_name(kind: RowOpKind) -> &'static str {
    match kind {
        RowOpKind::Insert => "insert",
        RowOpKind::Update => "update",
        RowOpKind::Delete => "delete",
    }
}

fn decode_one(def: Option<&ColumnDef>, raw: &[u8]) -> Value {
    if raw.is_empty() {
        return Value::Null;
    }
    match def.map(|d| d.kind) {
        Some(ColumnKind::Number) => decode_number(raw).map(Value::String).unwrap_or(Value::Null),
        Some(ColumnKind::Varchar) => Value::String(decode_varchar(raw, def.expect("kind implies def").charset)),
        Some(ColumnKind::Date) | Some(ColumnKind::Timestamp) => decode_timestamp(raw)
            .map(|ts| Value::String(format_timestamp(&ts)))
            .unwrap_or(Value::Null),
        Some(ColumnKind::TimestampTz) => {
            if raw.len() < 2 {
                return Value::Null;
            }
            let (body, tz) = raw.split_at(raw.len() - 2);
            decode_timestamp_tz(body, [tz[0], tz[1]])
                .map(|v| Value::String(format_timestamp_tz(&v)))
                .unwrap_or(Value::Null)
        }
        Some(ColumnKind::Raw) | None => Value::String(hex_encode(raw)),
    }
}

fn format_timestamp(ts: &redo_format::column::TimestampValue) -> String {
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:09}",
        ts.year, ts.month, ts.day, ts.hour, ts.minute, ts.second, ts.nanos
    )
}

fn format_timestamp_tz(v: &redo_format::column::TimestampTzValue) -> String {
    use redo_format::column::TzOffset;
    let base = format_timestamp(&v.timestamp);
    match &v.tz {
        TzOffset::Fixed { hours, minutes } => format!("{base}{:+03}:{:02}", hours, minutes.abs()),
        TzOffset::Named(name) => format!("{base} {name}"),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_cols(table: Option<&TableDef>, cols: &[ColVal]) -> Vec<ColumnValue> {
    cols.iter()
        .map(|col| {
            let def = table.and_then(|t| t.column_by_no(col.col_no));
            let name = def.map(|d| d.name.clone()).unwrap_or_else(|| format!("col_{}", col.col_no));
            ColumnValue { name, value: decode_one(def, &col.data) }
        })
        .collect()
}

/// Builds a [`Frame::Row`] for `row_op`, looking up `table_id` in `schema` to
/// decode raw column bytes by type (spec.md §4.5 "convert `RowOp` + column
/// decodings into bytes").
pub fn row_frame(schema: &dyn SchemaProvider, scn: Scn, xid: Xid, row_op: &RowOp) -> Frame {
    let table = schema.table_by_obj(row_op.table_id);
    let table_name = table.as_ref().map(|t| t.qualified_name()).unwrap_or_else(|| format!("obj_{}", row_op.table_id));
    Frame::Row {
        scn,
        xid,
        table: table_name,
        op: op_name(row_op.kind).to_string(),
        before: row_op.before.as_ref().map(|cols| decode_cols(table.as_ref(), cols)),
        after: row_op.after.as_ref().map(|cols| decode_cols(table.as_ref(), cols)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redo_format::metadata::{ColumnDef, ColumnKind, InMemorySchema, TableDef};
    use redo_format::CharacterSet;
    use redo_txn::RowId;

    fn schema() -> InMemorySchema {
        InMemorySchema::new().with_table(TableDef {
            obj: 42,
            owner: "APP".to_string(),
            name: "ACCOUNTS".to_string(),
            columns: vec![
                ColumnDef { col_no: 0, name: "ID".to_string(), kind: ColumnKind::Number, charset: CharacterSet::Utf8, nullable: false },
                ColumnDef { col_no: 1, name: "NAME".to_string(), kind: ColumnKind::Varchar, charset: CharacterSet::Utf8, nullable: true },
            ],
        })
    }

    #[test]
    fn s1_insert_decodes_number_and_varchar() {
        let schema = schema();
        let row_id = RowId { obj: 42, dba: 7, slot: 3 };
        let row_op = RowOp::insert(
            42,
            row_id,
            vec![
                ColVal { col_no: 0, data: vec![0xC1, 0x2B], flags: 0 },
                ColVal { col_no: 1, data: vec![0x68, 0x69], flags: 0 },
            ],
        );
        let frame = row_frame(&schema, Scn::new(100), Xid::new(1, 2, 3), &row_op);
        match frame {
            Frame::Row { table, op, after, .. } => {
                assert_eq!(table, "APP.ACCOUNTS");
                assert_eq!(op, "insert");
                let after = after.unwrap();
                assert_eq!(after[0].value, Value::String("42".to_string()));
                assert_eq!(after[1].value, Value::String("hi".to_string()));
            }
            _ => panic!("expected a row frame"),
        }
    }

    #[test]
    fn unknown_table_falls_back_to_obj_id() {
        let schema = InMemorySchema::new();
        let row_id = RowId { obj: 99, dba: 1, slot: 0 };
        let row_op = RowOp::delete(99, row_id, vec![ColVal { col_no: 0, data: vec![], flags: 0 }]);
        let frame = row_frame(&schema, Scn::new(1), Xid::new(0, 0, 0), &row_op);
        match frame {
            Frame::Row { table, before, .. } => {
                assert_eq!(table, "obj_99");
                assert_eq!(before.unwrap()[0].value, Value::Null);
            }
            _ => panic!("expected a row frame"),
        }
    }
}
