//! The Parser's schema collaborator (spec.md §2, "external collaborators").
//!
//! The Parser needs table/column metadata to turn a raw change vector into
//! named columns, but where that metadata comes from — a dictionary dump, a
//! live catalog query, a cached snapshot — is explicitly out of scope (spec.md
//! Non-goals). `SchemaProvider` is the seam: production wiring supplies a
//! real implementation, tests use `InMemorySchema`.

use std::collections::HashMap;

use crate::charset::CharacterSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Number,
    Varchar,
    Date,
    Timestamp,
    TimestampTz,
    Raw,
}

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub col_no: u16,
    pub name: String,
    pub kind: ColumnKind,
    pub charset: CharacterSet,
    pub nullable: bool,
}

#[derive(Debug, Clone)]
pub struct TableDef {
    pub obj: u32,
    pub owner: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableDef {
    pub fn column_by_no(&self, col_no: u16) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.col_no == col_no)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner, self.name)
    }
}

/// Looks up table/column metadata by the object id (`obj`) a change vector
/// names. Implementations decide how that metadata is sourced and kept
/// current; this trait only fixes the read-side contract the Parser needs.
pub trait SchemaProvider: Send + Sync {
    fn table_by_obj(&self, obj: u32) -> Option<TableDef>;
}

/// A fixed, in-memory `SchemaProvider` for tests and for replaying a
/// pre-captured dictionary snapshot.
#[derive(Debug, Default)]
pub struct InMemorySchema {
    tables: HashMap<u32, TableDef>,
}

impl InMemorySchema {
    pub fn new() -> Self {
        InMemorySchema { tables: HashMap::new() }
    }

    pub fn with_table(mut self, table: TableDef) -> Self {
        self.tables.insert(table.obj, table);
        self
    }
}

impl SchemaProvider for InMemorySchema {
    fn table_by_obj(&self, obj: u32) -> Option<TableDef> {
        self.tables.get(&obj).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> TableDef {
        TableDef {
            obj: 42,
            owner: "APP".to_string(),
            name: "ACCOUNTS".to_string(),
            columns: vec![
                ColumnDef {
                    col_no: 0,
                    name: "ID".to_string(),
                    kind: ColumnKind::Number,
                    charset: CharacterSet::Utf8,
                    nullable: false,
                },
                ColumnDef {
                    col_no: 1,
                    name: "NAME".to_string(),
                    kind: ColumnKind::Varchar,
                    charset: CharacterSet::Utf8,
                    nullable: true,
                },
            ],
        }
    }

    #[test]
    fn looks_up_table_by_obj() {
        let schema = InMemorySchema::new().with_table(sample_table());
        let table = schema.table_by_obj(42).expect("table present");
        assert_eq!(table.qualified_name(), "APP.ACCOUNTS");
    }

    #[test]
    fn missing_obj_returns_none() {
        let schema = InMemorySchema::new().with_table(sample_table());
        assert!(schema.table_by_obj(99).is_none());
    }

    #[test]
    fn column_lookup_by_no() {
        let table = sample_table();
        assert_eq!(table.column_by_no(1).unwrap().name, "NAME");
        assert!(table.column_by_no(9).is_none());
    }
}
