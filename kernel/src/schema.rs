// Ledger Table Schema
//
// Every physical ledger table has the same fixed columns.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldType {
    String,
    Int64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FieldMode {
    Required,
    Nullable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub mode: FieldMode,
}

impl FieldSpec {
    fn new(name: &str, field_type: FieldType, mode: FieldMode) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            mode,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub fields: Vec<FieldSpec>,
}

impl TableSchema {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Columns of every ledger table, in declaration order.
pub fn ledger_schema() -> TableSchema {
    use FieldMode::{Nullable, Required};

    TableSchema {
        fields: vec![
            FieldSpec::new("id", FieldType::String, Required),
            FieldSpec::new("revision", FieldType::Int64, Required),
            FieldSpec::new("parent_uid", FieldType::String, Nullable),
            FieldSpec::new("uid", FieldType::String, Required),
            FieldSpec::new("hash", FieldType::String, Required),
            FieldSpec::new("event", FieldType::String, Required),
            FieldSpec::new("version", FieldType::String, Required),
            FieldSpec::new("json", FieldType::String, Required),
        ],
    }
}
