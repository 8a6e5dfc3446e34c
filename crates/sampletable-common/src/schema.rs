//! Table schema definitions
//!
//! A schema is fixed when the table is created: an ordered list of columns,
//! each with a semantic type and a storage mode.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Semantic type of a column
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int,
    Float,
    Bool,
    Str,
    Tensor,
    Bytes,
    /// Arbitrary nested data (lists, maps, mixed scalars)
    Struct,
}

impl ColumnType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::Tensor => "tensor",
            Self::Bytes => "bytes",
            Self::Struct => "struct",
        }
    }

    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Bool)
    }

    /// Coerce a transport-level value into this type.
    ///
    /// `Null` passes through for every type. Lossy conversions are refused:
    /// a float only becomes an int when it has no fractional part.
    pub fn cast(&self, value: Value) -> std::result::Result<Value, Value> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Struct, v) => Ok(v),

            (Self::Int, Value::Int(i)) => Ok(Value::Int(i)),
            #[allow(clippy::cast_possible_truncation)]
            (Self::Int, Value::Float(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Ok(Value::Int(f as i64))
            }
            (Self::Int, Value::Bool(b)) => Ok(Value::Int(i64::from(b))),
            (Self::Int, Value::Str(s)) => s.trim().parse().map(Value::Int).map_err(|_| Value::Str(s)),

            (Self::Float, Value::Float(f)) => Ok(Value::Float(f)),
            #[allow(clippy::cast_precision_loss)]
            (Self::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (Self::Float, Value::Bool(b)) => Ok(Value::Float(if b { 1.0 } else { 0.0 })),
            (Self::Float, Value::Str(s)) => {
                s.trim().parse().map(Value::Float).map_err(|_| Value::Str(s))
            }

            (Self::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (Self::Bool, Value::Int(i)) => Ok(Value::Bool(i != 0)),
            (Self::Bool, Value::Str(s)) => match s.trim() {
                "true" | "True" | "TRUE" | "1" => Ok(Value::Bool(true)),
                "false" | "False" | "FALSE" | "0" => Ok(Value::Bool(false)),
                _ => Err(Value::Str(s)),
            },

            (Self::Str, Value::Str(s)) => Ok(Value::Str(s)),
            (Self::Str, v @ (Value::Int(_) | Value::Float(_) | Value::Bool(_))) => {
                Ok(Value::Str(v.to_string()))
            }
            (Self::Str, Value::Bytes(b)) => {
                String::from_utf8(b).map(Value::Str).map_err(|e| Value::Bytes(e.into_bytes()))
            }

            (Self::Tensor, Value::Tensor(t)) => Ok(Value::Tensor(t)),
            (Self::Tensor, Value::List(items)) => {
                let numbers: Option<Vec<f64>> = items.iter().map(Value::as_f64).collect();
                numbers.map(Value::Tensor).ok_or(Value::List(items))
            }

            (Self::Bytes, Value::Bytes(b)) => Ok(Value::Bytes(b)),
            (Self::Bytes, Value::Str(s)) => Ok(Value::Bytes(s.into_bytes())),

            (_, other) => Err(other),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ColumnType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" | "int32" | "int64" | "integer" | "long" => Ok(Self::Int),
            "float" | "float32" | "float64" | "double" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            "str" | "string" | "text" => Ok(Self::Str),
            "tensor" | "array" | "ndarray" => Ok(Self::Tensor),
            "bytes" | "binary" => Ok(Self::Bytes),
            "struct" | "json" | "object" | "list" | "dict" | "any" => Ok(Self::Struct),
            other => Err(Error::Configuration(format!("unknown column type: {other}"))),
        }
    }
}

/// Where a column's values live
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageMode {
    /// Stored inline in row metadata
    ByValue,
    /// Stored in the blob store; row metadata keeps only the location key
    ByReference,
}

impl StorageMode {
    /// Scalars are small enough to live in the metadata table; everything
    /// else (prompts, responses, logits) goes to the blob store.
    #[must_use]
    pub const fn default_for(column_type: ColumnType) -> Self {
        if column_type.is_scalar() { Self::ByValue } else { Self::ByReference }
    }

    #[must_use]
    pub const fn is_by_value(&self) -> bool {
        matches!(self, Self::ByValue)
    }
}

/// A single column declaration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub column_type: ColumnType,
    pub storage: StorageMode,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, storage: StorageMode) -> Self {
        Self {
            name: name.into(),
            column_type,
            storage,
        }
    }

    /// Column with the storage mode implied by its type
    pub fn with_default_storage(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self::new(name, column_type, StorageMode::default_for(column_type))
    }

    #[must_use]
    pub const fn is_by_reference(&self) -> bool {
        matches!(self.storage, StorageMode::ByReference)
    }
}

/// Schema exchange payload handed to clients on connect
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub column_name: Vec<String>,
    pub column_type: Vec<String>,
    /// `true` = by-value, `false` = by-reference
    pub column_value_mask: Vec<bool>,
}

/// Immutable table schema
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ColumnSpec>", into = "Vec<ColumnSpec>")]
pub struct TableSchema {
    columns: Vec<ColumnSpec>,
    index: HashMap<String, usize>,
}

impl TableSchema {
    /// Build a schema, rejecting empty or duplicate column names
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        if columns.is_empty() {
            return Err(Error::invalid_argument("schema must declare at least one column"));
        }
        let mut index = HashMap::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            if column.name.is_empty() {
                return Err(Error::invalid_argument("column name cannot be empty"));
            }
            if index.insert(column.name.clone(), i).is_some() {
                return Err(Error::invalid_argument(format!(
                    "duplicate column name: {}",
                    column.name
                )));
            }
        }
        Ok(Self { columns, index })
    }

    /// Build a schema from the parallel name/type/mask lists of [`ColumnInfo`]
    pub fn from_info(info: &ColumnInfo) -> Result<Self> {
        let n = info.column_name.len();
        if info.column_type.len() != n || info.column_value_mask.len() != n {
            return Err(Error::shape(format!(
                "column info lists differ in length: {} names, {} types, {} mask entries",
                n,
                info.column_type.len(),
                info.column_value_mask.len()
            )));
        }
        let columns = info
            .column_name
            .iter()
            .zip(&info.column_type)
            .zip(&info.column_value_mask)
            .map(|((name, ty), by_value)| {
                let storage = if *by_value {
                    StorageMode::ByValue
                } else {
                    StorageMode::ByReference
                };
                Ok(ColumnSpec::new(name.clone(), ty.parse()?, storage))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.index_of(name).map(|i| &self.columns[i])
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Look up a column, failing with [`Error::UnknownColumn`]
    pub fn require(&self, name: &str) -> Result<&ColumnSpec> {
        self.column(name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    /// Map a requested column list to schema positions.
    ///
    /// Every name must be declared and appear at most once.
    pub fn resolve_columns(&self, names: &[String]) -> Result<Vec<usize>> {
        let mut seen = HashSet::with_capacity(names.len());
        names
            .iter()
            .map(|name| {
                let idx = self
                    .index_of(name)
                    .ok_or_else(|| Error::UnknownColumn(name.clone()))?;
                if !seen.insert(idx) {
                    return Err(Error::invalid_argument(format!(
                        "column listed more than once: {name}"
                    )));
                }
                Ok(idx)
            })
            .collect()
    }

    /// Coerce a value into the declared type of `column`
    pub fn cast(&self, column: &str, value: Value) -> Result<Value> {
        let spec = self.require(column)?;
        spec.column_type
            .cast(value)
            .map_err(|rejected| Error::TypeMismatch {
                column: column.to_string(),
                expected: spec.column_type.to_string(),
                found: rejected.kind().to_string(),
            })
    }

    /// Names, types and by-value mask as parallel lists
    #[must_use]
    pub fn column_info(&self) -> ColumnInfo {
        ColumnInfo {
            column_name: self.columns.iter().map(|c| c.name.clone()).collect(),
            column_type: self
                .columns
                .iter()
                .map(|c| c.column_type.to_string())
                .collect(),
            column_value_mask: self
                .columns
                .iter()
                .map(|c| c.storage.is_by_value())
                .collect(),
        }
    }
}

impl TryFrom<Vec<ColumnSpec>> for TableSchema {
    type Error = Error;

    fn try_from(columns: Vec<ColumnSpec>) -> Result<Self> {
        Self::new(columns)
    }
}

impl From<TableSchema> for Vec<ColumnSpec> {
    fn from(schema: TableSchema) -> Self {
        schema.columns
    }
}
