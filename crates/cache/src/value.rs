//! Values that can be stored in the cache
//!
//! Computations return a [`Value`], which is one of:
//! - a generic structured object (anything expressible as JSON),
//! - a [`Table`] of equally sized, named columns,
//! - a [`Dataset`] of named multi-dimensional `f64` variables.

use crate::{Error, Result};
use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A cacheable value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Generic structured object
    Object(serde_json::Value),
    /// Tabular data
    Table(Table),
    /// Multi-dimensional array dataset
    Dataset(Dataset),
}

impl Value {
    /// Build an object value from anything serializable
    pub fn object<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Object)
            .map_err(|e| Error::serialization(format!("Failed to encode object value: {e}")))
    }

    /// Short name of the value kind, used in diagnostics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Table(_) => "table",
            Self::Dataset(_) => "dataset",
        }
    }

    /// Borrow the object payload
    #[must_use]
    pub const fn as_object(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Borrow the table payload
    #[must_use]
    pub const fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(t) => Some(t),
            _ => None,
        }
    }

    /// Borrow the dataset payload
    #[must_use]
    pub const fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            Self::Dataset(d) => Some(d),
            _ => None,
        }
    }

    /// Decode an object value into a concrete type
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        let Self::Object(v) = self else {
            return Err(Error::serialization(format!(
                "Cannot decode a {} value as an object",
                self.kind()
            )));
        };
        serde_json::from_value(v.clone())
            .map_err(|e| Error::serialization(format!("Failed to decode object value: {e}")))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        Self::Object(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Object(serde_json::Value::String(value.to_string()))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Object(serde_json::Value::String(value))
    }
}

impl From<Table> for Value {
    fn from(value: Table) -> Self {
        Self::Table(value)
    }
}

impl From<Dataset> for Value {
    fn from(value: Dataset) -> Self {
        Self::Dataset(value)
    }
}

/// Data held by a single table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnData {
    /// 64-bit signed integers
    Int(Vec<i64>),
    /// 64-bit floats
    Float(Vec<f64>),
    /// UTF-8 text
    Text(Vec<String>),
    /// Booleans
    Bool(Vec<bool>),
}

impl ColumnData {
    /// Number of rows in the column
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Int(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Text(v) => v.len(),
            Self::Bool(v) => v.len(),
        }
    }

    /// Whether the column has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named table column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Column values
    pub data: ColumnData,
}

impl Column {
    /// Create a column
    #[must_use]
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

/// Tabular data: ordered, uniquely named columns of equal length
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<Column>,
}

impl Table {
    /// Create a table, validating column names and lengths
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        let mut seen = HashSet::new();
        for column in &columns {
            if !seen.insert(column.name.as_str()) {
                return Err(Error::serialization(format!(
                    "Duplicate column name: {}",
                    column.name
                )));
            }
        }
        if let Some(first) = columns.first() {
            let rows = first.data.len();
            if let Some(bad) = columns.iter().find(|c| c.data.len() != rows) {
                return Err(Error::serialization(format!(
                    "Column '{}' has {} rows, expected {rows}",
                    bad.name,
                    bad.data.len()
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Columns in order
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Number of rows
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.data.len())
    }
}

/// A named multi-dimensional variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// One name per array axis
    pub dims: Vec<String>,
    /// Variable values
    pub data: ArrayD<f64>,
}

impl Variable {
    /// Create a variable, checking that every axis is named
    pub fn new(dims: Vec<String>, data: ArrayD<f64>) -> Result<Self> {
        if dims.len() != data.ndim() {
            return Err(Error::serialization(format!(
                "Variable has {} dimension names for {} axes",
                dims.len(),
                data.ndim()
            )));
        }
        Ok(Self { dims, data })
    }
}

/// A collection of named variables plus free-form attributes
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Dataset {
    /// Variables keyed by name
    pub variables: BTreeMap<String, Variable>,
    /// Dataset-level attributes
    pub attrs: BTreeMap<String, serde_json::Value>,
}

impl Dataset {
    /// Create an empty dataset
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable
    pub fn with_variable<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        dims: impl IntoIterator<Item = S>,
        data: ArrayD<f64>,
    ) -> Result<Self> {
        let variable = Variable::new(dims.into_iter().map(Into::into).collect(), data)?;
        self.variables.insert(name.into(), variable);
        Ok(self)
    }

    /// Add an attribute
    #[must_use]
    pub fn with_attr(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    /// Look up a variable by name
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }
}
