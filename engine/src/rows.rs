//! Result sets returned by queries and typed access to their rows.

use crate::error::{Error, Result};
use crate::value::{FromValue, ScalarType, Value};
use serde::{Deserialize, Serialize};

/// Column metadata of a result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    /// Declared type as written in the schema, if any
    pub decl_type: Option<String>,
    /// Affinity resolved from `decl_type`
    pub affinity: ScalarType,
}

impl Column {
    pub fn new(name: impl Into<String>, decl_type: Option<&str>) -> Self {
        Self {
            name: name.into(),
            decl_type: decl_type.map(str::to_string),
            affinity: ScalarType::from_decl_type(decl_type),
        }
    }
}

/// Rows produced by one statement.
///
/// Write statements yield no columns and report `rows_affected`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowSet {
    pub columns: Vec<Column>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: usize,
}

impl RowSet {
    /// Result of a statement that returned no columns.
    pub fn affected(rows_affected: usize) -> Self {
        Self {
            rows_affected,
            ..Self::default()
        }
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if no rows were returned.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Typed view of the row at `index`.
    pub fn row(&self, index: usize) -> Option<Row<'_>> {
        self.rows.get(index).map(|values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Iterate over typed row views.
    pub fn iter(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(move |values| Row {
            columns: &self.columns,
            values,
        })
    }

    /// Position of the column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Check every value against its column's declared type.
    pub fn validate(&self) -> Result<()> {
        for values in &self.rows {
            for (column, value) in self.columns.iter().zip(values) {
                if !column.affinity.accepts(value) {
                    return Err(Error::TypeMismatch {
                        column: column.name.clone(),
                        expected: column.affinity.to_string(),
                        got: value.type_name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Rows as JSON objects keyed by column name.
    pub fn to_json_objects(&self) -> Vec<serde_json::Value> {
        self.rows
            .iter()
            .map(|values| {
                let object = self
                    .columns
                    .iter()
                    .zip(values)
                    .map(|(column, value)| (column.name.clone(), value.clone().into()))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect()
    }
}

/// Borrowed view of one row.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a [Column],
    values: &'a [Value],
}

impl<'a> Row<'a> {
    /// Fetch a column by position or name, converted to `T`.
    pub fn get<T: FromValue>(&self, index: impl RowIndex) -> Result<T> {
        let position = index.position(self.columns)?;
        let value = &self.values[position];
        T::from_value(value).ok_or_else(|| Error::TypeMismatch {
            column: self.columns[position].name.clone(),
            expected: T::EXPECTED.to_string(),
            got: value.type_name().to_string(),
        })
    }

    /// The raw values of this row.
    pub fn values(&self) -> &'a [Value] {
        self.values
    }
}

/// Something that can locate a column: a position or a name.
pub trait RowIndex {
    fn position(&self, columns: &[Column]) -> Result<usize>;
}

impl RowIndex for usize {
    fn position(&self, columns: &[Column]) -> Result<usize> {
        if *self < columns.len() {
            Ok(*self)
        } else {
            Err(Error::ColumnNotFound(format!("#{self}")))
        }
    }
}

impl RowIndex for &str {
    fn position(&self, columns: &[Column]) -> Result<usize> {
        columns
            .iter()
            .position(|c| c.name == *self)
            .ok_or_else(|| Error::ColumnNotFound(self.to_string()))
    }
}
