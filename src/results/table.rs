use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use super::row::DataRow;
use super::value::CellValue;
use crate::error::SqlTaskError;

/// In-memory table shared by query results and bulk-insert payloads.
///
/// Column names are stored once and shared by all rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataTable {
    columns: Arc<Vec<String>>,
    rows: Vec<Vec<CellValue>>,
}

impl DataTable {
    /// Create an empty table with result-set column naming applied.
    ///
    /// Unnamed columns become `Column1`, `Column2`, ... and repeated names get
    /// a numeric suffix, so every column is addressable by name.
    #[must_use]
    pub fn with_result_columns<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut taken: HashSet<String> = HashSet::new();
        let mut columns = Vec::new();
        let mut unnamed = 0usize;

        for name in names {
            let name = name.as_ref();
            let resolved = if name.is_empty() {
                loop {
                    unnamed += 1;
                    let candidate = format!("Column{unnamed}");
                    if !taken.contains(&candidate.to_lowercase()) {
                        break candidate;
                    }
                }
            } else if taken.contains(&name.to_lowercase()) {
                let mut suffix = 1usize;
                loop {
                    let candidate = format!("{name}{suffix}");
                    if !taken.contains(&candidate.to_lowercase()) {
                        break candidate;
                    }
                    suffix += 1;
                }
            } else {
                name.to_string()
            };
            taken.insert(resolved.to_lowercase());
            columns.push(resolved);
        }

        Self {
            columns: Arc::new(columns),
            rows: Vec::new(),
        }
    }

    /// Parse a JSON array of objects into a table.
    ///
    /// Columns are the union of the objects' keys in first-appearance order;
    /// a key missing from an object leaves that cell `Null`.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::DeserializationError` if the text is not a JSON
    /// array of objects.
    pub fn from_json_array(text: &str) -> Result<Self, SqlTaskError> {
        let records: Vec<Map<String, JsonValue>> = serde_json::from_str(text)?;
        Ok(Self::from_records(records))
    }

    /// Build a table from already-parsed JSON objects.
    #[must_use]
    pub fn from_records(records: Vec<Map<String, JsonValue>>) -> Self {
        let mut columns: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for record in &records {
            for key in record.keys() {
                if seen.insert(key.as_str()) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .into_iter()
            .map(|mut record| {
                columns
                    .iter()
                    .map(|col| record.remove(col).map_or(CellValue::Null, CellValue::from_json))
                    .collect()
            })
            .collect();

        Self {
            columns: Arc::new(columns),
            rows,
        }
    }

    /// Append a row.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ExecutionError` if the row width does not match the column count.
    pub fn push_row(&mut self, values: Vec<CellValue>) -> Result<(), SqlTaskError> {
        if values.len() != self.columns.len() {
            return Err(SqlTaskError::ExecutionError(format!(
                "row has {} values but the table has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(values);
        Ok(())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn row(&self, index: usize) -> Option<DataRow<'_>> {
        self.rows.get(index).map(|values| DataRow {
            columns: &self.columns,
            values,
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = DataRow<'_>> + '_ {
        self.rows.iter().map(|values| DataRow {
            columns: &self.columns,
            values,
        })
    }

    pub(crate) fn raw_rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Rewrite every empty-string cell to `Null`; returns how many cells changed.
    pub fn set_empty_cells_to_null(&mut self) -> usize {
        let mut changed = 0;
        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if cell.is_empty_text() {
                    *cell = CellValue::Null;
                    changed += 1;
                }
            }
        }
        changed
    }

    /// One JSON object per row, keyed by column name in column order.
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, JsonValue> = self
                        .columns
                        .iter()
                        .zip(row)
                        .map(|(col, cell)| (col.clone(), cell.to_json()))
                        .collect();
                    JsonValue::Object(object)
                })
                .collect(),
        )
    }
}
