use super::value::CellValue;

/// A borrowed row of a [`DataTable`](super::DataTable)
///
/// Gives by-name access to the cells without copying the shared column list.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    pub(super) columns: &'a [String],
    pub(super) values: &'a [CellValue],
}

impl<'a> DataRow<'a> {
    /// Get the index of a column by name (exact match first, then case-insensitive)
    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|col| col == column_name)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|col| col.eq_ignore_ascii_case(column_name))
            })
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&'a CellValue> {
        let values = self.values;
        self.get_column_index(column_name)
            .and_then(|idx| values.get(idx))
    }

    /// Get a value from the row by position
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&'a CellValue> {
        self.values.get(index)
    }

    #[must_use]
    pub fn values(&self) -> &'a [CellValue] {
        self.values
    }
}
