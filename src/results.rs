mod row;
mod table;
mod value;

pub use row::DataRow;
pub use table::DataTable;
pub use value::CellValue;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_array_columns_are_union_of_keys() {
        let table = DataTable::from_json_array(
            r#"[{"Id":1,"FirstName":"Etu"},{"Id":2,"LastName":"Last"}]"#,
        )
        .unwrap();
        assert_eq!(table.columns(), ["Id", "FirstName", "LastName"]);
        assert_eq!(table.row_count(), 2);

        let second = table.row(1).unwrap();
        assert_eq!(second.get("Id"), Some(&CellValue::Int(2)));
        assert_eq!(second.get("FirstName"), Some(&CellValue::Null));
        assert_eq!(second.get("lastname"), Some(&CellValue::Text("Last".into())));
    }

    #[test]
    fn json_array_rejects_non_objects() {
        let err = DataTable::from_json_array("[1, 2]").unwrap_err();
        assert!(matches!(err, crate::SqlTaskError::DeserializationError(_)));
        let err = DataTable::from_json_array(r#"{"Id":1}"#).unwrap_err();
        assert!(matches!(err, crate::SqlTaskError::DeserializationError(_)));
    }

    #[test]
    fn empty_strings_become_null() {
        let mut table = DataTable::from_json_array(
            r#"[{"Id":1,"FirstName":"Etu"},{"Id":3,"FirstName":""},{"Id":"","FirstName":" "}]"#,
        )
        .unwrap();
        assert_eq!(table.set_empty_cells_to_null(), 2);
        assert_eq!(table.row(1).unwrap().get("FirstName"), Some(&CellValue::Null));
        assert_eq!(table.row(2).unwrap().get("Id"), Some(&CellValue::Null));
        assert_eq!(
            table.row(2).unwrap().get("FirstName"),
            Some(&CellValue::Text(" ".into()))
        );
    }

    #[test]
    fn result_columns_are_named_like_a_data_table() {
        let table = DataTable::with_result_columns(["", "Id", "id", "", "Column2"]);
        assert_eq!(
            table.columns(),
            ["Column1", "Id", "id1", "Column2", "Column21"]
        );
    }

    #[test]
    fn table_serializes_rows_in_column_order() {
        let mut table = DataTable::with_result_columns(["Id", "LastName", "Score"]);
        table
            .push_row(vec![
                CellValue::Int(2),
                CellValue::Text("Last".into()),
                CellValue::Float(f64::NAN),
            ])
            .unwrap();
        assert!(table.push_row(vec![CellValue::Null]).is_err());

        let rendered = serde_json::to_string(&table.to_json()).unwrap();
        assert_eq!(rendered, r#"[{"Id":2,"LastName":"Last","Score":null}]"#);
        assert_eq!(DataTable::default().to_json(), json!([]));
    }
}
