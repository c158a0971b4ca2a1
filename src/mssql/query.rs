use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use futures_util::TryStreamExt;
use tiberius::{ColumnData, FromSql, Query, QueryItem};

use super::config::MssqlClient;
use crate::error::SqlTaskError;
use crate::results::{CellValue, DataTable};

/// Run `query` and load its first result set into a [`DataTable`].
///
/// Later result sets are drained without being kept so that errors raised
/// by later statements still surface. A command without any result set
/// yields an empty table.
///
/// # Errors
///
/// Returns `SqlTaskError::MssqlError` if the server rejects the command, or
/// `SqlTaskError::ExecutionError` if a row does not match its metadata.
pub async fn build_data_table(
    client: &mut MssqlClient,
    query: Query<'_>,
) -> Result<DataTable, SqlTaskError> {
    let mut stream = query.query(client).await?;
    let mut table: Option<DataTable> = None;

    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) if meta.result_index() == 0 => {
                table = Some(DataTable::with_result_columns(
                    meta.columns().iter().map(tiberius::Column::name),
                ));
            }
            QueryItem::Row(row) if row.result_index() == 0 => {
                if let Some(table) = table.as_mut() {
                    let values = row
                        .into_iter()
                        .map(cell_from_column_data)
                        .collect::<Result<Vec<_>, _>>()?;
                    table.push_row(values)?;
                }
            }
            _ => {}
        }
    }

    Ok(table.unwrap_or_default())
}

/// Convert one result cell into its JSON-facing form.
///
/// # Errors
///
/// Returns `SqlTaskError::ConversionError` if a temporal value is out of range.
pub fn cell_from_column_data(data: ColumnData<'static>) -> Result<CellValue, SqlTaskError> {
    let cell = match data {
        ColumnData::U8(v) => v.map_or(CellValue::Null, |v| CellValue::Int(i64::from(v))),
        ColumnData::I16(v) => v.map_or(CellValue::Null, |v| CellValue::Int(i64::from(v))),
        ColumnData::I32(v) => v.map_or(CellValue::Null, |v| CellValue::Int(i64::from(v))),
        ColumnData::I64(v) => v.map_or(CellValue::Null, CellValue::Int),
        ColumnData::F32(v) => v.map_or(CellValue::Null, |v| CellValue::Float(f64::from(v))),
        ColumnData::F64(v) => v.map_or(CellValue::Null, CellValue::Float),
        ColumnData::Bit(v) => v.map_or(CellValue::Null, CellValue::Bool),
        ColumnData::String(v) => v.map_or(CellValue::Null, |s| CellValue::Text(s.into_owned())),
        ColumnData::Guid(v) => v.map_or(CellValue::Null, |g| CellValue::Text(g.to_string())),
        ColumnData::Binary(v) => {
            v.map_or(CellValue::Null, |b| CellValue::Text(BASE64.encode(b.as_ref())))
        }
        ColumnData::Numeric(v) => v.map_or(CellValue::Null, |n| {
            match i64::try_from(n.value()) {
                Ok(whole) if n.scale() == 0 => CellValue::Int(whole),
                _ => CellValue::Float(f64::from(n)),
            }
        }),
        ColumnData::Xml(v) => {
            v.map_or(CellValue::Null, |x| CellValue::Text(x.into_owned().into_string()))
        }
        ref temporal @ (ColumnData::DateTime(_)
        | ColumnData::SmallDateTime(_)
        | ColumnData::DateTime2(_)) => temporal_cell::<NaiveDateTime>(temporal, |dt| {
            dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()
        })?,
        ref date @ ColumnData::Date(_) => {
            temporal_cell::<NaiveDate>(date, |d| d.format("%Y-%m-%d").to_string())?
        }
        ref time @ ColumnData::Time(_) => {
            temporal_cell::<NaiveTime>(time, |t| t.format("%H:%M:%S%.f").to_string())?
        }
        ref offset @ ColumnData::DateTimeOffset(_) => {
            temporal_cell::<DateTime<FixedOffset>>(offset, |dt| dt.to_rfc3339())?
        }
    };
    Ok(cell)
}

fn temporal_cell<'a, T>(
    data: &'a ColumnData<'static>,
    render: impl FnOnce(T) -> String,
) -> Result<CellValue, SqlTaskError>
where
    T: FromSql<'a>,
{
    let value = T::from_sql(data)
        .map_err(|e| SqlTaskError::ConversionError(format!("temporal value out of range: {e}")))?;
    Ok(value.map_or(CellValue::Null, |v| CellValue::Text(render(v))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;
    use tiberius::numeric::Numeric;
    use tiberius::time::{Date, DateTime2, Time};

    #[test]
    fn scalar_cells_follow_json_typing() {
        assert_eq!(
            cell_from_column_data(ColumnData::I32(Some(2))).unwrap(),
            CellValue::Int(2)
        );
        assert_eq!(
            cell_from_column_data(ColumnData::Bit(Some(true))).unwrap(),
            CellValue::Bool(true)
        );
        assert_eq!(
            cell_from_column_data(ColumnData::String(None)).unwrap(),
            CellValue::Null
        );
        assert_eq!(
            cell_from_column_data(ColumnData::String(Some(Cow::Borrowed("Last")))).unwrap(),
            CellValue::Text("Last".into())
        );
    }

    #[test]
    fn numeric_cells_become_numbers() {
        let whole = Numeric::new_with_scale(42, 0);
        let fraction = Numeric::new_with_scale(1250, 2);
        assert_eq!(
            cell_from_column_data(ColumnData::Numeric(Some(whole))).unwrap(),
            CellValue::Int(42)
        );
        assert_eq!(
            cell_from_column_data(ColumnData::Numeric(Some(fraction))).unwrap(),
            CellValue::Float(12.5)
        );
    }

    #[test]
    fn binary_cells_are_base64() {
        let bytes = ColumnData::Binary(Some(Cow::Owned(vec![1, 2, 3])));
        assert_eq!(
            cell_from_column_data(bytes).unwrap(),
            CellValue::Text("AQID".into())
        );
    }

    #[test]
    fn temporal_cells_are_iso_strings() {
        let days = (NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
            - NaiveDate::from_ymd_opt(1, 1, 1).unwrap())
        .num_days();
        let date = Date::new(u32::try_from(days).unwrap());
        assert_eq!(
            cell_from_column_data(ColumnData::Date(Some(date))).unwrap(),
            CellValue::Text("2024-01-02".into())
        );

        // 10:30:00 at scale 0
        let time = Time::new(37_800, 0);
        assert_eq!(
            cell_from_column_data(ColumnData::DateTime2(Some(DateTime2::new(date, time)))).unwrap(),
            CellValue::Text("2024-01-02T10:30:00".into())
        );
    }
}
