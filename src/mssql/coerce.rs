//! Coercion of JSON-shaped cells into the exact TDS value a destination
//! column expects.
//!
//! The bulk-load encoder rejects a value whose variant differs from the
//! column type, so every cell is converted against the column's metadata,
//! including `NULL`, which must carry the column's variant too.

use std::borrow::Cow;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tiberius::ColumnData;
use tiberius::numeric::Numeric;
use tiberius::time::{Date, DateTime2, DateTimeOffset, SmallDateTime, Time};
use uuid::Uuid;

use crate::error::SqlTaskError;
use crate::results::CellValue;

/// Destination column type, resolved from `sys.types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlType {
    Bit,
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    Real,
    Float,
    Decimal { precision: u8, scale: u8 },
    Money { precision: u8 },
    Text,
    LegacyText,
    Binary,
    Guid,
    Date,
    Time { scale: u8 },
    DateTime,
    SmallDateTime,
    DateTime2 { scale: u8 },
    DateTimeOffset { scale: u8 },
    RowVersion,
    /// Types sent as text and converted by the server (`xml`, `sql_variant`, spatial, ...).
    Other,
}

impl SqlType {
    /// Map a `sys.types` name plus precision/scale to a column type.
    #[must_use]
    pub fn from_metadata(type_name: &str, precision: u8, scale: u8) -> Self {
        match type_name.to_ascii_lowercase().as_str() {
            "bit" => SqlType::Bit,
            "tinyint" => SqlType::TinyInt,
            "smallint" => SqlType::SmallInt,
            "int" => SqlType::Int,
            "bigint" => SqlType::BigInt,
            "real" => SqlType::Real,
            "float" => SqlType::Float,
            "decimal" | "numeric" => SqlType::Decimal { precision, scale },
            "money" => SqlType::Money { precision: 19 },
            "smallmoney" => SqlType::Money { precision: 10 },
            "char" | "varchar" | "nchar" | "nvarchar" | "sysname" => SqlType::Text,
            "text" | "ntext" => SqlType::LegacyText,
            "binary" | "varbinary" | "image" => SqlType::Binary,
            "uniqueidentifier" => SqlType::Guid,
            "date" => SqlType::Date,
            "time" => SqlType::Time { scale },
            "datetime" => SqlType::DateTime,
            "smalldatetime" => SqlType::SmallDateTime,
            "datetime2" => SqlType::DateTime2 { scale },
            "datetimeoffset" => SqlType::DateTimeOffset { scale },
            "timestamp" | "rowversion" => SqlType::RowVersion,
            _ => SqlType::Other,
        }
    }

    /// Whether the TDS bulk-load encoder can write this type.
    #[must_use]
    pub fn supports_tds_bulk(self) -> bool {
        !matches!(
            self,
            SqlType::Money { .. } | SqlType::LegacyText | SqlType::RowVersion | SqlType::Other
        )
    }
}

fn conversion_error(cell: &CellValue, target: &str) -> SqlTaskError {
    let shown = cell.render().unwrap_or_else(|| "null".into());
    SqlTaskError::ConversionError(format!("cannot convert {shown:?} to {target}"))
}

/// Convert `cell` into the value written to a column of type `sql_type`.
///
/// # Errors
///
/// Returns `SqlTaskError::ConversionError` if the value cannot be represented in the column type.
pub fn coerce_cell(cell: &CellValue, sql_type: SqlType) -> Result<ColumnData<'static>, SqlTaskError> {
    if cell.is_null() {
        return Ok(typed_null(sql_type));
    }

    let data = match sql_type {
        SqlType::Bit => ColumnData::Bit(Some(to_bool(cell)?)),
        SqlType::TinyInt => ColumnData::U8(Some(
            u8::try_from(to_i64(cell)?).map_err(|_| conversion_error(cell, "tinyint"))?,
        )),
        SqlType::SmallInt => ColumnData::I16(Some(
            i16::try_from(to_i64(cell)?).map_err(|_| conversion_error(cell, "smallint"))?,
        )),
        SqlType::Int => ColumnData::I32(Some(
            i32::try_from(to_i64(cell)?).map_err(|_| conversion_error(cell, "int"))?,
        )),
        SqlType::BigInt => ColumnData::I64(Some(to_i64(cell)?)),
        #[allow(clippy::cast_possible_truncation)]
        SqlType::Real => ColumnData::F32(Some(to_f64(cell)? as f32)),
        SqlType::Float => ColumnData::F64(Some(to_f64(cell)?)),
        SqlType::Decimal { precision, scale } => {
            ColumnData::Numeric(Some(to_numeric(cell, precision, scale)?))
        }
        SqlType::Money { precision } => ColumnData::Numeric(Some(to_numeric(cell, precision, 4)?)),
        SqlType::Text | SqlType::LegacyText | SqlType::Other => {
            ColumnData::String(cell.render().map(Cow::Owned))
        }
        SqlType::Binary => {
            let text = cell.as_text().ok_or_else(|| conversion_error(cell, "binary"))?;
            let bytes = BASE64
                .decode(text)
                .map_err(|_| conversion_error(cell, "binary (base64)"))?;
            ColumnData::Binary(Some(Cow::Owned(bytes)))
        }
        SqlType::Guid => {
            let text = cell.as_text().ok_or_else(|| conversion_error(cell, "uniqueidentifier"))?;
            let guid =
                Uuid::parse_str(text.trim()).map_err(|_| conversion_error(cell, "uniqueidentifier"))?;
            ColumnData::Guid(Some(guid))
        }
        SqlType::Date => {
            let (dt, _) = to_datetime(cell, "date")?;
            ColumnData::Date(Some(tds_date(dt.date(), cell, "date")?))
        }
        SqlType::Time { scale } => ColumnData::Time(Some(tds_time(to_time(cell)?, scale))),
        SqlType::DateTime => {
            let (dt, _) = to_datetime(cell, "datetime")?;
            ColumnData::DateTime(Some(legacy_datetime(dt, cell)?))
        }
        SqlType::SmallDateTime => {
            let (dt, _) = to_datetime(cell, "smalldatetime")?;
            ColumnData::SmallDateTime(Some(small_datetime(dt, cell)?))
        }
        SqlType::DateTime2 { scale } => {
            let (dt, _) = to_datetime(cell, "datetime2")?;
            ColumnData::DateTime2(Some(tds_datetime2(dt, scale, cell, "datetime2")?))
        }
        SqlType::DateTimeOffset { scale } => {
            let (dt, offset) = to_datetime(cell, "datetimeoffset")?;
            let offset_secs = offset.map_or(0, |o| o.local_minus_utc());
            let utc = dt
                .checked_sub_signed(chrono::Duration::seconds(i64::from(offset_secs)))
                .ok_or_else(|| conversion_error(cell, "datetimeoffset"))?;
            let minutes = i16::try_from(offset_secs / 60)
                .map_err(|_| conversion_error(cell, "datetimeoffset"))?;
            ColumnData::DateTimeOffset(Some(DateTimeOffset::new(
                tds_datetime2(utc, scale, cell, "datetimeoffset")?,
                minutes,
            )))
        }
        SqlType::RowVersion => {
            return Err(SqlTaskError::ConversionError(
                "rowversion columns cannot be written".into(),
            ));
        }
    };
    Ok(data)
}

/// `NULL` carrying the variant of `sql_type`.
#[must_use]
pub fn typed_null(sql_type: SqlType) -> ColumnData<'static> {
    match sql_type {
        SqlType::Bit => ColumnData::Bit(None),
        SqlType::TinyInt => ColumnData::U8(None),
        SqlType::SmallInt => ColumnData::I16(None),
        SqlType::Int => ColumnData::I32(None),
        SqlType::BigInt => ColumnData::I64(None),
        SqlType::Real => ColumnData::F32(None),
        SqlType::Float => ColumnData::F64(None),
        SqlType::Decimal { .. } | SqlType::Money { .. } => ColumnData::Numeric(None),
        SqlType::Text | SqlType::LegacyText | SqlType::Other => ColumnData::String(None),
        SqlType::Binary | SqlType::RowVersion => ColumnData::Binary(None),
        SqlType::Guid => ColumnData::Guid(None),
        SqlType::Date => ColumnData::Date(None),
        SqlType::Time { .. } => ColumnData::Time(None),
        SqlType::DateTime => ColumnData::DateTime(None),
        SqlType::SmallDateTime => ColumnData::SmallDateTime(None),
        SqlType::DateTime2 { .. } => ColumnData::DateTime2(None),
        SqlType::DateTimeOffset { .. } => ColumnData::DateTimeOffset(None),
    }
}

fn to_bool(cell: &CellValue) -> Result<bool, SqlTaskError> {
    match cell {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Int(i) => Ok(*i != 0),
        CellValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(conversion_error(cell, "bit")),
        },
        _ => Err(conversion_error(cell, "bit")),
    }
}

fn to_i64(cell: &CellValue) -> Result<i64, SqlTaskError> {
    match cell {
        CellValue::Int(i) => Ok(*i),
        CellValue::Bool(b) => Ok(i64::from(*b)),
        #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
        CellValue::Float(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(*f as i64),
        CellValue::Text(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| conversion_error(cell, "an integer")),
        _ => Err(conversion_error(cell, "an integer")),
    }
}

fn to_f64(cell: &CellValue) -> Result<f64, SqlTaskError> {
    match cell {
        CellValue::Float(f) => Ok(*f),
        #[allow(clippy::cast_precision_loss)]
        CellValue::Int(i) => Ok(*i as f64),
        CellValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .ok_or_else(|| conversion_error(cell, "a floating point number")),
        _ => Err(conversion_error(cell, "a floating point number")),
    }
}

fn to_numeric(cell: &CellValue, precision: u8, scale: u8) -> Result<Numeric, SqlTaskError> {
    let target = format!("decimal({precision},{scale})");
    let text = match cell {
        CellValue::Int(i) => i.to_string(),
        CellValue::Float(f) if f.is_finite() => f.to_string(),
        CellValue::Text(s) => s.trim().to_string(),
        _ => return Err(conversion_error(cell, &target)),
    };
    let mantissa = parse_decimal(&text, scale).ok_or_else(|| conversion_error(cell, &target))?;
    let limit = 10i128.checked_pow(u32::from(precision)).unwrap_or(i128::MAX);
    if mantissa.abs() >= limit {
        return Err(conversion_error(cell, &target));
    }
    Ok(Numeric::new_with_scale(mantissa, scale))
}

/// Parse plain decimal text into a mantissa at `scale`, rounding half away
/// from zero.
///
/// ```text
/// "12.345" at scale 2 -> 1235
/// "-7"     at scale 3 -> -7000
/// ```
pub(crate) fn parse_decimal(text: &str, scale: u8) -> Option<i128> {
    let (negative, digits) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let scale = usize::from(scale);
    let mut mantissa: i128 = 0;
    for b in whole.bytes().chain(fraction.bytes().chain(std::iter::repeat(b'0')).take(scale)) {
        mantissa = mantissa.checked_mul(10)?.checked_add(i128::from(b - b'0'))?;
    }
    if fraction.as_bytes().get(scale).is_some_and(|b| *b >= b'5') {
        mantissa = mantissa.checked_add(1)?;
    }
    Some(if negative { -mantissa } else { mantissa })
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Parse an ISO-8601 style timestamp; the offset is returned when present.
pub(crate) fn parse_datetime(text: &str) -> Option<(NaiveDateTime, Option<FixedOffset>)> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some((dt.naive_local(), Some(*dt.offset())));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some((dt.naive_local(), Some(*dt.offset())));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .map(|dt| (dt, None))
}

fn to_datetime(
    cell: &CellValue,
    target: &str,
) -> Result<(NaiveDateTime, Option<FixedOffset>), SqlTaskError> {
    cell.as_text()
        .and_then(parse_datetime)
        .ok_or_else(|| conversion_error(cell, target))
}

fn to_time(cell: &CellValue) -> Result<NaiveTime, SqlTaskError> {
    let text = cell.as_text().ok_or_else(|| conversion_error(cell, "time"))?.trim();
    ["%H:%M:%S%.f", "%H:%M:%S", "%H:%M"]
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(text, fmt).ok())
        .or_else(|| parse_datetime(text).map(|(dt, _)| dt.time()))
        .ok_or_else(|| conversion_error(cell, "time"))
}

fn days_since(date: NaiveDate, year: i32) -> Option<i64> {
    NaiveDate::from_ymd_opt(year, 1, 1).map(|epoch| (date - epoch).num_days())
}

fn nanos_of_day(time: NaiveTime) -> u64 {
    // leap-second nanos (>= 1e9) are clamped onto the last second
    u64::from(time.num_seconds_from_midnight()) * 1_000_000_000
        + u64::from(time.nanosecond().min(999_999_999))
}

fn tds_date(date: NaiveDate, cell: &CellValue, target: &str) -> Result<Date, SqlTaskError> {
    let days = days_since(date, 1)
        .and_then(|d| u32::try_from(d).ok())
        .ok_or_else(|| conversion_error(cell, target))?;
    Ok(Date::new(days))
}

fn tds_time(time: NaiveTime, scale: u8) -> Time {
    let scale = scale.min(7);
    let divisor = 10u64.pow(9 - u32::from(scale));
    Time::new(nanos_of_day(time) / divisor, scale)
}

fn tds_datetime2(
    dt: NaiveDateTime,
    scale: u8,
    cell: &CellValue,
    target: &str,
) -> Result<DateTime2, SqlTaskError> {
    Ok(DateTime2::new(
        tds_date(dt.date(), cell, target)?,
        tds_time(dt.time(), scale),
    ))
}

const FRAGMENTS_PER_DAY: u64 = 300 * 86_400;

fn legacy_datetime(dt: NaiveDateTime, cell: &CellValue) -> Result<tiberius::time::DateTime, SqlTaskError> {
    let mut days = days_since(dt.date(), 1900).ok_or_else(|| conversion_error(cell, "datetime"))?;
    // 1/300 second ticks, rounded to nearest
    let mut fragments = (nanos_of_day(dt.time()) * 3 + 5_000_000) / 10_000_000;
    if fragments >= FRAGMENTS_PER_DAY {
        fragments -= FRAGMENTS_PER_DAY;
        days += 1;
    }
    // 1753-01-01 ..= 9999-12-31
    if !(-53_690..=2_958_463).contains(&days) {
        return Err(conversion_error(cell, "datetime"));
    }
    let days = i32::try_from(days).map_err(|_| conversion_error(cell, "datetime"))?;
    let fragments = u32::try_from(fragments).map_err(|_| conversion_error(cell, "datetime"))?;
    Ok(tiberius::time::DateTime::new(days, fragments))
}

fn small_datetime(dt: NaiveDateTime, cell: &CellValue) -> Result<SmallDateTime, SqlTaskError> {
    let mut days = days_since(dt.date(), 1900).ok_or_else(|| conversion_error(cell, "smalldatetime"))?;
    let mut minutes = u64::from(dt.time().num_seconds_from_midnight() + 30) / 60;
    if minutes >= 1440 {
        minutes -= 1440;
        days += 1;
    }
    let days = u16::try_from(days).map_err(|_| conversion_error(cell, "smalldatetime"))?;
    let minutes = u16::try_from(minutes).map_err(|_| conversion_error(cell, "smalldatetime"))?;
    Ok(SmallDateTime::new(days, minutes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.into())
    }

    #[test]
    fn decimal_text_is_scaled_and_rounded() {
        assert_eq!(parse_decimal("12.345", 2), Some(1235));
        assert_eq!(parse_decimal("12.344", 2), Some(1234));
        assert_eq!(parse_decimal("-7", 3), Some(-7000));
        assert_eq!(parse_decimal(".5", 1), Some(5));
        assert_eq!(parse_decimal("+3.", 0), Some(3));
        assert_eq!(parse_decimal("1e3", 0), None);
        assert_eq!(parse_decimal("", 0), None);
        assert_eq!(parse_decimal("-", 0), None);
    }

    #[test]
    fn numeric_respects_precision() {
        let ok = coerce_cell(&text("123.45"), SqlType::Decimal { precision: 5, scale: 2 }).unwrap();
        assert_eq!(ok, ColumnData::Numeric(Some(Numeric::new_with_scale(12345, 2))));
        assert!(coerce_cell(&text("1234.5"), SqlType::Decimal { precision: 5, scale: 2 }).is_err());
        let from_int = coerce_cell(&CellValue::Int(3), SqlType::Decimal { precision: 10, scale: 2 }).unwrap();
        assert_eq!(from_int, ColumnData::Numeric(Some(Numeric::new_with_scale(300, 2))));
    }

    #[test]
    fn integers_are_range_checked() {
        assert_eq!(
            coerce_cell(&CellValue::Int(15), SqlType::Int).unwrap(),
            ColumnData::I32(Some(15))
        );
        assert_eq!(
            coerce_cell(&text(" 42 "), SqlType::BigInt).unwrap(),
            ColumnData::I64(Some(42))
        );
        assert!(coerce_cell(&CellValue::Int(256), SqlType::TinyInt).is_err());
        assert!(coerce_cell(&CellValue::Int(i64::from(i32::MAX) + 1), SqlType::Int).is_err());
        assert!(coerce_cell(&text("abc"), SqlType::Int).is_err());
    }

    #[test]
    fn nulls_carry_the_column_variant() {
        assert_eq!(coerce_cell(&CellValue::Null, SqlType::Int).unwrap(), ColumnData::I32(None));
        assert_eq!(
            coerce_cell(&CellValue::Null, SqlType::DateTime2 { scale: 7 }).unwrap(),
            ColumnData::DateTime2(None)
        );
        assert_eq!(
            coerce_cell(&CellValue::Null, SqlType::Text).unwrap(),
            ColumnData::String(None)
        );
    }

    #[test]
    fn text_columns_take_rendered_values() {
        assert_eq!(
            coerce_cell(&CellValue::Int(2), SqlType::Text).unwrap(),
            ColumnData::String(Some(Cow::Owned("2".into())))
        );
        assert_eq!(
            coerce_cell(&text(""), SqlType::Text).unwrap(),
            ColumnData::String(Some(Cow::Owned(String::new())))
        );
    }

    #[test]
    fn bits_accept_common_spellings() {
        for (cell, expected) in [
            (CellValue::Bool(true), true),
            (CellValue::Int(0), false),
            (text("TRUE"), true),
            (text("0"), false),
        ] {
            assert_eq!(coerce_cell(&cell, SqlType::Bit).unwrap(), ColumnData::Bit(Some(expected)));
        }
        assert!(coerce_cell(&text("yes"), SqlType::Bit).is_err());
    }

    #[test]
    fn timestamps_parse_common_forms() {
        let (dt, offset) = parse_datetime("2024-01-02T10:30:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-02 10:30:00");
        assert!(offset.is_none());

        let (dt, offset) = parse_datetime("2024-01-02T10:30:00.5+02:00").unwrap();
        assert_eq!(dt.to_string(), "2024-01-02 10:30:00.500");
        assert_eq!(offset.unwrap().local_minus_utc(), 7200);

        let (dt, _) = parse_datetime("2024-01-02").unwrap();
        assert_eq!(dt.to_string(), "2024-01-02 00:00:00");

        assert!(parse_datetime("02/01/2024").is_none());
    }

    #[test]
    fn time_uses_column_scale() {
        let data = coerce_cell(&text("00:00:01.5"), SqlType::Time { scale: 3 }).unwrap();
        assert_eq!(data, ColumnData::Time(Some(Time::new(1500, 3))));
    }

    #[test]
    fn legacy_datetime_counts_from_1900() {
        let data = coerce_cell(&text("1900-01-02 00:00:01"), SqlType::DateTime).unwrap();
        assert_eq!(data, ColumnData::DateTime(Some(tiberius::time::DateTime::new(1, 300))));

        let data = coerce_cell(&text("1900-01-01 00:01:31"), SqlType::SmallDateTime).unwrap();
        assert_eq!(data, ColumnData::SmallDateTime(Some(SmallDateTime::new(0, 2))));

        assert!(coerce_cell(&text("1700-01-01"), SqlType::DateTime).is_err());
    }

    #[test]
    fn offsets_are_stored_as_utc_plus_minutes() {
        let data =
            coerce_cell(&text("0001-01-01T02:00:00+02:00"), SqlType::DateTimeOffset { scale: 0 })
                .unwrap();
        assert_eq!(
            data,
            ColumnData::DateTimeOffset(Some(DateTimeOffset::new(
                DateTime2::new(Date::new(0), Time::new(0, 0)),
                120
            )))
        );
    }

    #[test]
    fn guid_and_binary_parse_from_text() {
        let guid = coerce_cell(&text("6f9619ff-8b86-d011-b42d-00c04fc964ff"), SqlType::Guid).unwrap();
        assert!(matches!(guid, ColumnData::Guid(Some(_))));
        assert_eq!(
            coerce_cell(&text("AQID"), SqlType::Binary).unwrap(),
            ColumnData::Binary(Some(Cow::Owned(vec![1, 2, 3])))
        );
        assert!(coerce_cell(&text("not a guid"), SqlType::Guid).is_err());
    }

    #[test]
    fn type_names_resolve_case_insensitively() {
        assert_eq!(SqlType::from_metadata("NVARCHAR", 0, 0), SqlType::Text);
        assert_eq!(
            SqlType::from_metadata("numeric", 18, 4),
            SqlType::Decimal { precision: 18, scale: 4 }
        );
        assert!(!SqlType::from_metadata("money", 19, 4).supports_tds_bulk());
        assert!(!SqlType::from_metadata("geography", 0, 0).supports_tds_bulk());
        assert!(SqlType::from_metadata("datetime2", 27, 7).supports_tds_bulk());
    }
}
