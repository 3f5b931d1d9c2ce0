//! Conversion of SQLite result columns to JSON values.
//!
//! SQLite values carry a storage class (INTEGER, REAL, TEXT, BLOB) while the
//! column may declare a richer type. Declared DATE/TIME/DATETIME/BOOLEAN
//! columns are normalized; everything else follows the storage class.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::{Number, Value};
use sqlx::{Column, Row, TypeInfo, ValueRef, sqlite::SqliteRow};

use crate::db::{
    error::{DbError, DbResult},
    repos::{SourceRow, format_timestamp},
};

pub fn decode_row(row: &SqliteRow) -> DbResult<SourceRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.name())?;
        columns.push((column.name().to_string(), value));
    }
    Ok(SourceRow::new(columns))
}

fn decode_column(row: &SqliteRow, idx: usize, name: &str) -> DbResult<Value> {
    let storage = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    let declared = row.column(idx).type_info().name();
    let typed = match declared {
        "DATETIME" => row
            .try_get::<DateTime<Utc>, _>(idx)
            .ok()
            .map(|v| Value::String(format_timestamp(v))),
        "DATE" => row
            .try_get::<NaiveDate, _>(idx)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "TIME" => row
            .try_get::<NaiveTime, _>(idx)
            .ok()
            .map(|v| Value::String(v.to_string())),
        "BOOLEAN" if storage == "INTEGER" => row.try_get::<bool, _>(idx).ok().map(Value::Bool),
        _ => None,
    };
    if let Some(value) = typed {
        return Ok(value);
    }

    // Values that don't parse as their declared type are kept verbatim.
    match storage.as_str() {
        "INTEGER" => Ok(Value::from(row.try_get::<i64, _>(idx)?)),
        "REAL" => {
            let v: f64 = row.try_get(idx)?;
            Ok(Number::from_f64(v)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(v.to_string())))
        }
        "TEXT" => Ok(Value::String(row.try_get::<String, _>(idx)?)),
        "BLOB" => Ok(Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(idx)?))),
        other => Err(DbError::UnsupportedColumn {
            column: name.to_string(),
            type_name: other.to_string(),
        }),
    }
}
