//! Conversion of PostgreSQL result columns to JSON values.
//!
//! Types decoded natively are listed in [`NATIVE_TYPES`]. Every other column
//! (enums, intervals, network types, arrays, ranges, domains...) is cast to
//! `text` in the page query, which is lossless for all built-in types.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use sqlx::{Column, Row, TypeInfo, ValueRef, postgres::PgRow};
use uuid::Uuid;

use crate::db::{
    error::{DbError, DbResult},
    repos::{SourceRow, format_timestamp},
};

/// `pg_type.typname` of every type [`decode_column`] reads directly.
const NATIVE_TYPES: &[&str] = &[
    "bool",
    "int2",
    "int4",
    "int8",
    "float4",
    "float8",
    "numeric",
    "uuid",
    "timestamptz",
    "timestamp",
    "date",
    "time",
    "json",
    "jsonb",
    "bytea",
    "text",
    "varchar",
    "bpchar",
    "name",
];

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Select list for `(column, typname)` pairs in table order, casting
/// every column without a native decoder to `text` under its own name.
pub fn select_list(columns: &[(String, String)]) -> String {
    columns
        .iter()
        .map(|(name, type_name)| {
            let ident = quote_ident(name);
            if NATIVE_TYPES.contains(&type_name.as_str()) {
                ident
            } else {
                format!("{ident}::text AS {ident}")
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn decode_row(row: &PgRow) -> DbResult<SourceRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    for column in row.columns() {
        let value = decode_column(row, column.ordinal(), column.name())?;
        columns.push((column.name().to_string(), value));
    }
    Ok(SourceRow::new(columns))
}

fn float(v: f64) -> Value {
    Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(v.to_string()))
}

fn decode_column(row: &PgRow, idx: usize, name: &str) -> DbResult<Value> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let type_name = row.column(idx).type_info().name().to_string();
    let value = match type_name.as_str() {
        "BOOL" => Value::Bool(row.try_get(idx)?),
        "INT2" => Value::from(row.try_get::<i16, _>(idx)?),
        "INT4" => Value::from(row.try_get::<i32, _>(idx)?),
        "INT8" => Value::from(row.try_get::<i64, _>(idx)?),
        // Going through the shortest decimal form keeps 0.1f32 as 0.1.
        "FLOAT4" => {
            let v: f32 = row.try_get(idx)?;
            float(v.to_string().parse().unwrap_or(f64::from(v)))
        }
        "FLOAT8" => float(row.try_get(idx)?),
        "NUMERIC" => Value::String(row.try_get::<Decimal, _>(idx)?.to_string()),
        "UUID" => Value::String(row.try_get::<Uuid, _>(idx)?.to_string()),
        "TIMESTAMPTZ" => Value::String(format_timestamp(row.try_get::<DateTime<Utc>, _>(idx)?)),
        "TIMESTAMP" => Value::String(
            row.try_get::<NaiveDateTime, _>(idx)?
                .format("%Y-%m-%dT%H:%M:%S%.f")
                .to_string(),
        ),
        "DATE" => Value::String(row.try_get::<NaiveDate, _>(idx)?.to_string()),
        "TIME" => Value::String(row.try_get::<NaiveTime, _>(idx)?.to_string()),
        "JSON" | "JSONB" => row.try_get::<Value, _>(idx)?,
        "BYTEA" => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(idx)?)),
        _ => match row.try_get::<String, _>(idx) {
            Ok(s) => Value::String(s),
            Err(_) => {
                return Err(DbError::UnsupportedColumn {
                    column: name.to_string(),
                    type_name,
                });
            }
        },
    };

    Ok(value)
}
