use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};

use crate::database::Error;

/// A dynamically typed SQL value.
///
/// Payload columns are configured at runtime, so rows are carried as
/// positional tuples of these values rather than as static structs.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
}

impl SqlValue {
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// A tabular query result: ordered column names plus positional row tuples.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl TableData {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Position of `name` among the columns, matched case-insensitively.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Decodes a fetched result set. An empty result carries no column
    /// metadata; callers must not resolve columns against it.
    pub fn from_pg_rows(rows: Vec<PgRow>) -> Result<Self, Error> {
        let Some(first) = rows.first() else {
            return Ok(Self::default());
        };

        let columns = first
            .columns()
            .iter()
            .map(|column| column.name().to_string())
            .collect();

        let rows = rows.iter().map(decode_row).collect::<Result<Vec<_>, _>>()?;

        Ok(Self { columns, rows })
    }
}

fn decode_row(row: &PgRow) -> Result<Vec<SqlValue>, Error> {
    let mut values = Vec::with_capacity(row.len());

    for (index, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(index)?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }

        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "BOOL" => SqlValue::Bool(row.try_get(index)?),
            "INT2" => SqlValue::Int(i64::from(row.try_get::<i16, _>(index)?)),
            "INT4" => SqlValue::Int(i64::from(row.try_get::<i32, _>(index)?)),
            "INT8" => SqlValue::Int(row.try_get(index)?),
            "FLOAT4" => SqlValue::Float(f64::from(row.try_get::<f32, _>(index)?)),
            "FLOAT8" => SqlValue::Float(row.try_get(index)?),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => SqlValue::Text(row.try_get(index)?),
            "BYTEA" => SqlValue::Bytes(row.try_get(index)?),
            "TIMESTAMPTZ" => SqlValue::Timestamp(row.try_get(index)?),
            "TIMESTAMP" => {
                SqlValue::Timestamp(row.try_get::<chrono::NaiveDateTime, _>(index)?.and_utc())
            }
            _ => {
                return Err(Error::UnsupportedColumnType {
                    column: column.name().to_string(),
                    ty: type_name,
                })
            }
        };
        values.push(value);
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_lookup_is_case_insensitive() {
        let data = TableData::new(
            vec!["LOG_ID".to_string(), "Operation_Type".to_string()],
            vec![],
        );

        assert_eq!(data.column_index("log_id"), Some(0));
        assert_eq!(data.column_index("operation_type"), Some(1));
        assert_eq!(data.column_index("missing"), None);
    }

    #[test]
    fn as_i64_only_reads_integers() {
        assert_eq!(SqlValue::Int(42).as_i64(), Some(42));
        assert_eq!(SqlValue::Text("42".to_string()).as_i64(), None);
        assert_eq!(SqlValue::Null.as_i64(), None);
    }
}
