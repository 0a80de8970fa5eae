use async_trait::async_trait;
use sqlx::query_builder::Separated;
use sqlx::{Acquire, Postgres, QueryBuilder, Row};
use tracing::instrument;

use crate::config::SinkConfig;
use crate::database::types::{SqlValue, TableData};
use crate::database::Error;

/// This trait provides the individual and composable queries against the
/// log, offset and live tables. Each method is a single atomic query and
/// can be composed within a transaction.
#[async_trait]
pub trait DbMethods<'c>: Acquire<'c, Database = Postgres> + Send + Sized {
    /// Largest `log_id` already folded into the live table. An absent
    /// offset row means the log has never been folded; processing starts
    /// from the beginning.
    #[instrument(skip(self, sink), level = "debug")]
    async fn get_log_offset(self, sink: &SinkConfig) -> Result<i64, Error> {
        let mut conn = self.acquire().await?;

        let query = format!(
            "SELECT {offset} FROM {table} WHERE {log_table} = $1",
            offset = quote_ident(&sink.offset_column),
            table = quote_ident(&sink.offset_table_name),
            log_table = quote_ident(&sink.offset_log_table_column),
        );

        let row = sqlx::query(&query)
            .bind(&sink.log_table_name)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.map_or(0, |row| row.get::<i64, _>(0)))
    }

    #[instrument(skip(self, sink), level = "debug")]
    async fn fetch_log_entries_after(
        self,
        sink: &SinkConfig,
        offset: i64,
    ) -> Result<TableData, Error> {
        let mut conn = self.acquire().await?;

        let query = format!(
            "SELECT * FROM {table} WHERE {log_id} > $1 ORDER BY {log_id} ASC",
            table = quote_ident(&sink.log_table_name),
            log_id = quote_ident(&sink.log_pk_column),
        );

        let rows = sqlx::query(&query)
            .bind(offset)
            .fetch_all(&mut *conn)
            .await?;

        TableData::from_pg_rows(rows)
    }

    #[instrument(skip(self, sink), level = "debug")]
    async fn fetch_live_table(self, sink: &SinkConfig) -> Result<TableData, Error> {
        let mut conn = self.acquire().await?;

        let query = format!("SELECT * FROM {}", quote_ident(&sink.table_name));
        let rows = sqlx::query(&query).fetch_all(&mut *conn).await?;

        TableData::from_pg_rows(rows)
    }

    #[instrument(skip(self, sink), level = "debug")]
    async fn upsert_log_offset(self, sink: &SinkConfig, offset: i64) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        let query = format!(
            "INSERT INTO {table} ({log_table}, {offset}) VALUES ($1, $2) \
             ON CONFLICT ({log_table}) DO UPDATE SET {offset} = EXCLUDED.{offset}",
            table = quote_ident(&sink.offset_table_name),
            log_table = quote_ident(&sink.offset_log_table_column),
            offset = quote_ident(&sink.offset_column),
        );

        sqlx::query(&query)
            .bind(&sink.log_table_name)
            .bind(offset)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// One batched INSERT; rows keep the caller's order.
    #[instrument(skip_all, fields(rows = rows.len()), level = "debug")]
    async fn insert_rows(
        self,
        sink: &SinkConfig,
        columns: &[String],
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<(), Error> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut conn = self.acquire().await?;

        let mut builder = build_insert(&sink.table_name, columns, rows);
        builder.build().execute(&mut *conn).await?;

        Ok(())
    }

    /// One prepared UPDATE per row, keyed by the primary key column.
    #[instrument(skip_all, fields(rows = rows.len()), level = "debug")]
    async fn update_rows(
        self,
        sink: &SinkConfig,
        columns: &[String],
        pk_index: usize,
        rows: Vec<Vec<SqlValue>>,
    ) -> Result<(), Error> {
        let mut conn = self.acquire().await?;

        for row in rows {
            let mut builder = build_update(&sink.table_name, columns, pk_index, row);
            builder.build().execute(&mut *conn).await?;
        }

        Ok(())
    }

    #[instrument(skip_all, fields(rows = ids.len()), level = "debug")]
    async fn delete_rows(self, sink: &SinkConfig, ids: &[i64]) -> Result<(), Error> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.acquire().await?;

        let query = format!(
            "DELETE FROM {table} WHERE {pk} = ANY($1)",
            table = quote_ident(&sink.table_name),
            pk = quote_ident(&sink.pk_column),
        );

        sqlx::query(&query)
            .bind(ids.to_vec())
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}

impl<'c, T> DbMethods<'c> for T where T: Acquire<'c, Database = Postgres> + Send + Sized {}

/// Table and column names come from configuration, not from SQL literals
/// in this crate, so they are always double-quote escaped.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn build_insert(
    table: &str,
    columns: &[String],
    rows: Vec<Vec<SqlValue>>,
) -> QueryBuilder<'static, Postgres> {
    let column_list = columns
        .iter()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ");

    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {} ({}) ",
        quote_ident(table),
        column_list
    ));

    builder.push_values(rows, |mut tuple, row| {
        for value in row {
            push_tuple_value(&mut tuple, value);
        }
    });

    builder
}

fn build_update(
    table: &str,
    columns: &[String],
    pk_index: usize,
    row: Vec<SqlValue>,
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", quote_ident(table)));

    let mut pk_value = SqlValue::Null;
    let mut first = true;

    for (index, (column, value)) in columns.iter().zip(row).enumerate() {
        if index == pk_index {
            pk_value = value;
            continue;
        }
        if !first {
            builder.push(", ");
        }
        first = false;

        builder.push(quote_ident(column));
        builder.push(" = ");
        push_value(&mut builder, value);
    }

    builder.push(format!(" WHERE {} = ", quote_ident(&columns[pk_index])));
    push_value(&mut builder, pk_value);

    builder
}

/// NULL goes in as a literal rather than a bind parameter: an untyped NULL
/// placeholder would be assigned a concrete wire type that may not match
/// the target column.
fn push_value(builder: &mut QueryBuilder<'static, Postgres>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            builder.push("NULL");
        }
        SqlValue::Bool(value) => {
            builder.push_bind(value);
        }
        SqlValue::Int(value) => {
            builder.push_bind(value);
        }
        SqlValue::Float(value) => {
            builder.push_bind(value);
        }
        SqlValue::Text(value) => {
            builder.push_bind(value);
        }
        SqlValue::Bytes(value) => {
            builder.push_bind(value);
        }
        SqlValue::Timestamp(value) => {
            builder.push_bind(value);
        }
    }
}

fn push_tuple_value(tuple: &mut Separated<'_, 'static, Postgres, &'static str>, value: SqlValue) {
    match value {
        SqlValue::Null => {
            tuple.push("NULL");
        }
        SqlValue::Bool(value) => {
            tuple.push_bind(value);
        }
        SqlValue::Int(value) => {
            tuple.push_bind(value);
        }
        SqlValue::Float(value) => {
            tuple.push_bind(value);
        }
        SqlValue::Text(value) => {
            tuple.push_bind(value);
        }
        SqlValue::Bytes(value) => {
            tuple.push_bind(value);
        }
        SqlValue::Timestamp(value) => {
            tuple.push_bind(value);
        }
    }
}
