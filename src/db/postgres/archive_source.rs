use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Database, PgPool, Postgres, query::Query};
use tokio::sync::OnceCell;

use super::columns::{decode_row, select_list};
use crate::db::{
    error::{DbError, DbResult},
    repos::{ArchiveSource, KeyValue, Placeholder, SourceRow, TableSpec},
};

type PgQuery<'q> = Query<'q, Postgres, <Postgres as Database>::Arguments<'q>>;

fn bind_key<'q>(query: PgQuery<'q>, key: &'q KeyValue) -> PgQuery<'q> {
    match key {
        KeyValue::Integer(v) => query.bind(*v),
        KeyValue::Text(v) => query.bind(v.as_str()),
    }
}

/// Column names and `pg_type.typname`s of a table, in column order.
const COLUMN_TYPES_SQL: &str = r#"
    SELECT a.attname::text, t.typname::text
    FROM pg_attribute a
    JOIN pg_type t ON t.oid = a.atttypid
    WHERE a.attrelid = $1::regclass AND a.attnum > 0 AND NOT a.attisdropped
    ORDER BY a.attnum
"#;

/// Counting and paging run on the read pool, deletes on the write pool.
pub struct PostgresArchiveSource {
    write_pool: PgPool,
    read_pool: PgPool,
    table: TableSpec,
    /// Page query select list, resolved from the catalog on first use.
    select: OnceCell<String>,
}

impl PostgresArchiveSource {
    pub fn new(write_pool: PgPool, read_pool: Option<PgPool>, table: TableSpec) -> Self {
        let read_pool = read_pool.unwrap_or_else(|| write_pool.clone());
        Self {
            write_pool,
            read_pool,
            table,
            select: OnceCell::new(),
        }
    }

    async fn select_list(&self) -> DbResult<&str> {
        let select = self
            .select
            .get_or_try_init(|| async {
                let columns: Vec<(String, String)> = sqlx::query_as(COLUMN_TYPES_SQL)
                    .bind(self.table.quoted_table())
                    .fetch_all(&self.read_pool)
                    .await?;
                if columns.is_empty() {
                    return Err(DbError::Validation(format!(
                        "table '{}' has no columns",
                        self.table.table_name()
                    )));
                }
                let select = select_list(&columns);
                tracing::debug!(table = %self.table.table_name(), select, "Resolved page select list");
                Ok(select)
            })
            .await?;
        Ok(select)
    }
}

#[async_trait]
impl ArchiveSource for PostgresArchiveSource {
    fn table(&self) -> &TableSpec {
        &self.table
    }

    async fn count_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let sql = self.table.count_sql(Placeholder::Dollar);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(cutoff)
            .fetch_one(&self.read_pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&KeyValue>,
        limit: u32,
    ) -> DbResult<Vec<SourceRow>> {
        let select = self.select_list().await?;
        let sql = self
            .table
            .page_sql_selecting(select, after.is_some(), Placeholder::Dollar);
        let mut query = sqlx::query(&sql).bind(cutoff);
        if let Some(key) = after {
            query = bind_key(query, key);
        }

        let rows = query
            .bind(i64::from(limit))
            .fetch_all(&self.read_pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn delete_keys(&self, keys: &[KeyValue]) -> DbResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let sql = self.table.delete_sql(keys.len(), Placeholder::Dollar);
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = bind_key(query, key);
        }

        let mut tx = self.write_pool.begin().await?;
        match query.execute(&mut *tx).await {
            Ok(result) => {
                tx.commit().await?;
                Ok(result.rows_affected())
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::warn!(error = %rollback_err, "Rollback of failed delete batch failed");
                }
                Err(e.into())
            }
        }
    }
}
