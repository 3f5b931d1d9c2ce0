use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Database, Sqlite, SqlitePool, query::Query};

use super::columns::decode_row;
use crate::db::{
    error::DbResult,
    repos::{ArchiveSource, KeyValue, Placeholder, SourceRow, TableSpec},
};

type SqliteQuery<'q> = Query<'q, Sqlite, <Sqlite as Database>::Arguments<'q>>;

fn bind_key<'q>(query: SqliteQuery<'q>, key: &'q KeyValue) -> SqliteQuery<'q> {
    match key {
        KeyValue::Integer(v) => query.bind(*v),
        KeyValue::Text(v) => query.bind(v.as_str()),
    }
}

pub struct SqliteArchiveSource {
    pool: SqlitePool,
    table: TableSpec,
}

impl SqliteArchiveSource {
    pub fn new(pool: SqlitePool, table: TableSpec) -> Self {
        Self { pool, table }
    }
}

#[async_trait]
impl ArchiveSource for SqliteArchiveSource {
    fn table(&self) -> &TableSpec {
        &self.table
    }

    async fn count_before(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let sql = self.table.count_sql(Placeholder::Question);
        let count: i64 = sqlx::query_scalar(&sql)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn fetch_page(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&KeyValue>,
        limit: u32,
    ) -> DbResult<Vec<SourceRow>> {
        let sql = self.table.page_sql(after.is_some(), Placeholder::Question);
        let mut query = sqlx::query(&sql).bind(cutoff);
        if let Some(key) = after {
            query = bind_key(query, key);
        }

        let rows = query
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn delete_keys(&self, keys: &[KeyValue]) -> DbResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }

        let sql = self.table.delete_sql(keys.len(), Placeholder::Question);
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = bind_key(query, key);
        }

        let mut tx = self.pool.begin().await?;
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
