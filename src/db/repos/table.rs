//! Table layout and the SQL issued against it.
//!
//! Identifiers come from configuration, so they are validated against a
//! conservative pattern and always emitted double-quoted. Values are always
//! bound as parameters.

use std::{fmt::Write as _, sync::LazyLock};

use regex::Regex;

use crate::{
    config::{KeyKind, TableConfig},
    db::error::{DbError, DbResult},
};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex is valid"));

/// Whether `s` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
pub fn is_valid_identifier(s: &str) -> bool {
    IDENTIFIER.is_match(s)
}

fn quote(ident: &str) -> String {
    format!("\"{ident}\"")
}

/// Bind parameter syntax of the target database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `?` (SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl Placeholder {
    /// Placeholder for the 1-based parameter `n`.
    fn nth(self, n: usize) -> String {
        match self {
            Placeholder::Question => "?".to_string(),
            Placeholder::Dollar => format!("${n}"),
        }
    }
}

/// Validated layout of the table being archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    table: Vec<String>,
    primary_key: String,
    date_column: String,
    key_kind: KeyKind,
}

impl TableSpec {
    pub fn new(
        table: &str,
        primary_key: &str,
        date_column: &str,
        key_kind: KeyKind,
    ) -> DbResult<Self> {
        let segments: Vec<String> = table.split('.').map(str::to_string).collect();
        if segments.len() > 2 || !segments.iter().all(|s| is_valid_identifier(s)) {
            return Err(DbError::Validation(format!("invalid table name '{table}'")));
        }
        for column in [primary_key, date_column] {
            if !is_valid_identifier(column) {
                return Err(DbError::Validation(format!("invalid column name '{column}'")));
            }
        }

        Ok(Self {
            table: segments,
            primary_key: primary_key.to_string(),
            date_column: date_column.to_string(),
            key_kind,
        })
    }

    pub fn from_config(config: &TableConfig) -> DbResult<Self> {
        Self::new(
            &config.name,
            &config.primary_key,
            &config.date_column,
            config.primary_key_kind,
        )
    }

    /// Unquoted, possibly schema-qualified table name.
    pub fn table_name(&self) -> String {
        self.table.join(".")
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn date_column(&self) -> &str {
        &self.date_column
    }

    pub fn key_kind(&self) -> KeyKind {
        self.key_kind
    }

    /// Table name as it appears in SQL, each segment double-quoted.
    pub fn quoted_table(&self) -> String {
        self.table
            .iter()
            .map(|s| quote(s))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// `date < <first parameter>`.
    ///
    /// SQLite keeps timestamps as text in whatever format the writer chose,
    /// so both sides go through `julianday()` to compare instants rather
    /// than strings.
    fn before_cutoff(&self, ph: Placeholder) -> String {
        let date = quote(&self.date_column);
        match ph {
            Placeholder::Question => format!("julianday({date}) < julianday(?)"),
            Placeholder::Dollar => format!("{date} < $1"),
        }
    }

    /// `SELECT COUNT(1) ... WHERE date < $1`
    pub fn count_sql(&self, ph: Placeholder) -> String {
        format!(
            "SELECT COUNT(1) FROM {} WHERE {}",
            self.quoted_table(),
            self.before_cutoff(ph),
        )
    }

    /// One keyset page, ascending by primary key.
    ///
    /// Parameters: cutoff, then the last seen key when `after_key` is set,
    /// then the row limit.
    pub fn page_sql(&self, after_key: bool, ph: Placeholder) -> String {
        self.page_sql_selecting("*", after_key, ph)
    }

    /// [`Self::page_sql`] with an explicit select list.
    pub fn page_sql_selecting(&self, select: &str, after_key: bool, ph: Placeholder) -> String {
        let pk = quote(&self.primary_key);
        let mut sql = format!(
            "SELECT {select} FROM {} WHERE {}",
            self.quoted_table(),
            self.before_cutoff(ph),
        );
        let limit_param = if after_key {
            let _ = write!(sql, " AND {pk} > {}", ph.nth(2));
            3
        } else {
            2
        };
        let _ = write!(sql, " ORDER BY {pk} ASC LIMIT {}", ph.nth(limit_param));
        sql
    }

    /// `DELETE ... WHERE pk IN (...)` with `count` parameters.
    pub fn delete_sql(&self, count: usize, ph: Placeholder) -> String {
        let params = (1..=count).map(|n| ph.nth(n)).collect::<Vec<_>>().join(", ");
        format!(
            "DELETE FROM {} WHERE {} IN ({params})",
            self.quoted_table(),
            quote(&self.primary_key),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orders() -> TableSpec {
        TableSpec::new("Orders", "Id", "OrderDate", KeyKind::Integer).unwrap()
    }

    #[test]
    fn test_count_sql() {
        assert_eq!(
            orders().count_sql(Placeholder::Question),
            r#"SELECT COUNT(1) FROM "Orders" WHERE julianday("OrderDate") < julianday(?)"#
        );
        assert_eq!(
            orders().count_sql(Placeholder::Dollar),
            r#"SELECT COUNT(1) FROM "Orders" WHERE "OrderDate" < $1"#
        );
    }

    #[test]
    fn test_first_page_sql_omits_key_predicate() {
        assert_eq!(
            orders().page_sql(false, Placeholder::Dollar),
            r#"SELECT * FROM "Orders" WHERE "OrderDate" < $1 ORDER BY "Id" ASC LIMIT $2"#
        );
    }

    #[test]
    fn test_next_page_sql() {
        assert_eq!(
            orders().page_sql(true, Placeholder::Dollar),
            r#"SELECT * FROM "Orders" WHERE "OrderDate" < $1 AND "Id" > $2 ORDER BY "Id" ASC LIMIT $3"#
        );
        assert_eq!(
            orders().page_sql(true, Placeholder::Question),
            r#"SELECT * FROM "Orders" WHERE julianday("OrderDate") < julianday(?) AND "Id" > ? ORDER BY "Id" ASC LIMIT ?"#
        );
    }

    #[test]
    fn test_page_sql_with_select_list() {
        let select = r#""Id", "Status"::text AS "Status""#;
        assert_eq!(
            orders().page_sql_selecting(select, false, Placeholder::Dollar),
            r#"SELECT "Id", "Status"::text AS "Status" FROM "Orders" WHERE "OrderDate" < $1 ORDER BY "Id" ASC LIMIT $2"#
        );
    }

    #[test]
    fn test_delete_sql() {
        assert_eq!(
            orders().delete_sql(3, Placeholder::Dollar),
            r#"DELETE FROM "Orders" WHERE "Id" IN ($1, $2, $3)"#
        );
        assert_eq!(
            orders().delete_sql(2, Placeholder::Question),
            r#"DELETE FROM "Orders" WHERE "Id" IN (?, ?)"#
        );
    }

    #[test]
    fn test_schema_qualified_table_is_quoted_per_segment() {
        let spec = TableSpec::new("sales.Orders", "Id", "OrderDate", KeyKind::Integer).unwrap();
        assert_eq!(spec.table_name(), "sales.Orders");
        assert!(
            spec.count_sql(Placeholder::Question)
                .contains(r#"FROM "sales"."Orders""#)
        );
    }

    #[test]
    fn test_rejects_injection() {
        assert!(TableSpec::new("Orders\"; --", "Id", "OrderDate", KeyKind::Integer).is_err());
        assert!(TableSpec::new("Orders", "Id desc", "OrderDate", KeyKind::Integer).is_err());
        assert!(TableSpec::new("Orders", "Id", "", KeyKind::Integer).is_err());
    }
}
