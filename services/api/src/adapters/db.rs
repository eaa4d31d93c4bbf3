//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `RemoteStore` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Rows arrive as JSON objects. Postgres turns them into typed records itself
//! through `jsonb_populate_recordset`, so no column type is spelled out here;
//! only column *names* are interpolated, and those are checked against the
//! table's fixed column list first.

use async_trait::async_trait;
use custodyx_core::ports::{Filter, PortError, PortResult, Query, RemoteStore, Table};
use serde_json::{Map, Value};
use sqlx::PgPool;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `RemoteStore` port.
#[derive(Clone)]
pub struct PgRemoteStore {
    pool: PgPool,
}

impl PgRemoteStore {
    /// Creates a new `PgRemoteStore`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

//=========================================================================================
// SQL Builders
//=========================================================================================

fn check_column(table: Table, column: &str) -> PortResult<()> {
    if table.has_column(column) {
        Ok(())
    } else {
        Err(PortError::Unexpected(format!(
            "{} has no column '{}'",
            table, column
        )))
    }
}

/// The columns present in `rows`, in table order. Fails on unknown keys.
fn row_columns(table: Table, rows: &[Value]) -> PortResult<Vec<&'static str>> {
    let mut present: Vec<&str> = Vec::new();
    for row in rows {
        let fields: &Map<String, Value> = row
            .as_object()
            .ok_or_else(|| PortError::Unexpected("rows must be JSON objects".to_string()))?;
        for key in fields.keys() {
            check_column(table, key)?;
            if !present.contains(&key.as_str()) {
                present.push(key);
            }
        }
    }
    Ok(table
        .columns()
        .iter()
        .copied()
        .filter(|column| present.contains(column))
        .collect())
}

fn insert_sql(table: Table, columns: &[&str]) -> String {
    let columns = columns.join(", ");
    format!(
        "INSERT INTO {table} ({columns}) SELECT {columns} FROM jsonb_populate_recordset(NULL::{table}, $1)",
        table = table.name(),
        columns = columns,
    )
}

/// The upsert statement, and whether it is scoped to the row's owner.
///
/// When the owner column is part of the rows but not the conflict key, an
/// existing row is only updated if it already belongs to the same owner, and
/// the owner itself is never overwritten.
fn upsert_sql(table: Table, columns: &[&str], on_conflict: &str) -> (String, bool) {
    let owner = table.owner_column();
    let owned = owner != on_conflict && columns.contains(&owner);
    let mut updates: Vec<String> = columns
        .iter()
        .filter(|column| **column != on_conflict && !(owned && **column == owner))
        .map(|column| format!("{column} = EXCLUDED.{column}"))
        .collect();
    if owned && updates.is_empty() {
        updates.push(format!("{owner} = EXCLUDED.{owner}"));
    }
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    let mut sql = format!(
        "{} ON CONFLICT ({}) {}",
        insert_sql(table, columns),
        on_conflict,
        action
    );
    if owned {
        sql.push_str(&format!(
            " WHERE {table}.{owner} = EXCLUDED.{owner}",
            table = table.name()
        ));
    }
    (sql, owned)
}

/// Builds the select and the JSON parameters to bind, in order.
///
/// Each filter value travels as `{"column": value}` and is cast through the
/// table's record type, so it compares with the column's own type.
fn select_sql(query: &Query) -> PortResult<(String, Vec<Value>)> {
    let table = query.table.name();
    let mut sql = format!("SELECT to_jsonb(t) AS row FROM {table} t");
    let mut params = Vec::with_capacity(query.filters.len());

    for (index, filter) in query.filters.iter().enumerate() {
        let column = filter.column();
        check_column(query.table, column)?;
        let (operator, value) = match filter {
            Filter::Eq(_, value) => ("=", value),
            Filter::Gte(_, value) => (">=", value),
        };
        sql.push_str(if index == 0 { " WHERE " } else { " AND " });
        sql.push_str(&format!(
            "t.{column} {operator} (jsonb_populate_record(NULL::{table}, ${})).{column}",
            index + 1
        ));
        let mut wrapped = Map::new();
        wrapped.insert(column.to_string(), value.clone());
        params.push(Value::Object(wrapped));
    }

    if let Some(order) = &query.order {
        check_column(query.table, &order.column)?;
        let direction = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY t.{} {}", order.column, direction));
    }
    if let Some(limit) = query.limit {
        sql.push_str(&format!(" LIMIT {}", limit));
    }
    Ok((sql, params))
}

//=========================================================================================
// `RemoteStore` Trait Implementation
//=========================================================================================

#[async_trait]
impl RemoteStore for PgRemoteStore {
    async fn upsert(&self, table: Table, rows: Vec<Value>, on_conflict: &str) -> PortResult<()> {
        check_column(table, on_conflict)?;
        if rows.is_empty() {
            return Ok(());
        }
        let columns = row_columns(table, &rows)?;
        let (sql, owned) = upsert_sql(table, &columns, on_conflict);
        let sent = rows.len() as u64;
        let affected = sqlx::query(&sql)
            .bind(Value::Array(rows))
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?
            .rows_affected();
        if owned && affected < sent {
            return Err(PortError::Unexpected(format!(
                "{} of {} rows in {} belong to another user",
                sent - affected,
                sent,
                table
            )));
        }
        Ok(())
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> PortResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let columns = row_columns(table, &rows)?;
        sqlx::query(&insert_sql(table, &columns))
            .bind(Value::Array(rows))
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }

    async fn select(&self, query: Query) -> PortResult<Vec<Value>> {
        let (sql, params) = select_sql(&query)?;
        let mut statement = sqlx::query_scalar::<_, Value>(&sql);
        for param in params {
            statement = statement.bind(param);
        }
        statement
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use custodyx_core::ports::OrderBy;
    use serde_json::json;

    #[test]
    fn upsert_updates_every_column_but_the_key_and_owner() {
        let rows = vec![json!({ "id": "r1", "user_id": "u", "content": "c", "created_at": "2024-01-01T00:00:00Z" })];
        let columns = row_columns(Table::Reports, &rows).unwrap();

        assert_eq!(columns, vec!["id", "user_id", "content", "created_at"]);
        let (sql, owned) = upsert_sql(Table::Reports, &columns, "id");
        assert!(owned);
        assert_eq!(
            sql,
            "INSERT INTO reports (id, user_id, content, created_at) \
             SELECT id, user_id, content, created_at FROM jsonb_populate_recordset(NULL::reports, $1) \
             ON CONFLICT (id) DO UPDATE SET content = EXCLUDED.content, \
             created_at = EXCLUDED.created_at \
             WHERE reports.user_id = EXCLUDED.user_id"
        );
    }

    #[test]
    fn owner_only_rows_still_report_existing_matches() {
        let (sql, owned) = upsert_sql(Table::Documents, &["id", "user_id"], "id");
        assert!(owned);
        assert!(sql.ends_with(
            "ON CONFLICT (id) DO UPDATE SET user_id = EXCLUDED.user_id \
             WHERE documents.user_id = EXCLUDED.user_id"
        ));
    }

    #[test]
    fn upsert_keyed_on_the_owner_is_not_scoped() {
        let (sql, owned) = upsert_sql(Table::Users, &["id", "name"], "id");
        assert!(!owned);
        assert!(sql.ends_with("ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name"));
    }

    #[test]
    fn unknown_columns_are_refused() {
        let rows = vec![json!({ "id": "r1", "content; DROP TABLE reports": "x" })];
        assert!(row_columns(Table::Reports, &rows).is_err());

        let query = Query::from(Table::Reports).eq("owner", "u");
        assert!(select_sql(&query).is_err());
    }

    #[test]
    fn select_binds_each_filter_through_the_record_type() {
        let query = Query::from(Table::TokenUsage)
            .eq("user_id", "7f1c0a52-4bd4-4a4a-9a57-9d0a8f3f1e11")
            .gte("used_at", "2024-05-01T00:00:00+00:00")
            .order(Some(OrderBy::newest_first("used_at")))
            .limit(10);

        let (sql, params) = select_sql(&query).unwrap();

        assert_eq!(
            sql,
            "SELECT to_jsonb(t) AS row FROM token_usage t \
             WHERE t.user_id = (jsonb_populate_record(NULL::token_usage, $1)).user_id \
             AND t.used_at >= (jsonb_populate_record(NULL::token_usage, $2)).used_at \
             ORDER BY t.used_at DESC LIMIT 10"
        );
        assert_eq!(params[1], json!({ "used_at": "2024-05-01T00:00:00+00:00" }));
    }

    #[test]
    fn insert_leaves_out_columns_the_rows_do_not_set() {
        let rows = vec![json!({ "user_id": "u", "tokens_used": 5, "used_at": "2024-05-01T00:00:00Z" })];
        let columns = row_columns(Table::TokenUsage, &rows).unwrap();

        assert_eq!(
            insert_sql(Table::TokenUsage, &columns),
            "INSERT INTO token_usage (user_id, tokens_used, used_at) \
             SELECT user_id, tokens_used, used_at FROM jsonb_populate_recordset(NULL::token_usage, $1)"
        );
    }
}
