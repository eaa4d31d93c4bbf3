//! crates/custodyx_core/src/remote.rs
//!
//! A thin typed layer over the `RemoteStore` port. It owns no state: every
//! call serializes the rows, makes one round trip and decodes the answer.
//! Retries are left to the caller.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::domain::UserId;
use crate::ports::{OrderBy, Query, RemoteStore, Table};

/// A failed round trip, naming the table involved.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("Failed to write {table}: {reason}")]
    Write { table: Table, reason: String },
    #[error("Failed to read {table}: {reason}")]
    Read { table: Table, reason: String },
}

impl RemoteError {
    pub fn table(&self) -> Table {
        match self {
            RemoteError::Write { table, .. } | RemoteError::Read { table, .. } => *table,
        }
    }

    fn write(table: Table, reason: impl ToString) -> Self {
        RemoteError::Write {
            table,
            reason: reason.to_string(),
        }
    }

    fn read(table: Table, reason: impl ToString) -> Self {
        RemoteError::Read {
            table,
            reason: reason.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct RemoteClient {
    store: Arc<dyn RemoteStore>,
}

impl RemoteClient {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Upserts `rows`, resolving conflicts on `conflict_key`.
    pub async fn write<T: Serialize>(
        &self,
        table: Table,
        rows: &[T],
        conflict_key: &str,
    ) -> Result<(), RemoteError> {
        let rows = encode(table, rows)?;
        self.store
            .upsert(table, rows, conflict_key)
            .await
            .map_err(|e| RemoteError::write(table, e))
    }

    pub async fn insert<T: Serialize>(&self, table: Table, rows: &[T]) -> Result<(), RemoteError> {
        let rows = encode(table, rows)?;
        self.store
            .insert(table, rows)
            .await
            .map_err(|e| RemoteError::write(table, e))
    }

    pub async fn read_all_for_owner<T: DeserializeOwned>(
        &self,
        table: Table,
        owner_id: UserId,
        order_by: Option<OrderBy>,
    ) -> Result<Vec<T>, RemoteError> {
        let query = Query::from(table)
            .eq(table.owner_column(), owner_id.to_string())
            .order(order_by);
        self.fetch(query).await
    }

    /// The owner's single row, if there is one.
    pub async fn read_one<T: DeserializeOwned>(
        &self,
        table: Table,
        owner_id: UserId,
    ) -> Result<Option<T>, RemoteError> {
        let query = Query::from(table)
            .eq(table.owner_column(), owner_id.to_string())
            .limit(1);
        Ok(self.fetch(query).await?.into_iter().next())
    }

    /// Rows owned by `owner_id` whose `column` is at or after `since`.
    pub async fn read_for_owner_since<T: DeserializeOwned>(
        &self,
        table: Table,
        owner_id: UserId,
        column: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<T>, RemoteError> {
        let query = Query::from(table)
            .eq(table.owner_column(), owner_id.to_string())
            .gte(column, since.to_rfc3339());
        self.fetch(query).await
    }

    async fn fetch<T: DeserializeOwned>(&self, query: Query) -> Result<Vec<T>, RemoteError> {
        let table = query.table;
        let rows = self
            .store
            .select(query)
            .await
            .map_err(|e| RemoteError::read(table, e))?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| RemoteError::read(table, e)))
            .collect()
    }
}

fn encode<T: Serialize>(table: Table, rows: &[T]) -> Result<Vec<Value>, RemoteError> {
    rows.iter()
        .map(|row| serde_json::to_value(row).map_err(|e| RemoteError::write(table, e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SubscriptionRow, SubscriptionStatus, SubscriptionTier};
    use crate::memory::MemoryRemoteStore;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn read_one_returns_none_for_missing_rows() {
        let client = RemoteClient::new(Arc::new(MemoryRemoteStore::new()));
        let row: Option<SubscriptionRow> = client
            .read_one(Table::Subscriptions, Uuid::new_v4())
            .await
            .unwrap();
        assert!(row.is_none());
    }

    #[tokio::test]
    async fn read_one_is_scoped_to_the_owner() {
        let store = Arc::new(MemoryRemoteStore::new());
        let client = RemoteClient::new(store.clone());
        let (mine, theirs) = (Uuid::new_v4(), Uuid::new_v4());
        for (owner, tier) in [(theirs, "Pro"), (mine, "Plus")] {
            store
                .upsert(
                    Table::Subscriptions,
                    vec![json!({
                        "id": Uuid::new_v4(), "user_id": owner, "tier": tier, "status": "active"
                    })],
                    "id",
                )
                .await
                .unwrap();
        }

        let row: SubscriptionRow = client
            .read_one(Table::Subscriptions, mine)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(row.tier, SubscriptionTier::Plus);
        assert_eq!(row.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn store_failures_name_the_table() {
        let store = Arc::new(MemoryRemoteStore::new());
        store.fail_writes_to(Table::Reports);
        let client = RemoteClient::new(store);

        let err = client
            .write(Table::Reports, &[json!({ "id": "r" })], "id")
            .await
            .unwrap_err();

        assert_eq!(err.table(), Table::Reports);
        assert!(matches!(err, RemoteError::Write { .. }));
    }

    #[tokio::test]
    async fn undecodable_rows_surface_as_read_errors() {
        let store = Arc::new(MemoryRemoteStore::new());
        let owner = Uuid::new_v4();
        store
            .upsert(
                Table::Subscriptions,
                vec![json!({ "id": Uuid::new_v4(), "user_id": owner, "tier": "Gold" })],
                "id",
            )
            .await
            .unwrap();
        let client = RemoteClient::new(store);

        let result: Result<Option<SubscriptionRow>, _> =
            client.read_one(Table::Subscriptions, owner).await;

        assert!(matches!(result, Err(RemoteError::Read { .. })));
    }
}
