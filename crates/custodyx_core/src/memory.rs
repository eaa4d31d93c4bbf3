//! crates/custodyx_core/src/memory.rs
//!
//! In-process implementations of the storage and identity ports. They back the
//! tests and make it possible to run the migration flow without any external
//! service.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::{AuthEvent, AuthSession, AuthUser};
use crate::ports::{
    AuthError, AuthEventStream, Filter, IdentityProvider, KeyValueStore, PortError, PortResult,
    Query, RemoteStore, Table,
};
use crate::session::event_stream;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//=========================================================================================
// MemoryStorage
//=========================================================================================

/// A `KeyValueStore` held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        lock(&self.items).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> PortResult<Option<String>> {
        Ok(lock(&self.items).get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> PortResult<()> {
        lock(&self.items).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> PortResult<()> {
        lock(&self.items).remove(key);
        Ok(())
    }
}

//=========================================================================================
// MemoryRemoteStore
//=========================================================================================

/// A `RemoteStore` over in-memory tables, with switchable write failures.
#[derive(Debug, Default)]
pub struct MemoryRemoteStore {
    tables: Mutex<HashMap<Table, Vec<Value>>>,
    failing_writes: Mutex<HashSet<Table>>,
    failing_reads: Mutex<HashSet<Table>>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every subsequent write to `table` fails until `restore` is called.
    pub fn fail_writes_to(&self, table: Table) {
        lock(&self.failing_writes).insert(table);
    }

    pub fn fail_reads_from(&self, table: Table) {
        lock(&self.failing_reads).insert(table);
    }

    pub fn restore(&self, table: Table) {
        lock(&self.failing_writes).remove(&table);
        lock(&self.failing_reads).remove(&table);
    }

    pub fn rows(&self, table: Table) -> Vec<Value> {
        lock(&self.tables).get(&table).cloned().unwrap_or_default()
    }

    fn check_write(&self, table: Table) -> PortResult<()> {
        if lock(&self.failing_writes).contains(&table) {
            return Err(PortError::Unexpected(format!(
                "write to {} rejected by the store",
                table
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn upsert(&self, table: Table, rows: Vec<Value>, on_conflict: &str) -> PortResult<()> {
        self.check_write(table)?;
        if !table.has_column(on_conflict) {
            return Err(PortError::Unexpected(format!(
                "{} has no column {}",
                table, on_conflict
            )));
        }

        let owner = table.owner_column();
        let mut tables = lock(&self.tables);
        let existing = tables.entry(table).or_default();

        // Validate the whole batch first so a rejected row leaves the table as it was.
        let mut keyed = Vec::with_capacity(rows.len());
        for row in rows {
            let Value::Object(fields) = row else {
                return Err(PortError::Unexpected("rows must be JSON objects".to_string()));
            };
            let key = fields.get(on_conflict).cloned().unwrap_or(Value::Null);
            if key.is_null() {
                return Err(PortError::Unexpected(format!(
                    "row for {} is missing {}",
                    table, on_conflict
                )));
            }
            let position = existing.iter().position(|r| r.get(on_conflict) == Some(&key));
            if let (Some(position), Some(incoming)) = (position, fields.get(owner)) {
                if owner != on_conflict && existing[position].get(owner) != Some(incoming) {
                    return Err(PortError::Unexpected(format!(
                        "{} row {} belongs to another user",
                        table, key
                    )));
                }
            }
            keyed.push((position, fields));
        }

        for (position, fields) in keyed {
            match position {
                Some(position) => {
                    if let Value::Object(current) = &mut existing[position] {
                        current.extend(fields);
                    }
                }
                None => existing.push(Value::Object(fields)),
            }
        }
        Ok(())
    }

    async fn insert(&self, table: Table, rows: Vec<Value>) -> PortResult<()> {
        self.check_write(table)?;
        let mut tables = lock(&self.tables);
        let existing = tables.entry(table).or_default();
        for row in rows {
            let Value::Object(mut fields) = row else {
                return Err(PortError::Unexpected("rows must be JSON objects".to_string()));
            };
            fields
                .entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
            existing.push(Value::Object(fields));
        }
        Ok(())
    }

    async fn select(&self, query: Query) -> PortResult<Vec<Value>> {
        if lock(&self.failing_reads).contains(&query.table) {
            return Err(PortError::Unexpected(format!(
                "read from {} rejected by the store",
                query.table
            )));
        }

        let mut rows: Vec<Value> = self
            .rows(query.table)
            .into_iter()
            .filter(|row| query.filters.iter().all(|filter| matches(row, filter)))
            .collect();

        if let Some(order) = &query.order {
            rows.sort_by(|a, b| {
                let ordering = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending {
                    ordering
                } else {
                    ordering.reverse()
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }
}

//=========================================================================================
// MemoryIdentityProvider
//=========================================================================================

/// An `IdentityProvider` over in-memory accounts. Passwords are kept as given,
/// so this is for tests and local runs only.
pub struct MemoryIdentityProvider {
    accounts: Mutex<HashMap<String, (String, Uuid)>>,
    current: Mutex<Option<AuthSession>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryIdentityProvider {
    fn default() -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            accounts: Mutex::new(HashMap::new()),
            current: Mutex::new(None),
            events,
        }
    }
}

impl MemoryIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_session(&self, email: &str, id: Uuid) -> AuthSession {
        let session = AuthSession {
            access_token: Uuid::new_v4().to_string(),
            user: AuthUser {
                id,
                email: Some(email.to_string()),
            },
            expires_at: Utc::now() + Duration::hours(1),
        };
        *lock(&self.current) = Some(session.clone());
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        session
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentityProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _metadata: Option<Value>,
    ) -> Result<AuthSession, AuthError> {
        if !email.contains('@') || password.len() < 6 {
            return Err(AuthError::InvalidInput("email or password rejected".to_string()));
        }
        let id = Uuid::new_v4();
        {
            let mut accounts = lock(&self.accounts);
            if accounts.contains_key(email) {
                return Err(AuthError::EmailTaken);
            }
            accounts.insert(email.to_string(), (password.to_string(), id));
        }
        Ok(self.open_session(email, id))
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let account = lock(&self.accounts).get(email).cloned();
        match account {
            Some((stored, id)) if stored == password => Ok(self.open_session(email, id)),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *lock(&self.current) = None;
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<AuthSession>, AuthError> {
        Ok(lock(&self.current).clone())
    }

    async fn refresh_session(&self) -> Result<AuthSession, AuthError> {
        let mut session = lock(&self.current)
            .clone()
            .ok_or(AuthError::InvalidCredentials)?;
        session.expires_at = Utc::now() + Duration::hours(1);
        *lock(&self.current) = Some(session.clone());
        let _ = self.events.send(AuthEvent::TokenRefreshed(session.clone()));
        Ok(session)
    }

    fn subscribe(&self) -> AuthEventStream {
        event_stream(self.events.subscribe())
    }
}

fn matches(row: &Value, filter: &Filter) -> bool {
    let actual = row.get(filter.column()).unwrap_or(&Value::Null);
    match filter {
        Filter::Eq(_, expected) => actual == expected,
        Filter::Gte(_, bound) => !actual.is_null() && compare(actual, bound) != Ordering::Less,
    }
}

// Timestamps compare chronologically even when their offsets are written differently.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        _ => a.to_string().cmp(&b.to_string()),
    }
}
