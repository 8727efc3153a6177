//! User persistence.
//!
//! Handlers depend on the [`UserStore`] trait, not on SQL. The SQLite
//! implementation is wired in at startup; tests can pass their own.

use std::future::Future;

use futures_util::stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::sql::{SqlClient, SqlError, SqlResult, SqlValue};
use crate::users::model::User;

/// Storage operations behind the `/users` routes.
pub trait UserStore: Clone + Send + Sync + 'static {
    fn list(&self) -> impl Future<Output = SqlResult<Vec<User>>> + Send;

    fn find(&self, id: i64) -> impl Future<Output = SqlResult<Option<User>>> + Send;

    fn create(&self, name: String) -> impl Future<Output = SqlResult<User>> + Send;

    /// Returns `None` if no user has `id`.
    fn rename(&self, id: i64, name: String) -> impl Future<Output = SqlResult<Option<User>>> + Send;

    /// Returns `false` if no user has `id`.
    fn remove(&self, id: i64) -> impl Future<Output = SqlResult<bool>> + Send;

    /// Every user in id order, produced lazily until `cancel` fires.
    fn export(&self, cancel: CancellationToken) -> impl Stream<Item = SqlResult<User>> + Send + 'static;
}

/// [`UserStore`] backed by the shared SQLite connection.
#[derive(Debug, Clone)]
pub struct SqlUserStore {
    db: SqlClient,
}

impl SqlUserStore {
    pub fn new(db: SqlClient) -> Self {
        Self { db }
    }

    /// Create the `users` table and seed it with `seed` rows if it is empty.
    ///
    /// Returns the number of rows inserted.
    pub async fn migrate(&self, seed: u32) -> SqlResult<u32> {
        let inserted = self
            .db
            .with_transaction(move |tx| {
                tx.execute(
                    "CREATE TABLE IF NOT EXISTS users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
                    &[],
                )?;
                let existing = tx.query("SELECT COUNT(*) AS n FROM users", &[])?;
                let count = existing
                    .first()
                    .and_then(|row| row.get("n"))
                    .and_then(|n| n.as_i64())
                    .unwrap_or(0);
                if count > 0 {
                    return Ok(0);
                }
                for i in 0..seed {
                    tx.execute(
                        "INSERT INTO users (name) VALUES (?)",
                        &[SqlValue::Text(format!("User {i}"))],
                    )?;
                }
                Ok(seed)
            })
            .await?;

        tracing::info!(inserted, "Users table ready");
        Ok(inserted)
    }
}

impl UserStore for SqlUserStore {
    async fn list(&self) -> SqlResult<Vec<User>> {
        self.db
            .query_as("SELECT id, name FROM users ORDER BY id", vec![])
            .await
    }

    async fn find(&self, id: i64) -> SqlResult<Option<User>> {
        let users: Vec<User> = self
            .db
            .query_as(
                "SELECT id, name FROM users WHERE id = ?",
                vec![SqlValue::Integer(id)],
            )
            .await?;
        Ok(users.into_iter().next())
    }

    async fn create(&self, name: String) -> SqlResult<User> {
        self.db
            .with_transaction(move |tx| {
                let summary = tx.execute(
                    "INSERT INTO users (name) VALUES (?)",
                    &[SqlValue::Text(name)],
                )?;
                tx.query_as::<User>(
                    "SELECT id, name FROM users WHERE id = ?",
                    &[SqlValue::Integer(summary.last_insert_rowid)],
                )?
                .into_iter()
                .next()
                .ok_or(SqlError::Query(rusqlite::Error::QueryReturnedNoRows))
            })
            .await
    }

    async fn rename(&self, id: i64, name: String) -> SqlResult<Option<User>> {
        self.db
            .with_transaction(move |tx| {
                let summary = tx.execute(
                    "UPDATE users SET name = ? WHERE id = ?",
                    &[SqlValue::Text(name), SqlValue::Integer(id)],
                )?;
                if summary.changes == 0 {
                    return Ok(None);
                }
                Ok(tx
                    .query_as::<User>(
                        "SELECT id, name FROM users WHERE id = ?",
                        &[SqlValue::Integer(id)],
                    )?
                    .into_iter()
                    .next())
            })
            .await
    }

    async fn remove(&self, id: i64) -> SqlResult<bool> {
        let summary = self
            .db
            .execute("DELETE FROM users WHERE id = ?", vec![SqlValue::Integer(id)])
            .await?;
        Ok(summary.changes > 0)
    }

    fn export(&self, cancel: CancellationToken) -> impl Stream<Item = SqlResult<User>> + Send + 'static {
        self.db
            .stream("SELECT id, name FROM users ORDER BY id", vec![], cancel)
            .map(|row| -> SqlResult<User> {
                let row = row?;
                Ok(serde_json::from_value(serde_json::Value::Object(row))?)
            })
    }
}
