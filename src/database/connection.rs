//! Transactional connections and the pools that hand them out.
//!
//! [`TransactionalConnection`] models a connection that starts in auto-commit
//! mode and can be switched into an explicit transaction. Leaving auto-commit
//! issues `BEGIN`; `commit` and `rollback` end the current transaction and open
//! the next one while auto-commit stays off; re-enabling auto-commit commits.

use crate::config::DatabaseConfig;
use crate::error::{Result, TaskError};
use async_trait::async_trait;
use sqlx::pool::{PoolConnection, PoolOptions};
use sqlx::{Connection, Database, Executor, Pool};
use std::fmt;
use tracing::{debug, info, warn};

/// A pooled connection with switchable auto-commit
#[async_trait]
pub trait TransactionalConnection: Send + Sized + 'static {
    fn auto_commit(&self) -> bool;

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    /// Close the connection instead of returning it to its pool
    async fn discard(self);
}

/// Source of transactional connections
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: TransactionalConnection;

    /// Wait for a connection; blocks for as long as the pool needs
    async fn acquire(&self) -> Result<Self::Connection>;

    async fn close(&self) {}
}

/// [`ConnectionPool`] over a sqlx [`Pool`]
#[derive(Debug, Clone)]
pub struct SqlxConnectionPool<DB: Database> {
    pool: Pool<DB>,
}

impl<DB: Database> SqlxConnectionPool<DB> {
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }

    /// Open a pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> std::result::Result<Self, sqlx::Error> {
        let pool = PoolOptions::<DB>::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            backend = DB::NAME,
            "Database connection pool ready"
        );
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }

    pub async fn health_check(&self) -> std::result::Result<bool, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(true)
    }
}

#[async_trait]
impl<DB> ConnectionPool for SqlxConnectionPool<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    type Connection = SqlxConnection<DB>;

    async fn acquire(&self) -> Result<SqlxConnection<DB>> {
        let conn = self.pool.acquire().await?;
        Ok(SqlxConnection::new(conn))
    }

    async fn close(&self) {
        self.pool.close().await;
        debug!("Database connection pool closed");
    }
}

/// Pooled sqlx connection with JDBC-style auto-commit handling
///
/// Dropped while a transaction is open, the connection is detached from its pool
/// and closed so the open transaction never leaks to the next borrower.
pub struct SqlxConnection<DB: Database> {
    conn: Option<PoolConnection<DB>>,
    auto_commit: bool,
}

impl<DB: Database> SqlxConnection<DB> {
    fn new(conn: PoolConnection<DB>) -> Self {
        Self {
            conn: Some(conn),
            auto_commit: true,
        }
    }

    /// Raw connection for running queries
    ///
    /// ```rust,ignore
    /// sqlx::query("INSERT INTO events (name) VALUES ($1)")
    ///     .bind(name)
    ///     .execute(conn.executor()?)
    ///     .await?;
    /// ```
    pub fn executor(&mut self) -> Result<&mut DB::Connection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| TaskError::execution("connection already released"))
    }
}

impl<DB> SqlxConnection<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    async fn execute_control(&mut self, statement: &'static str) -> Result<()> {
        let conn = self.executor()?;
        Executor::execute(conn, statement).await?;
        debug!(statement, "Transaction control statement executed");
        Ok(())
    }
}

#[async_trait]
impl<DB> TransactionalConnection for SqlxConnection<DB>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        match (self.auto_commit, enabled) {
            (true, false) => {
                self.execute_control("BEGIN").await?;
                self.auto_commit = false;
            }
            (false, true) => {
                self.execute_control("COMMIT").await?;
                self.auto_commit = true;
            }
            _ => {}
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        self.execute_control("COMMIT").await?;
        if let Err(err) = self.execute_control("BEGIN").await {
            self.auto_commit = true;
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if self.auto_commit {
            return Ok(());
        }
        self.execute_control("ROLLBACK").await?;
        if let Err(err) = self.execute_control("BEGIN").await {
            self.auto_commit = true;
            return Err(err);
        }
        Ok(())
    }

    async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = conn.close().await {
                warn!(error = %err, "Discarded connection did not close cleanly");
            }
        }
    }
}

impl<DB: Database> Drop for SqlxConnection<DB> {
    fn drop(&mut self) {
        if self.auto_commit {
            return;
        }
        if let Some(conn) = self.conn.take() {
            warn!("Connection released inside an open transaction; closing it");
            drop(conn.detach());
        }
    }
}

impl<DB: Database> fmt::Debug for SqlxConnection<DB> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlxConnection")
            .field("backend", &DB::NAME)
            .field("auto_commit", &self.auto_commit)
            .field("released", &self.conn.is_none())
            .finish()
    }
}

#[cfg(feature = "sqlite")]
pub type SqliteConnectionPool = SqlxConnectionPool<sqlx::Sqlite>;

#[cfg(feature = "postgres")]
pub type PgConnectionPool = SqlxConnectionPool<sqlx::Postgres>;
