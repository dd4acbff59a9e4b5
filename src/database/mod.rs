//! # Database Scope
//!
//! Transactional execution of task bodies over a connection pool.
//!
//! ## Key Components
//!
//! - [`connection`] - connection and pool traits plus their sqlx implementation
//! - [`transaction`] - commit-or-rollback scope around a task body
//! - [`transactional_task`] - task contract whose body runs inside one transaction
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use taskchain_core::database::{SqliteConnectionPool, Transactional};
//!
//! let pool = Arc::new(SqliteConnectionPool::connect(&config.database).await?);
//! let handle = scheduler.submit(Transactional::new(ImportRows::new(rows), pool));
//! ```

pub mod connection;
pub mod transaction;
pub mod transactional_task;

#[cfg(feature = "postgres")]
pub use connection::PgConnectionPool;
#[cfg(feature = "sqlite")]
pub use connection::SqliteConnectionPool;
pub use connection::{ConnectionPool, SqlxConnection, SqlxConnectionPool, TransactionalConnection};
pub use transaction::TransactionScope;
pub use transactional_task::{Transactional, TransactionalTask};
