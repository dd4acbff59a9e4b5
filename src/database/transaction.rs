//! Commit-or-rollback scope around a task body.

use super::connection::{ConnectionPool, TransactionalConnection};
use crate::error::{Result, TaskError};
use crate::execution::TaskContext;
use tracing::{debug, warn};

/// Connection checked out of a pool with auto-commit disabled
///
/// Finish it with [`complete`](Self::complete), [`commit`](Self::commit) or
/// [`rollback`](Self::rollback). Each of them restores auto-commit before the
/// connection goes back to its pool, and discards the connection when that fails.
#[derive(Debug)]
pub struct TransactionScope<C: TransactionalConnection> {
    conn: C,
}

impl<C: TransactionalConnection> TransactionScope<C> {
    /// Acquire a connection and open a transaction on it
    pub async fn begin<P>(pool: &P) -> Result<Self>
    where
        P: ConnectionPool<Connection = C> + ?Sized,
    {
        let mut conn = pool.acquire().await?;
        if let Err(err) = conn.set_auto_commit(false).await {
            warn!(error = %err, "Could not open transaction; discarding connection");
            conn.discard().await;
            return Err(err);
        }
        Ok(Self { conn })
    }

    pub fn connection(&mut self) -> &mut C {
        &mut self.conn
    }

    /// Commit when the body succeeded and no cancellation was requested,
    /// otherwise roll back
    ///
    /// The body's error is returned unchanged after rollback. A body that
    /// succeeded after cancellation was requested yields [`TaskError::Cancelled`].
    /// Committing passes the context's commit point, so a cancel request that
    /// arrives while the connection is being released is refused.
    pub async fn complete<T>(self, ctx: &TaskContext, body: Result<T>) -> Result<T> {
        match body {
            Ok(value) if ctx.enter_commit_point() => {
                self.commit().await?;
                Ok(value)
            }
            Ok(_) => {
                debug!(task_id = %ctx.id(), "Cancellation requested; rolling back");
                self.rollback_quietly().await;
                Err(TaskError::Cancelled)
            }
            Err(err) => {
                debug!(task_id = %ctx.id(), error = %err, "Task body failed; rolling back");
                self.rollback_quietly().await;
                Err(err)
            }
        }
    }

    /// Commit and release the connection
    ///
    /// A failed commit is followed by a rollback; the commit error is returned.
    pub async fn commit(self) -> Result<()> {
        let mut conn = self.conn;
        match conn.commit().await {
            Ok(()) => release(conn).await,
            Err(err) => {
                if let Err(rollback_err) = rollback_and_release(conn).await {
                    warn!(error = %rollback_err, "Rollback after failed commit also failed");
                }
                Err(err)
            }
        }
    }

    /// Roll back and release the connection
    pub async fn rollback(self) -> Result<()> {
        rollback_and_release(self.conn).await
    }

    async fn rollback_quietly(self) {
        if let Err(err) = self.rollback().await {
            warn!(error = %err, "Rollback failed");
        }
    }
}

/// A connection whose rollback failed is never returned to the pool
async fn rollback_and_release<C: TransactionalConnection>(mut conn: C) -> Result<()> {
    match conn.rollback().await {
        Ok(()) => release(conn).await,
        Err(err) => {
            conn.discard().await;
            Err(err)
        }
    }
}

async fn release<C: TransactionalConnection>(mut conn: C) -> Result<()> {
    match conn.set_auto_commit(true).await {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!(error = %err, "Could not restore auto-commit; discarding connection");
            conn.discard().await;
            Err(err)
        }
    }
}
