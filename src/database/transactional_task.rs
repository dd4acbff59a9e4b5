//! Tasks whose body runs inside one database transaction.

use super::connection::{ConnectionPool, TransactionalConnection};
use super::transaction::TransactionScope;
use crate::error::{Result, TaskError};
use crate::execution::hooks::panic_message;
use crate::execution::{Task, TaskContext};
use crate::orchestration::AcceptsInput;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// A unit of work that runs on a single connection inside one transaction
///
/// The transaction commits only if `run_in_transaction` returns `Ok` and no
/// cancellation was requested. A panic in the body rolls back and fails the task. Wrap the task in [`Transactional`] to submit it.
#[async_trait]
pub trait TransactionalTask: Send + Sync + 'static {
    type Connection: TransactionalConnection;
    type Output: Send + 'static;

    fn title(&self) -> String;

    fn is_cancellable(&self) -> bool {
        true
    }

    async fn run_in_transaction(
        &self,
        ctx: &TaskContext,
        conn: &mut Self::Connection,
    ) -> Result<Self::Output>;

    fn on_succeeded(&self, _ctx: &TaskContext, _value: &Self::Output) {}

    fn on_failed(&self, _ctx: &TaskContext, _error: &TaskError) {}

    fn on_cancelled(&self, _ctx: &TaskContext) {}
}

/// Adapter turning a [`TransactionalTask`] into a [`Task`]
pub struct Transactional<T, P> {
    task: T,
    pool: Arc<P>,
}

impl<T, P> Transactional<T, P>
where
    T: TransactionalTask,
    P: ConnectionPool<Connection = T::Connection>,
{
    pub fn new(task: T, pool: Arc<P>) -> Self {
        Self { task, pool }
    }

    pub fn inner(&self) -> &T {
        &self.task
    }

    pub fn inner_mut(&mut self) -> &mut T {
        &mut self.task
    }
}

#[async_trait]
impl<T, P> Task for Transactional<T, P>
where
    T: TransactionalTask,
    P: ConnectionPool<Connection = T::Connection>,
{
    type Output = T::Output;

    fn title(&self) -> String {
        self.task.title()
    }

    fn is_cancellable(&self) -> bool {
        self.task.is_cancellable()
    }

    async fn run(&self, ctx: &TaskContext) -> Result<T::Output> {
        ctx.check_cancelled()?;
        let mut scope = TransactionScope::begin(self.pool.as_ref()).await?;
        // A panicking body still rolls back and restores the connection
        let body = AssertUnwindSafe(self.task.run_in_transaction(ctx, scope.connection()))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
        scope.complete(ctx, body).await
    }

    fn on_succeeded(&self, ctx: &TaskContext, value: &T::Output) {
        self.task.on_succeeded(ctx, value);
    }

    fn on_failed(&self, ctx: &TaskContext, error: &TaskError) {
        self.task.on_failed(ctx, error);
    }

    fn on_cancelled(&self, ctx: &TaskContext) {
        self.task.on_cancelled(ctx);
    }
}

impl<I, T, P> AcceptsInput<I> for Transactional<T, P>
where
    T: AcceptsInput<I>,
{
    fn accept_input(&mut self, input: I) {
        self.task.accept_input(input);
    }
}

impl<T: TransactionalTask, P> fmt::Debug for Transactional<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transactional")
            .field("task", &self.task.title())
            .finish()
    }
}
