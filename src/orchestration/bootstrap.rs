//! # Task System Bootstrap
//!
//! Brings up everything a host application needs in one place: validated
//! configuration, the scheduler with its hook thread, and the connection pool.
//! Shutdown reverses the order: drain the scheduler, then close the pool.

use crate::config::TaskchainConfig;
use crate::database::{ConnectionPool, SqlxConnectionPool, Transactional, TransactionalTask};
use crate::error::SystemResult;
use crate::execution::{LifecycleSink, TaskScheduler};
use crate::logging::init_structured_logging;
use crate::messaging::{AsyncServerBridge, ServerTransport};
use sqlx::{Database, Executor};
use std::sync::Arc;
use tracing::{error, info};

/// Running task system handle
pub struct TaskSystem<P: ConnectionPool> {
    config: TaskchainConfig,
    scheduler: TaskScheduler,
    pool: Arc<P>,
}

impl<P: ConnectionPool> TaskSystem<P> {
    /// Start the scheduler on the current Tokio runtime around an existing pool
    pub fn start(config: TaskchainConfig, pool: P, sink: Arc<dyn LifecycleSink>) -> SystemResult<Self> {
        config.validate()?;
        let scheduler = TaskScheduler::new(&config.scheduler, &config.working_directory, sink)?;

        info!(
            max_concurrent_tasks = config.scheduler.max_concurrent_tasks,
            poll_interval_ms = config.bridge.poll_interval_ms,
            "Task system started"
        );

        Ok(Self {
            config,
            scheduler,
            pool: Arc::new(pool),
        })
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn pool(&self) -> Arc<P> {
        Arc::clone(&self.pool)
    }

    pub fn config(&self) -> &TaskchainConfig {
        &self.config
    }

    /// Bind a transactional task to this system's pool
    pub fn transactional<T>(&self, task: T) -> Transactional<T, P>
    where
        T: TransactionalTask<Connection = P::Connection>,
    {
        Transactional::new(task, self.pool())
    }

    /// Bridge over `transport` using the configured poll interval
    pub fn bridge<T: ServerTransport>(&self, transport: Arc<T>) -> AsyncServerBridge<T> {
        AsyncServerBridge::from_config(transport, &self.config.bridge)
    }

    /// Drain the scheduler, then close the pool
    ///
    /// The pool is closed even when draining timed out; the timeout is reported.
    pub async fn shutdown(self) -> SystemResult<()> {
        let drained = self
            .scheduler
            .shutdown(self.config.scheduler.shutdown_timeout())
            .await;
        if let Err(err) = &drained {
            error!(error = %err, "Scheduler did not drain before the pool was closed");
        }

        self.pool.close().await;
        info!("Task system stopped");
        drained
    }
}

impl<DB> TaskSystem<SqlxConnectionPool<DB>>
where
    DB: Database,
    for<'c> &'c mut DB::Connection: Executor<'c, Database = DB>,
{
    /// Initialize logging, connect the configured database and start the system
    pub async fn bootstrap(config: TaskchainConfig, sink: Arc<dyn LifecycleSink>) -> SystemResult<Self> {
        config.validate()?;
        init_structured_logging(&config.logging);
        let pool = SqlxConnectionPool::<DB>::connect(&config.database).await?;
        Self::start(config, pool, sink)
    }
}

impl<P: ConnectionPool> std::fmt::Debug for TaskSystem<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSystem")
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
