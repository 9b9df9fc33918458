//! Access service: connection acquisition, nested transactions and
//! select/execute routing.
//!
//! Every statement is routed through the caller's [`TxContext`]: to its open
//! transaction, to its raw connection, or, when the context is detached, to
//! the driver's one-shot path. Each round trip is bounded by the earlier of
//! the context deadline and the configured per-operation timeout.

use crate::config::DbConfig;
use crate::db::builder::{Query, append_lock_clause};
use crate::db::context::TxContext;
use crate::db::driver::{Driver, DriverConnection};
use crate::db::metrics::{MetricsSink, Outcome, TracingMetrics};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult, Row};
use futures_util::FutureExt;
use std::any::Any;
use std::borrow::Cow;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Transaction context for the connections of driver `D`.
pub type Context<D> = TxContext<<D as Driver>::Connection>;

pub struct AccessService<D: Driver> {
    driver: Arc<D>,
    max_connection_retries: u32,
    connect_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    metric_prefix: String,
    metrics: Arc<dyn MetricsSink>,
}

impl<D: Driver> AccessService<D> {
    /// Build a service over `driver`, reporting to [`TracingMetrics`].
    pub fn new(driver: D, config: &DbConfig) -> Self {
        Self::from_shared(Arc::new(driver), config)
    }

    pub fn from_shared(driver: Arc<D>, config: &DbConfig) -> Self {
        Self {
            driver,
            max_connection_retries: config.max_connection_retries.max(1),
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            metric_prefix: config.metric_prefix.clone(),
            metrics: Arc::new(TracingMetrics),
        }
    }

    /// Replace the metrics sink.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// An empty, detached context. Statements made through it run on the
    /// driver's one-shot path until `begin` attaches a transaction.
    pub fn context(&self) -> Context<D> {
        TxContext::new()
    }

    // =========================================================================
    // Connections
    // =========================================================================

    /// Obtain a context holding a verified connection.
    ///
    /// Up to `max_connection_retries` candidates are acquired and pinged in
    /// turn; a candidate that fails either step is discarded.
    pub async fn connection(&self) -> DbResult<Context<D>> {
        let result = self
            .acquire_verified(None)
            .await
            .map(TxContext::with_connection);
        if let Ok(ctx) = &result {
            debug!(context_id = %ctx.id(), "Connection acquired");
        }
        self.observe("connection", result)
    }

    async fn acquire_verified(&self, ctx_deadline: Option<Instant>) -> DbResult<D::Connection> {
        let max_attempts = self.max_connection_retries;
        for attempt in 1..=max_attempts {
            match self.try_connect(ctx_deadline).await {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    warn!(
                        attempt = attempt,
                        max_attempts = max_attempts,
                        error = %e,
                        "Connection attempt failed"
                    );
                }
            }
        }
        error!(attempts = max_attempts, "Giving up on database connection");
        Err(DbError::connection(
            "couldn't connect to database",
            "Check that the database server is running and reachable",
        ))
    }

    async fn try_connect(&self, ctx_deadline: Option<Instant>) -> DbResult<D::Connection> {
        let budget = deadline_for(ctx_deadline, self.connect_timeout);
        let mut conn = bounded(budget, "acquire", self.driver.acquire()).await?;
        match bounded(budget, "ping", conn.ping()).await {
            Ok(()) => Ok(conn),
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }

    /// Ping the context's connection, or the driver when it holds none.
    pub async fn test_connection(&self, ctx: &mut Context<D>) -> DbResult<()> {
        let budget = deadline_for(ctx.deadline(), self.connect_timeout);
        let result = match ctx.connection_mut() {
            Some(conn) => bounded(budget, "ping", conn.ping()).await,
            None => bounded(budget, "ping", self.driver.ping()).await,
        };
        self.observe("ping", result)
    }

    /// Release the context's raw connection.
    ///
    /// Fails while a transaction is attached; commit or roll back first.
    pub async fn close(&self, ctx: &mut Context<D>) -> DbResult<()> {
        if ctx.in_transaction() {
            return Err(DbError::transaction(
                "cannot close a context with an open transaction",
                ctx.id(),
            ));
        }
        match ctx.take_connection() {
            Some(conn) => {
                conn.release().await?;
                debug!(context_id = %ctx.id(), "Connection released");
                Ok(())
            }
            None => Ok(()),
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction, or join the one already open on `ctx`.
    ///
    /// A detached context first acquires a verified connection. A panic
    /// raised while beginning is caught here and reported as a failed begin.
    pub async fn begin(&self, ctx: &mut Context<D>) -> DbResult<()> {
        let outcome = AssertUnwindSafe(self.begin_inner(ctx)).catch_unwind().await;
        let result = match outcome {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(
                    context_id = %ctx.id(),
                    panic = %message,
                    "Panic while beginning transaction"
                );
                // The connection's state is unknown; never hand it back to the pool.
                if ctx.nesting_level() == 0 {
                    if let Some(conn) = ctx.take_connection() {
                        conn.discard();
                    }
                }
                Err(DbError::transaction(
                    format!("begin failed: {}", message),
                    ctx.id(),
                ))
            }
        };
        self.observe("begin", result)
    }

    async fn begin_inner(&self, ctx: &mut Context<D>) -> DbResult<()> {
        let acquired = ctx.is_detached();
        if acquired {
            let conn = self.acquire_verified(ctx.deadline()).await?;
            ctx.attach(conn);
        }

        if ctx.nesting_level == 0 {
            let budget = deadline_for(ctx.deadline(), self.write_timeout);
            let conn = ctx
                .connection_mut()
                .ok_or_else(|| DbError::internal("context lost its connection"))?;
            if let Err(e) = bounded(budget, "begin", conn.begin()).await {
                if acquired {
                    if let Some(conn) = ctx.take_connection() {
                        conn.discard();
                    }
                }
                return Err(e);
            }
            ctx.mark_transaction();
            ctx.nesting_level = 1;
            info!(context_id = %ctx.id(), "Transaction started");
            return Ok(());
        }

        if !ctx.in_transaction() {
            return Err(DbError::transaction(
                "nesting level set without an active transaction",
                ctx.id(),
            ));
        }
        ctx.nesting_level += 1;
        debug!(
            context_id = %ctx.id(),
            nesting_level = ctx.nesting_level,
            "Joined open transaction"
        );
        Ok(())
    }

    /// Commit one nesting level. Only the outermost commit reaches the
    /// database and releases the connection.
    pub async fn commit(&self, ctx: &mut Context<D>) -> DbResult<()> {
        let result = self.commit_inner(ctx).await;
        self.observe("commit", result)
    }

    async fn commit_inner(&self, ctx: &mut Context<D>) -> DbResult<()> {
        if ctx.nesting_level == 0 {
            return Err(DbError::transaction(
                "commit called without a matching begin",
                ctx.id(),
            ));
        }
        if !ctx.in_transaction() {
            return Err(DbError::transaction(
                "no active transaction to commit",
                ctx.id(),
            ));
        }

        if ctx.nesting_level > 1 {
            ctx.nesting_level -= 1;
            debug!(
                context_id = %ctx.id(),
                nesting_level = ctx.nesting_level,
                "Nested commit"
            );
            return Ok(());
        }

        let budget = deadline_for(ctx.deadline(), self.write_timeout);
        let conn = ctx
            .connection_mut()
            .ok_or_else(|| DbError::internal("context lost its connection"))?;
        bounded(budget, "commit", conn.commit()).await?;

        ctx.nesting_level = 0;
        info!(context_id = %ctx.id(), "Transaction committed");

        if let Some(conn) = ctx.take_connection() {
            if let Err(e) = conn.release().await {
                warn!(
                    context_id = %ctx.id(),
                    error = %e,
                    "Failed to release connection after commit"
                );
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll back the whole transaction, whatever the nesting level.
    ///
    /// A no-op at level 0. The context is detached afterwards even when the
    /// rollback itself fails; the connection is then discarded.
    pub async fn rollback(&self, ctx: &mut Context<D>) -> DbResult<()> {
        let result = self.rollback_inner(ctx).await;
        self.observe("rollback", result)
    }

    async fn rollback_inner(&self, ctx: &mut Context<D>) -> DbResult<()> {
        if ctx.nesting_level == 0 {
            return Ok(());
        }
        if !ctx.in_transaction() {
            return Err(DbError::transaction(
                "no active transaction to roll back",
                ctx.id(),
            ));
        }

        let budget = deadline_for(ctx.deadline(), self.write_timeout);
        let result = match ctx.connection_mut() {
            Some(conn) => bounded(budget, "rollback", conn.rollback()).await,
            None => Err(DbError::internal("context lost its connection")),
        };

        let level = ctx.nesting_level;
        ctx.nesting_level = 0;
        let conn = ctx.take_connection();

        match result {
            Ok(()) => {
                info!(
                    context_id = %ctx.id(),
                    nesting_level = level,
                    "Transaction rolled back"
                );
                match conn {
                    Some(conn) => conn.release().await,
                    None => Ok(()),
                }
            }
            Err(e) => {
                error!(context_id = %ctx.id(), error = %e, "Rollback failed");
                if let Some(conn) = conn {
                    conn.discard();
                }
                Err(e)
            }
        }
    }

    /// Run `f` inside a transaction on `ctx`.
    ///
    /// Commits when `f` succeeds. When `f` fails the transaction is rolled
    /// back and `f`'s error returned, combined with the rollback error if
    /// that fails too. When `f` panics the transaction is rolled back and
    /// the panic resumed.
    pub async fn with_transaction<T, F>(&self, ctx: &mut Context<D>, f: F) -> DbResult<T>
    where
        F: AsyncFnOnce(&mut Context<D>) -> DbResult<T>,
    {
        self.begin(ctx).await?;

        let outcome = AssertUnwindSafe(f(&mut *ctx)).catch_unwind().await;
        match outcome {
            Err(panic) => {
                warn!(context_id = %ctx.id(), "Panic inside transaction, rolling back");
                if let Err(e) = self.rollback(ctx).await {
                    error!(
                        context_id = %ctx.id(),
                        error = %e,
                        "Rollback after panic failed"
                    );
                }
                std::panic::resume_unwind(panic)
            }
            Ok(Err(err)) => match self.rollback(ctx).await {
                Ok(()) => Err(err),
                Err(rollback) => Err(DbError::rollback_failed(err, rollback)),
            },
            Ok(Ok(value)) => {
                self.commit(ctx).await?;
                Ok(value)
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Run a query and decode every row.
    ///
    /// `for_update` appends a `FOR UPDATE` clause unless already present.
    pub async fn select(
        &self,
        ctx: &mut Context<D>,
        query: &str,
        for_update: bool,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let sql = if for_update {
            Cow::Owned(append_lock_clause(query))
        } else {
            Cow::Borrowed(query)
        };

        let budget = deadline_for(ctx.deadline(), self.read_timeout);
        let result = match ctx.connection_mut() {
            Some(conn) => bounded(budget, "select", conn.fetch(&sql, params)).await,
            None => bounded(budget, "select", self.driver.fetch(&sql, params)).await,
        }
        .map(|raw| QueryResult::from_rows(raw.decode()));

        if let Ok(result) = &result {
            debug!(
                context_id = %ctx.id(),
                sql = %sql,
                row_count = result.row_count(),
                "Query executed"
            );
        }
        self.observe("select", result)
    }

    pub async fn select_with_query(
        &self,
        ctx: &mut Context<D>,
        query: &Query,
    ) -> DbResult<QueryResult> {
        // The builder has already rendered any lock clause.
        let (sql, params) = query.build()?;
        self.select(ctx, &sql, false, &params).await
    }

    /// At most one row: `None` when nothing matched, an error for more than one.
    pub async fn select_unique_value(
        &self,
        ctx: &mut Context<D>,
        query: &str,
        for_update: bool,
        params: &[QueryParam],
    ) -> DbResult<Option<Row>> {
        self.select(ctx, query, for_update, params)
            .await?
            .into_unique()
    }

    pub async fn select_unique_value_with_query(
        &self,
        ctx: &mut Context<D>,
        query: &Query,
    ) -> DbResult<Option<Row>> {
        self.select_with_query(ctx, query).await?.into_unique()
    }

    /// Exactly one row.
    pub async fn select_unique_value_non_empty(
        &self,
        ctx: &mut Context<D>,
        query: &str,
        for_update: bool,
        params: &[QueryParam],
    ) -> DbResult<Row> {
        self.select_unique_value(ctx, query, for_update, params)
            .await?
            .ok_or(DbError::RecordNotFound)
    }

    pub async fn select_unique_value_non_empty_with_query(
        &self,
        ctx: &mut Context<D>,
        query: &Query,
    ) -> DbResult<Row> {
        self.select_unique_value_with_query(ctx, query)
            .await?
            .ok_or(DbError::RecordNotFound)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Run a statement; the result carries only the affected row count.
    pub async fn execute(
        &self,
        ctx: &mut Context<D>,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        let budget = deadline_for(ctx.deadline(), self.write_timeout);
        let result = match ctx.connection_mut() {
            Some(conn) => bounded(budget, "execute", conn.execute(query, params)).await,
            None => bounded(budget, "execute", self.driver.execute(query, params)).await,
        }
        .map(QueryResult::write_result);

        if let Ok(result) = &result {
            debug!(
                context_id = %ctx.id(),
                sql = %query,
                rows_affected = result.affected_rows,
                "Statement executed"
            );
        }
        self.observe("execute", result)
    }

    pub async fn execute_with_query(
        &self,
        ctx: &mut Context<D>,
        query: &Query,
    ) -> DbResult<QueryResult> {
        let (sql, params) = query.build()?;
        self.execute(ctx, &sql, &params).await
    }

    /// Fails unless exactly one row was affected.
    pub async fn execute_ensuring_one_affected_row(
        &self,
        ctx: &mut Context<D>,
        query: &str,
        params: &[QueryParam],
    ) -> DbResult<QueryResult> {
        ensure_one_affected(self.execute(ctx, query, params).await?)
    }

    pub async fn execute_ensuring_one_affected_row_with_query(
        &self,
        ctx: &mut Context<D>,
        query: &Query,
    ) -> DbResult<QueryResult> {
        ensure_one_affected(self.execute_with_query(ctx, query).await?)
    }

    /// Report `result` to the metrics sink under `{prefix}.{operation}`.
    fn observe<T>(&self, operation: &str, result: DbResult<T>) -> DbResult<T> {
        let name = format!("{}.{}", self.metric_prefix, operation);
        match &result {
            Ok(_) => self.metrics.record(&name, Outcome::Success, None),
            Err(e) => self.metrics.record(&name, Outcome::Error, e.error_code()),
        }
        result
    }
}

impl<D: Driver> Clone for AccessService<D> {
    fn clone(&self) -> Self {
        Self {
            driver: Arc::clone(&self.driver),
            max_connection_retries: self.max_connection_retries,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            metric_prefix: self.metric_prefix.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<D: Driver> std::fmt::Debug for AccessService<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessService")
            .field("max_connection_retries", &self.max_connection_retries)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("metric_prefix", &self.metric_prefix)
            .finish_non_exhaustive()
    }
}

fn ensure_one_affected(result: QueryResult) -> DbResult<QueryResult> {
    if result.affected_rows != 1 {
        return Err(DbError::UnexpectedAffectedRows {
            expected: 1,
            actual: result.affected_rows,
        });
    }
    Ok(result)
}

/// Deadline for one round trip and the configured timeout it was derived from.
#[derive(Debug, Clone, Copy)]
struct Budget {
    deadline: Instant,
    timeout: Duration,
}

impl Budget {
    /// Whole seconds of the configured timeout, rounded up.
    fn secs(&self) -> u32 {
        u32::try_from(self.timeout.as_millis().div_ceil(1000)).unwrap_or(u32::MAX)
    }
}

/// Earlier of the context deadline and `now + timeout`.
fn deadline_for(ctx_deadline: Option<Instant>, timeout: Duration) -> Budget {
    let op_deadline = Instant::now() + timeout;
    Budget {
        deadline: ctx_deadline.map_or(op_deadline, |d| d.min(op_deadline)),
        timeout,
    }
}

/// Run `fut` until the budget's deadline. A timeout reports the configured
/// budget, also when the deadline had already passed on entry.
async fn bounded<T>(
    budget: Budget,
    operation: &str,
    fut: impl Future<Output = DbResult<T>>,
) -> DbResult<T> {
    let timed_out = || DbError::timeout(operation, budget.secs());
    if Instant::now() >= budget.deadline {
        return Err(timed_out());
    }
    match tokio::time::timeout_at(budget.deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(timed_out()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
