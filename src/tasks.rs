//! The four task operations.
//!
//! Every call takes its input record, an options record and a cancellation
//! token, borrows one pooled connection for its whole duration and returns
//! either a JSON result or an affected-row count.

use std::future::Future;
use std::time::Instant;

use deadpool::managed::Object;
use lazy_static::lazy_static;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::conversion::BulkCopyFlags;
use crate::error::SqlTaskError;
use crate::model::{
    BulkInsertInput, BulkInsertOptions, InputBatchOperation, InputProcedure, InputQuery, Options,
};
use crate::mssql::{
    ConnectionPools, MssqlManager, ParameterSet, TxScope, bulk_copy, execute_batch,
    execute_command, parse_batch_records,
};
use crate::results::DataTable;
use crate::types::CommandType;

type PooledClient = Object<MssqlManager>;

/// Entry point for the task operations; owns the connection pools.
#[derive(Debug)]
pub struct SqlTasks {
    pools: ConnectionPools,
}

impl Default for SqlTasks {
    fn default() -> Self {
        Self::new(TaskConfig::default())
    }
}

impl SqlTasks {
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            pools: ConnectionPools::new(config),
        }
    }

    /// # Errors
    ///
    /// Returns `SqlTaskError::ConfigError` if an environment override is malformed.
    pub fn from_env() -> Result<Self, SqlTaskError> {
        Ok(Self::new(TaskConfig::from_env()?))
    }

    #[must_use]
    pub fn config(&self) -> &TaskConfig {
        self.pools.config()
    }

    #[must_use]
    pub fn pools(&self) -> &ConnectionPools {
        &self.pools
    }

    /// Run an ad-hoc statement and return its first result set as a JSON array.
    ///
    /// Parameters bind by name: `@LastName` in the text takes the value of
    /// the parameter named `LastName`. A statement without a result set
    /// returns `[]`.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError` on invalid parameters, connection or execution
    /// failure, timeout, or cancellation before execution started.
    pub async fn execute_query(
        &self,
        input: &InputQuery,
        options: &Options,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, SqlTaskError> {
        self.run_command(
            "execute_query",
            CommandType::Text,
            &input.query,
            &input.parameters,
            &input.connection_string,
            options,
            cancel,
        )
        .await
    }

    /// Invoke a stored procedure and return its first result set as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError` on an invalid procedure or parameter name,
    /// connection or execution failure, timeout, or cancellation.
    pub async fn execute_procedure(
        &self,
        input: &InputProcedure,
        options: &Options,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, SqlTaskError> {
        self.run_command(
            "execute_procedure",
            CommandType::StoredProcedure,
            &input.execute,
            &input.parameters,
            &input.connection_string,
            options,
            cancel,
        )
        .await
    }

    /// Run `input.query` once per object of `input.input_json` and return
    /// the total affected-row count.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::DeserializationError` for malformed input
    /// (before connecting), or any failure of a record, which aborts the batch.
    pub async fn batch_operation(
        &self,
        input: &InputBatchOperation,
        options: &Options,
        cancel: &CancellationToken,
    ) -> Result<u64, SqlTaskError> {
        let started = Instant::now();
        let records = parse_batch_records(&input.input_json)?;
        debug!(
            records = records.len(),
            isolation = ?options.isolation_level,
            "batch_operation starting"
        );

        let mut conn = self.acquire(&input.connection_string, cancel).await?;
        let outcome = bounded(
            options.command_timeout_seconds,
            execute_batch(&mut conn, &input.query, &records, options.isolation_level),
        )
        .await;
        release(conn, &outcome);

        let affected = outcome?;
        info!(
            records = records.len(),
            affected,
            elapsed = ?started.elapsed(),
            "batch_operation finished"
        );
        Ok(affected)
    }

    /// Copy the rows of `input.input_data` into `input.table_name` and
    /// return the number of rows copied.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::DeserializationError` for malformed input,
    /// `SqlTaskError::BulkCopyError` / `ConversionError` when the rows do not
    /// fit the destination, or any connection/execution failure.
    pub async fn bulk_insert(
        &self,
        input: &BulkInsertInput,
        options: &BulkInsertOptions,
        cancel: &CancellationToken,
    ) -> Result<u64, SqlTaskError> {
        let started = Instant::now();
        let mut data = DataTable::from_json_array(&input.input_data)?;
        if options.convert_empty_property_values_to_null {
            let nulled = data.set_empty_cells_to_null();
            debug!(nulled, "empty strings converted to null");
        }
        let flags = BulkCopyFlags::combine(options.fire_triggers, options.keep_identity);
        let chunk_rows = self.config().bulk_chunk_rows;
        debug!(
            rows = data.row_count(),
            ?flags,
            isolation = ?options.isolation_level,
            "bulk_insert starting"
        );

        let mut conn = self.acquire(&input.connection_string, cancel).await?;
        let outcome = bounded(options.command_timeout_seconds, async {
            let mut scope = TxScope::open(&mut conn, options.isolation_level).await?;
            let in_transaction = scope.is_transactional();
            let result = bulk_copy(
                scope.client(),
                &input.table_name,
                &data,
                flags,
                chunk_rows,
                in_transaction,
            )
            .await;
            scope.finish(result).await
        })
        .await;
        release(conn, &outcome);

        let copied = outcome?;
        info!(
            copied,
            elapsed = ?started.elapsed(),
            "bulk_insert finished"
        );
        Ok(copied)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_command(
        &self,
        operation: &'static str,
        command_type: CommandType,
        text: &str,
        parameters: &[crate::types::Parameter],
        connection_string: &str,
        options: &Options,
        cancel: &CancellationToken,
    ) -> Result<JsonValue, SqlTaskError> {
        let started = Instant::now();
        let params = ParameterSet::from_parameters(parameters)?;
        debug!(
            operation,
            parameters = params.len(),
            isolation = ?options.isolation_level,
            "starting"
        );

        let mut conn = self.acquire(connection_string, cancel).await?;
        let outcome = bounded(
            options.command_timeout_seconds,
            execute_command(&mut conn, command_type, text, &params, options.isolation_level),
        )
        .await;
        release(conn, &outcome);

        let table = outcome?;
        info!(
            operation,
            rows = table.row_count(),
            elapsed = ?started.elapsed(),
            "finished"
        );
        Ok(table.to_json())
    }

    /// Take a connection, giving up as soon as `cancel` fires.
    async fn acquire(
        &self,
        connection_string: &str,
        cancel: &CancellationToken,
    ) -> Result<PooledClient, SqlTaskError> {
        if cancel.is_cancelled() {
            return Err(SqlTaskError::Cancelled);
        }
        let pool = self.pools.pool_for(connection_string)?;
        let conn = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SqlTaskError::Cancelled),
            conn = pool.get() => conn?,
        };
        // cancelled while the last handshake finished: hand the connection back unused
        if cancel.is_cancelled() {
            return Err(SqlTaskError::Cancelled);
        }
        Ok(conn)
    }
}

/// Bound `work` by the command timeout; 0 waits indefinitely.
async fn bounded<T>(
    seconds: u64,
    work: impl Future<Output = Result<T, SqlTaskError>>,
) -> Result<T, SqlTaskError> {
    if seconds == 0 {
        return work.await;
    }
    tokio::time::timeout(std::time::Duration::from_secs(seconds), work)
        .await
        .map_err(|_| SqlTaskError::Timeout(seconds))?
}

/// Return the connection to its pool, or drop it when a timeout left the
/// session in an unknown state.
fn release<T>(conn: PooledClient, outcome: &Result<T, SqlTaskError>) {
    if let Err(SqlTaskError::Timeout(seconds)) = outcome {
        warn!(seconds, "command timed out, discarding connection");
        drop(Object::take(conn));
    }
}

lazy_static! {
    static ref DEFAULT_TASKS: SqlTasks = {
        let config = TaskConfig::from_env().unwrap_or_else(|e| {
            warn!(error = %e, "ignoring malformed SQL_TASKS_* environment");
            TaskConfig::default()
        });
        SqlTasks::new(config)
    };
}

/// Process-wide task runner used by the free functions.
#[must_use]
pub fn default_tasks() -> &'static SqlTasks {
    &DEFAULT_TASKS
}

/// [`SqlTasks::execute_query`] on the process-wide pools.
///
/// # Errors
///
/// See [`SqlTasks::execute_query`].
pub async fn execute_query(
    input: &InputQuery,
    options: &Options,
    cancel: &CancellationToken,
) -> Result<JsonValue, SqlTaskError> {
    default_tasks().execute_query(input, options, cancel).await
}

/// [`SqlTasks::execute_procedure`] on the process-wide pools.
///
/// # Errors
///
/// See [`SqlTasks::execute_procedure`].
pub async fn execute_procedure(
    input: &InputProcedure,
    options: &Options,
    cancel: &CancellationToken,
) -> Result<JsonValue, SqlTaskError> {
    default_tasks().execute_procedure(input, options, cancel).await
}

/// [`SqlTasks::batch_operation`] on the process-wide pools.
///
/// # Errors
///
/// See [`SqlTasks::batch_operation`].
pub async fn batch_operation(
    input: &InputBatchOperation,
    options: &Options,
    cancel: &CancellationToken,
) -> Result<u64, SqlTaskError> {
    default_tasks().batch_operation(input, options, cancel).await
}

/// [`SqlTasks::bulk_insert`] on the process-wide pools.
///
/// # Errors
///
/// See [`SqlTasks::bulk_insert`].
pub async fn bulk_insert(
    input: &BulkInsertInput,
    options: &BulkInsertOptions,
    cancel: &CancellationToken,
) -> Result<u64, SqlTaskError> {
    default_tasks().bulk_insert(input, options, cancel).await
}
