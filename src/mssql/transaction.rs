use std::borrow::Cow;

use crate::conversion::{SESSION_DEFAULT_ISOLATION, TransactionPlan};
use crate::error::SqlTaskError;
use crate::types::IsolationLevel;

use super::config::MssqlClient;

/// Transaction scope for one task call.
///
/// Opening the scope runs `BEGIN TRANSACTION` (after setting the isolation
/// level when one is named); [`finish`](TxScope::finish) consumes it and
/// either commits or rolls back, so each transaction ends exactly once. With
/// [`IsolationLevel::None`] the scope is a pass-through and nothing is sent.
///
/// Dropping a scope without finishing leaves the session mid-transaction; the
/// pool's recycle hook rolls it back before the connection is reused.
pub struct TxScope<'a> {
    client: &'a mut MssqlClient,
    plan: TransactionPlan,
}

impl<'a> TxScope<'a> {
    /// Begin a transaction on `client` as `level` requires.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ExecutionError` if the BEGIN statement fails.
    pub async fn open(
        client: &'a mut MssqlClient,
        level: IsolationLevel,
    ) -> Result<TxScope<'a>, SqlTaskError> {
        let plan = TransactionPlan::from(level);
        if let Some(begin) = plan.begin_statement() {
            run_simple(client, &begin).await.map_err(|e| {
                SqlTaskError::ExecutionError(format!("MSSQL begin transaction error: {e}"))
            })?;
            tracing::debug!(?level, "transaction started");
        }
        Ok(TxScope { client, plan })
    }

    /// The connection commands of this scope run on.
    pub fn client(&mut self) -> &mut MssqlClient {
        self.client
    }

    /// Whether a transaction is actually open.
    #[must_use]
    pub fn is_transactional(&self) -> bool {
        self.plan != TransactionPlan::Autocommit
    }

    /// Commit when `result` is `Ok`, roll back otherwise, and hand `result` back.
    ///
    /// A failed commit replaces the success value with the commit error; a
    /// failed rollback is logged and the original error is kept.
    ///
    /// # Errors
    ///
    /// Returns the error carried by `result`, or the commit failure.
    pub async fn finish<T>(self, result: Result<T, SqlTaskError>) -> Result<T, SqlTaskError> {
        if !self.is_transactional() {
            return result;
        }

        let restore = self.plan.changes_session_level();
        match result {
            Ok(value) => {
                let commit = if restore {
                    Cow::Owned(format!("COMMIT TRANSACTION; {SESSION_DEFAULT_ISOLATION}"))
                } else {
                    Cow::Borrowed("COMMIT TRANSACTION")
                };
                run_simple(self.client, &commit)
                    .await
                    .map_err(|e| SqlTaskError::ExecutionError(format!("MSSQL commit error: {e}")))?;
                tracing::debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                let rollback = if restore {
                    Cow::Owned(format!(
                        "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; {SESSION_DEFAULT_ISOLATION}"
                    ))
                } else {
                    Cow::Borrowed("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION")
                };
                if let Err(rollback_err) = run_simple(self.client, &rollback).await {
                    tracing::warn!(error = %rollback_err, "MSSQL rollback failed");
                } else {
                    tracing::debug!("transaction rolled back");
                }
                Err(err)
            }
        }
    }
}

/// Run a plain batch outside `sp_executesql`; transaction control statements
/// must not be wrapped in an RPC.
pub(crate) async fn run_simple(
    client: &mut MssqlClient,
    sql: &str,
) -> Result<(), tiberius::error::Error> {
    client.simple_query(sql).await?.into_results().await?;
    Ok(())
}
