use serde_json::{Map, Value as JsonValue};

use super::config::MssqlClient;
use super::params::{ParameterSet, bind_query_params};
use super::query::build_data_table;
use super::transaction::TxScope;
use crate::conversion::command_statement;
use crate::error::SqlTaskError;
use crate::results::DataTable;
use crate::translation::translate_named_placeholders;
use crate::types::{CommandType, IsolationLevel};

/// One bind-parameter set per element of a JSON array of objects.
///
/// # Errors
///
/// Returns `SqlTaskError::DeserializationError` if the text is not a JSON array
/// of objects, or `SqlTaskError::ParameterError` if a field name is not a
/// valid parameter name.
pub fn parse_batch_records(input_json: &str) -> Result<Vec<ParameterSet>, SqlTaskError> {
    let records: Vec<Map<String, JsonValue>> = serde_json::from_str(input_json)?;
    records.iter().map(ParameterSet::from_record).collect()
}

/// Execute a text command or stored procedure and load its first result set.
///
/// # Errors
///
/// Returns `SqlTaskError` if the statement cannot be built, the transaction
/// cannot be opened, or the server rejects the command. An open transaction
/// is rolled back before the error is returned.
pub async fn execute_command(
    client: &mut MssqlClient,
    command_type: CommandType,
    text: &str,
    params: &ParameterSet,
    level: IsolationLevel,
) -> Result<DataTable, SqlTaskError> {
    let statement = command_statement(command_type, text, params)?;

    let mut scope = TxScope::open(client, level).await?;
    let query = bind_query_params(statement.as_str(), params.values());
    let result = build_data_table(scope.client(), query).await;
    scope.finish(result).await
}

/// Execute `query` once per record and return the summed affected-row count.
///
/// The first failing record aborts the batch. Inside a transaction nothing
/// is kept; in autocommit mode earlier records stay applied.
///
/// # Errors
///
/// Returns `SqlTaskError` if the transaction cannot be opened or any record fails.
pub async fn execute_batch(
    client: &mut MssqlClient,
    query: &str,
    records: &[ParameterSet],
    level: IsolationLevel,
) -> Result<u64, SqlTaskError> {
    let mut scope = TxScope::open(client, level).await?;
    let result = execute_records(scope.client(), query, records).await;
    scope.finish(result).await
}

async fn execute_records(
    client: &mut MssqlClient,
    query: &str,
    records: &[ParameterSet],
) -> Result<u64, SqlTaskError> {
    let mut total = 0u64;
    for (index, record) in records.iter().enumerate() {
        let statement = translate_named_placeholders(query, record.names());
        let exec_result = bind_query_params(statement, record.values())
            .execute(client)
            .await
            .map_err(|e| {
                SqlTaskError::ExecutionError(format!("SQL Server batch record {index} failed: {e}"))
            })?;
        total += exec_result.rows_affected().iter().sum::<u64>();
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamValue;

    #[test]
    fn batch_records_parse_in_order() {
        let records = parse_batch_records(
            r#"[{"Id":15,"LastName":"Last","FirstName":"First"},{"Id":16,"LastName":"Other","FirstName":null}]"#,
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].names(), ["Id", "LastName", "FirstName"]);
        assert_eq!(records[1].values()[2], ParamValue::Null);
    }

    #[test]
    fn malformed_batch_json_fails_before_execution() {
        for bad in ["not json", r#"{"Id":1}"#, "[1,2]"] {
            assert!(matches!(
                parse_batch_records(bad),
                Err(SqlTaskError::DeserializationError(_))
            ));
        }
        assert!(parse_batch_records("[]").unwrap().is_empty());
    }
}
