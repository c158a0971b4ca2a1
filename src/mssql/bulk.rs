use tiberius::{ColumnData, TokenRow};

use super::coerce::{SqlType, coerce_cell};
use super::config::MssqlClient;
use super::params::{bind_query_params, bind_typed_params};
use crate::config::MAX_STATEMENT_PARAMS;
use crate::conversion::BulkCopyFlags;
use crate::error::SqlTaskError;
use crate::identifiers;
use crate::results::{CellValue, DataTable};
use crate::types::ParamValue;

/// Destination column as reported by `sys.columns`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub sql_type: SqlType,
    pub is_identity: bool,
    pub is_computed: bool,
}

impl ColumnInfo {
    /// Columns a bulk load writes: identity, computed and rowversion columns are server-owned.
    #[must_use]
    pub fn is_updatable(&self) -> bool {
        !self.is_identity && !self.is_computed && self.sql_type != SqlType::RowVersion
    }
}

/// One destination column written by a load, with the input column feeding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnBinding {
    pub destination: usize,
    pub input: Option<usize>,
}

/// Read the destination table's columns in table order.
///
/// # Errors
///
/// Returns `SqlTaskError::BulkCopyError` if the table does not exist.
pub async fn load_table_columns(
    client: &mut MssqlClient,
    table_name: &str,
) -> Result<Vec<ColumnInfo>, SqlTaskError> {
    // Temp tables live in tempdb's catalog.
    let (catalog, lookup) = if table_name.starts_with('#') {
        ("tempdb.", format!("tempdb..{table_name}"))
    } else {
        ("", table_name.to_string())
    };
    // Same column list as `SELECT *`; generated-always columns are server-owned.
    let sql = format!(
        "SELECT c.name, t.name, c.is_identity, \
                CAST(CASE WHEN c.is_computed = 1 OR c.generated_always_type <> 0 THEN 1 ELSE 0 END AS bit), \
                c.precision, c.scale \
         FROM {catalog}sys.columns c \
         LEFT JOIN {catalog}sys.types t ON c.system_type_id = t.user_type_id \
         WHERE c.object_id = OBJECT_ID(@P1) AND c.is_hidden = 0 \
         ORDER BY c.column_id"
    );

    let rows = bind_query_params(sql, &[ParamValue::Text(lookup)])
        .query(client)
        .await?
        .into_first_result()
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let name: &str = row.try_get(0)?.unwrap_or_default();
        let type_name: &str = row.try_get(1)?.unwrap_or_default();
        let is_identity: bool = row.try_get(2)?.unwrap_or_default();
        let is_computed: bool = row.try_get(3)?.unwrap_or_default();
        let precision: u8 = row.try_get(4)?.unwrap_or_default();
        let scale: u8 = row.try_get(5)?.unwrap_or_default();
        columns.push(ColumnInfo {
            name: name.to_string(),
            sql_type: SqlType::from_metadata(type_name, precision, scale),
            is_identity,
            is_computed,
        });
    }

    if columns.is_empty() {
        return Err(SqlTaskError::BulkCopyError(format!(
            "destination table {table_name} does not exist"
        )));
    }
    Ok(columns)
}

/// Enabled triggers on the destination, as `[schema].[name]`.
///
/// # Errors
///
/// Returns the server error if the catalog cannot be read.
pub async fn load_enabled_triggers(
    client: &mut MssqlClient,
    table_name: &str,
) -> Result<Vec<String>, SqlTaskError> {
    // Temp tables cannot carry triggers.
    if table_name.starts_with('#') {
        return Ok(Vec::new());
    }
    let sql = "SELECT OBJECT_SCHEMA_NAME(tr.object_id), tr.name \
               FROM sys.triggers tr \
               WHERE tr.parent_id = OBJECT_ID(@P1) AND tr.is_disabled = 0 \
               ORDER BY tr.name";
    let rows = bind_query_params(sql, &[ParamValue::Text(table_name.to_string())])
        .query(client)
        .await?
        .into_first_result()
        .await?;

    let mut triggers = Vec::with_capacity(rows.len());
    for row in rows {
        let schema: &str = row.try_get(0)?.unwrap_or_default();
        let name: &str = row.try_get(1)?.unwrap_or_default();
        triggers.push(format!("{}.{}", identifiers::quote(schema), identifiers::quote(name)));
    }
    Ok(triggers)
}

/// Match every input column to a destination column (exact name first, then
/// case-insensitive).
///
/// # Errors
///
/// Returns `SqlTaskError::BulkCopyError` for an input column the destination
/// does not have or cannot accept.
pub fn match_input_columns(
    destination: &[ColumnInfo],
    input_columns: &[String],
) -> Result<Vec<Option<usize>>, SqlTaskError> {
    let mut inputs = vec![None; destination.len()];
    for (input_index, name) in input_columns.iter().enumerate() {
        let dest_index = destination
            .iter()
            .position(|c| c.name == *name)
            .or_else(|| destination.iter().position(|c| c.name.eq_ignore_ascii_case(name)))
            .ok_or_else(|| {
                SqlTaskError::BulkCopyError(format!(
                    "input column {name:?} does not match any destination column"
                ))
            })?;
        let column = &destination[dest_index];
        if column.is_computed || column.sql_type == SqlType::RowVersion {
            return Err(SqlTaskError::BulkCopyError(format!(
                "destination column {:?} is not writable",
                column.name
            )));
        }
        if inputs[dest_index].is_some() {
            return Err(SqlTaskError::BulkCopyError(format!(
                "destination column {:?} is mapped more than once",
                column.name
            )));
        }
        inputs[dest_index] = Some(input_index);
    }
    Ok(inputs)
}

/// Columns sent on the TDS path: every updatable destination column, in table order.
#[must_use]
pub fn tds_bindings(destination: &[ColumnInfo], inputs: &[Option<usize>]) -> Vec<ColumnBinding> {
    destination
        .iter()
        .zip(inputs)
        .enumerate()
        .filter(|(_, (column, _))| column.is_updatable())
        .map(|(destination, (_, input))| ColumnBinding {
            destination,
            input: *input,
        })
        .collect()
}

/// Columns sent on the statement path: only the input columns, identity
/// columns only when they are kept.
#[must_use]
pub fn statement_bindings(
    destination: &[ColumnInfo],
    inputs: &[Option<usize>],
    keep_identity: bool,
) -> Vec<ColumnBinding> {
    destination
        .iter()
        .zip(inputs)
        .enumerate()
        .filter_map(|(destination, (column, input))| {
            let input = (*input)?;
            (keep_identity || !column.is_identity).then_some(ColumnBinding {
                destination,
                input: Some(input),
            })
        })
        .collect()
}

/// Rows per `INSERT` so that neither the row nor the parameter limit is exceeded.
#[must_use]
pub fn statement_rows_per_chunk(column_count: usize, configured_rows: usize) -> usize {
    let by_params = MAX_STATEMENT_PARAMS / column_count.max(1);
    configured_rows.min(by_params).max(1)
}

/// `INSERT INTO t ([a], [b]) VALUES (@P1, @P2), (@P3, @P4)` for `rows` rows.
#[must_use]
pub fn insert_statement(table_name: &str, column_names: &[&str], rows: usize) -> String {
    if column_names.is_empty() {
        return format!("INSERT INTO {table_name} DEFAULT VALUES");
    }
    let columns = column_names
        .iter()
        .map(|name| identifiers::quote(name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut next = 0usize;
    let values = (0..rows)
        .map(|_| {
            let placeholders = column_names
                .iter()
                .map(|_| {
                    next += 1;
                    format!("@P{next}")
                })
                .collect::<Vec<_>>()
                .join(", ");
            format!("({placeholders})")
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("INSERT INTO {table_name} ({columns}) VALUES {values}")
}

/// Session and table state one statement-path chunk switches around its `INSERT`.
///
/// Everything is switched inside the chunk's own batch, so nothing outlives
/// the statement even when the caller stops waiting for it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkGuards {
    /// Wrap the insert in `SET IDENTITY_INSERT ... ON/OFF`.
    pub identity_insert: bool,
    /// Triggers disabled for the duration of the insert.
    pub suppressed_triggers: Vec<String>,
    /// Open and close a transaction inside the batch. Needed when triggers
    /// are disabled and the caller runs without a transaction, so a failed
    /// insert rolls the disable back with it.
    pub own_transaction: bool,
}

impl ChunkGuards {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.identity_insert && self.suppressed_triggers.is_empty() && !self.own_transaction
    }
}

/// Wrap one chunk's `INSERT` in the batch that applies `guards`.
#[must_use]
pub fn chunk_batch(table_name: &str, insert: &str, guards: &ChunkGuards) -> String {
    if guards.is_empty() {
        return insert.to_string();
    }
    let triggers = guards.suppressed_triggers.join(", ");

    let mut body = String::new();
    if guards.own_transaction {
        body.push_str("BEGIN TRANSACTION; ");
    }
    if !triggers.is_empty() {
        body.push_str(&format!("DISABLE TRIGGER {triggers} ON {table_name}; "));
    }
    body.push_str(insert);
    body.push_str("; ");
    if !triggers.is_empty() {
        body.push_str(&format!("ENABLE TRIGGER {triggers} ON {table_name}; "));
    }
    if guards.own_transaction {
        body.push_str("COMMIT TRANSACTION; ");
    }

    let mut catch = String::new();
    if guards.own_transaction {
        catch.push_str("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; ");
    }
    if guards.identity_insert {
        catch.push_str(&format!("SET IDENTITY_INSERT {table_name} OFF; "));
    }

    let (on, off) = if guards.identity_insert {
        (
            format!("SET IDENTITY_INSERT {table_name} ON; "),
            format!(" SET IDENTITY_INSERT {table_name} OFF;"),
        )
    } else {
        (String::new(), String::new())
    };
    format!("{on}BEGIN TRY {body}END TRY BEGIN CATCH {catch}THROW; END CATCH;{off}")
}

fn coerce_row(
    row: &[CellValue],
    destination: &[ColumnInfo],
    bindings: &[ColumnBinding],
) -> Result<Vec<ColumnData<'static>>, SqlTaskError> {
    bindings
        .iter()
        .map(|binding| {
            let column = &destination[binding.destination];
            let cell = binding.input.map_or(&CellValue::Null, |i| &row[i]);
            coerce_cell(cell, column.sql_type).map_err(|e| match e {
                SqlTaskError::ConversionError(msg) => {
                    SqlTaskError::ConversionError(format!("column {:?}: {msg}", column.name))
                }
                other => other,
            })
        })
        .collect()
}

/// Copy every row of `data` into `table_name` and return the copied-row count.
///
/// With no flags the rows go through a TDS bulk load, which skips triggers
/// and lets the server assign identities and defaults. With any flag set,
/// or when a destination column type cannot be bulk-encoded, the rows go
/// through chunked multi-row `INSERT` statements instead. On that path
/// `KEEP_IDENTITY` is honoured via `IDENTITY_INSERT`, and enabled triggers
/// are disabled around each statement unless `FIRE_TRIGGERS` is set.
/// `in_transaction` tells whether the caller already holds a transaction
/// on `client`.
///
/// # Errors
///
/// Returns `SqlTaskError::BulkCopyError` for table/column mismatches,
/// `SqlTaskError::ConversionError` for values the destination cannot take,
/// or the server error of the load itself.
pub async fn bulk_copy(
    client: &mut MssqlClient,
    table_name: &str,
    data: &DataTable,
    flags: BulkCopyFlags,
    chunk_rows: usize,
    in_transaction: bool,
) -> Result<u64, SqlTaskError> {
    let table_name = identifiers::object_name(table_name)?;
    let destination = load_table_columns(client, table_name).await?;
    let inputs = match_input_columns(&destination, data.columns())?;

    if data.is_empty() {
        return Ok(0);
    }

    let tds = tds_bindings(&destination, &inputs);
    let tds_capable = tds
        .iter()
        .all(|b| destination[b.destination].sql_type.supports_tds_bulk());

    if flags.is_empty() && tds_capable {
        tracing::debug!(table = table_name, rows = data.row_count(), "TDS bulk load");
        return tds_bulk_load(client, table_name, data, &destination, &tds).await;
    }

    let keep_identity = flags.contains(BulkCopyFlags::KEEP_IDENTITY);
    let bindings = statement_bindings(&destination, &inputs, keep_identity);
    let suppressed_triggers = if flags.contains(BulkCopyFlags::FIRE_TRIGGERS) {
        Vec::new()
    } else {
        load_enabled_triggers(client, table_name).await?
    };
    let guards = ChunkGuards {
        identity_insert: keep_identity
            && bindings
                .iter()
                .any(|b| destination[b.destination].is_identity),
        own_transaction: !in_transaction && !suppressed_triggers.is_empty(),
        suppressed_triggers,
    };
    tracing::debug!(
        table = table_name,
        rows = data.row_count(),
        ?flags,
        suppressed_triggers = guards.suppressed_triggers.len(),
        "statement bulk load"
    );
    insert_chunks(client, table_name, data, &destination, &bindings, &guards, chunk_rows).await
}

async fn tds_bulk_load(
    client: &mut MssqlClient,
    table_name: &str,
    data: &DataTable,
    destination: &[ColumnInfo],
    bindings: &[ColumnBinding],
) -> Result<u64, SqlTaskError> {
    // Convert everything up front: a bulk load abandoned mid-stream leaves the session unusable.
    let mut token_rows = Vec::with_capacity(data.row_count());
    for row in data.raw_rows() {
        let mut token_row = TokenRow::new();
        for value in coerce_row(row, destination, bindings)? {
            token_row.push(value);
        }
        token_rows.push(token_row);
    }

    let mut bulk_load = client
        .bulk_insert(table_name)
        .await
        .map_err(|e| SqlTaskError::BulkCopyError(format!("bulk insert init: {e}")))?;
    for token_row in token_rows {
        bulk_load
            .send(token_row)
            .await
            .map_err(|e| SqlTaskError::BulkCopyError(format!("bulk insert send: {e}")))?;
    }
    let result = bulk_load
        .finalize()
        .await
        .map_err(|e| SqlTaskError::BulkCopyError(format!("bulk insert finalize: {e}")))?;
    Ok(result.total())
}

async fn insert_chunks(
    client: &mut MssqlClient,
    table_name: &str,
    data: &DataTable,
    destination: &[ColumnInfo],
    bindings: &[ColumnBinding],
    guards: &ChunkGuards,
    chunk_rows: usize,
) -> Result<u64, SqlTaskError> {
    let column_names: Vec<&str> = bindings
        .iter()
        .map(|b| destination[b.destination].name.as_str())
        .collect();
    let rows_per_chunk = if column_names.is_empty() {
        1
    } else {
        statement_rows_per_chunk(column_names.len(), chunk_rows)
    };

    let mut sent = 0u64;
    for chunk in data.raw_rows().chunks(rows_per_chunk) {
        let mut values = Vec::with_capacity(chunk.len() * bindings.len());
        for row in chunk {
            values.extend(coerce_row(row, destination, bindings)?);
        }
        let insert = insert_statement(table_name, &column_names, chunk.len());
        let sql = chunk_batch(table_name, &insert, guards);
        bind_typed_params(sql, values)
            .execute(client)
            .await
            .map_err(|e| SqlTaskError::BulkCopyError(format!("bulk insert statement: {e}")))?;
        sent += chunk.len() as u64;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, sql_type: SqlType) -> ColumnInfo {
        ColumnInfo {
            name: name.into(),
            sql_type,
            is_identity: false,
            is_computed: false,
        }
    }

    fn destination() -> Vec<ColumnInfo> {
        vec![
            ColumnInfo {
                is_identity: true,
                ..column("Id", SqlType::Int)
            },
            column("LastName", SqlType::Text),
            column("FirstName", SqlType::Text),
            ColumnInfo {
                is_computed: true,
                ..column("FullName", SqlType::Text)
            },
            column("Version", SqlType::RowVersion),
        ]
    }

    #[test]
    fn input_columns_match_case_insensitively() {
        let inputs =
            match_input_columns(&destination(), &["firstname".into(), "Id".into()]).unwrap();
        assert_eq!(inputs, vec![Some(1), None, Some(0), None, None]);
    }

    #[test]
    fn unknown_or_unwritable_input_columns_fail() {
        let err = match_input_columns(&destination(), &["Nope".into()]).unwrap_err();
        assert!(matches!(err, SqlTaskError::BulkCopyError(_)));
        let err = match_input_columns(&destination(), &["FullName".into()]).unwrap_err();
        assert!(matches!(err, SqlTaskError::BulkCopyError(_)));
        let err = match_input_columns(&destination(), &["lastname".into(), "LASTNAME".into()])
            .unwrap_err();
        assert!(matches!(err, SqlTaskError::BulkCopyError(_)));
    }

    #[test]
    fn tds_path_sends_every_updatable_column() {
        let inputs = vec![Some(0), Some(1), None, None, None];
        let bindings = tds_bindings(&destination(), &inputs);
        assert_eq!(
            bindings,
            vec![
                ColumnBinding {
                    destination: 1,
                    input: Some(1)
                },
                ColumnBinding {
                    destination: 2,
                    input: None
                },
            ]
        );
    }

    #[test]
    fn statement_path_keeps_identity_only_on_request() {
        let inputs = vec![Some(0), Some(1), None, None, None];
        let dropped = statement_bindings(&destination(), &inputs, false);
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].destination, 1);

        let kept = statement_bindings(&destination(), &inputs, true);
        assert_eq!(
            kept.iter().map(|b| b.destination).collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn chunks_respect_row_and_parameter_limits() {
        assert_eq!(statement_rows_per_chunk(1, 1000), 1000);
        assert_eq!(statement_rows_per_chunk(3, 1000), 666);
        assert_eq!(statement_rows_per_chunk(3, 10), 10);
        assert_eq!(statement_rows_per_chunk(5000, 1000), 1);
    }

    #[test]
    fn plain_chunks_are_sent_as_is() {
        let insert = "INSERT INTO dbo.Test ([Id]) VALUES (@P1)";
        assert_eq!(chunk_batch("dbo.Test", insert, &ChunkGuards::default()), insert);
    }

    #[test]
    fn identity_insert_is_switched_off_inside_the_same_batch() {
        let guards = ChunkGuards {
            identity_insert: true,
            ..ChunkGuards::default()
        };
        assert_eq!(
            chunk_batch("dbo.Test", "INSERT X", &guards),
            "SET IDENTITY_INSERT dbo.Test ON; BEGIN TRY INSERT X; END TRY \
             BEGIN CATCH SET IDENTITY_INSERT dbo.Test OFF; THROW; END CATCH; \
             SET IDENTITY_INSERT dbo.Test OFF;"
        );
    }

    #[test]
    fn suppressed_triggers_are_reenabled_or_rolled_back() {
        let guards = ChunkGuards {
            suppressed_triggers: vec!["[dbo].[TrAudit]".into(), "[dbo].[TrLog]".into()],
            own_transaction: true,
            ..ChunkGuards::default()
        };
        assert_eq!(
            chunk_batch("dbo.Test", "INSERT X", &guards),
            "BEGIN TRY BEGIN TRANSACTION; \
             DISABLE TRIGGER [dbo].[TrAudit], [dbo].[TrLog] ON dbo.Test; INSERT X; \
             ENABLE TRIGGER [dbo].[TrAudit], [dbo].[TrLog] ON dbo.Test; COMMIT TRANSACTION; END TRY \
             BEGIN CATCH IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; THROW; END CATCH;"
        );

        // inside the caller's transaction a failure rolls the disable back with it
        let nested = ChunkGuards {
            own_transaction: false,
            ..guards
        };
        let batch = chunk_batch("dbo.Test", "INSERT X", &nested);
        assert!(!batch.contains("BEGIN TRANSACTION"));
        assert!(!batch.contains("ROLLBACK"));
        assert!(batch.contains("DISABLE TRIGGER [dbo].[TrAudit], [dbo].[TrLog] ON dbo.Test"));
    }

    #[test]
    fn insert_statement_numbers_placeholders_row_major() {
        assert_eq!(
            insert_statement("dbo.Test", &["Id", "Last]Name"], 2),
            "INSERT INTO dbo.Test ([Id], [Last]]Name]) VALUES (@P1, @P2), (@P3, @P4)"
        );
        assert_eq!(
            insert_statement("dbo.Test", &[], 1),
            "INSERT INTO dbo.Test DEFAULT VALUES"
        );
    }
}
