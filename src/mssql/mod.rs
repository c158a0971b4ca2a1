// MSSQL module - SQL Server access via tiberius
//
// - config: connection pools keyed by connection string
// - client: raw client creation
// - params: parameter sets and query binding
// - query: result-set materialization
// - transaction: per-call transaction scope
// - executor: command and batch execution
// - coerce / bulk: destination-typed bulk copy

pub mod bulk;
pub mod client;
pub mod coerce;
pub mod config;
pub mod executor;
pub mod params;
pub mod query;
pub mod transaction;

pub use bulk::bulk_copy;
pub use client::create_mssql_client;
pub use config::{ConnectionPools, MssqlClient, MssqlManager, MssqlPool};
pub use executor::{execute_batch, execute_command, parse_batch_records};
pub use params::ParameterSet;
pub use query::build_data_table;
pub use transaction::TxScope;
