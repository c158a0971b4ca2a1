//! SQL Server tasks: parameterized queries, stored procedures, batch
//! operations and bulk insert, each run in an optional transaction at a
//! caller-chosen isolation level.
//!
//! ```rust,no_run
//! use sql_tasks::prelude::*;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), SqlTaskError> {
//! let input = InputQuery {
//!     query: "select * from Test where LastName = @Name".into(),
//!     parameters: vec![Parameter::new("Name", "Last")],
//!     connection_string: "Server=tcp:localhost,1433;User Id=sa;Password=...;TrustServerCertificate=true".into(),
//! };
//! let rows = SqlTasks::default()
//!     .execute_query(&input, &Options::default(), &CancellationToken::new())
//!     .await?;
//! println!("{rows}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conversion;
pub mod error;
pub mod identifiers;
pub mod model;
pub mod mssql;
pub mod prelude;
pub mod results;
pub mod tasks;
pub mod translation;
pub mod types;

pub use config::TaskConfig;
pub use conversion::{BulkCopyFlags, TransactionPlan, flag_if};
pub use error::SqlTaskError;
pub use model::{
    BulkInsertInput, BulkInsertOptions, InputBatchOperation, InputProcedure, InputQuery, Options,
};
pub use results::{CellValue, DataRow, DataTable};
pub use tasks::{SqlTasks, batch_operation, bulk_insert, execute_procedure, execute_query};
pub use types::{CommandType, IsolationLevel, ParamValue, Parameter};
