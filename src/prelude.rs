//! Convenient imports for common functionality.
//!
//! This module re-exports the most commonly used types and functions
//! to make it easier to get started with the library.

pub use crate::config::TaskConfig;
pub use crate::conversion::BulkCopyFlags;
pub use crate::error::SqlTaskError;
pub use crate::model::{
    BulkInsertInput, BulkInsertOptions, InputBatchOperation, InputProcedure, InputQuery, Options,
};
pub use crate::results::{CellValue, DataTable};
pub use crate::tasks::SqlTasks;
pub use crate::types::{IsolationLevel, Parameter};
