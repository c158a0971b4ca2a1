//! Input and option records for the four task operations.
//!
//! All records deserialize from camelCase JSON so a host can hand them over
//! as-is:
//! ```rust
//! use sql_tasks::prelude::*;
//!
//! let options: Options = serde_json::from_str(r#"{"isolationLevel":"None"}"#).unwrap();
//! assert_eq!(options.command_timeout_seconds, 60);
//! assert_eq!(options.isolation_level, IsolationLevel::None);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{IsolationLevel, Parameter};

pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECONDS: u64 = 60;

fn default_command_timeout() -> u64 {
    DEFAULT_COMMAND_TIMEOUT_SECONDS
}

/// One ad-hoc statement.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputQuery {
    pub query: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub connection_string: String,
}

/// One stored-procedure invocation.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputProcedure {
    /// Name of the procedure, optionally schema-qualified.
    #[serde(alias = "procedureName")]
    pub execute: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    pub connection_string: String,
}

/// A statement executed once per object of a JSON array.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputBatchOperation {
    /// e.g. `insert into MyTable(ID,NAME) VALUES (@Id, @FirstName)`
    pub query: String,
    /// JSON array of objects; each object's fields bind one execution.
    pub input_json: String,
    pub connection_string: String,
}

/// Rows to stream into a destination table.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkInsertInput {
    /// JSON array of objects whose property names match destination columns.
    pub input_data: String,
    pub table_name: String,
    pub connection_string: String,
}

/// Options shared by query, procedure and batch operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Options {
    /// Seconds before the command is abandoned; 0 waits indefinitely.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    #[serde(default, alias = "sqlTransactionIsolationLevel")]
    pub isolation_level: IsolationLevel,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
            isolation_level: IsolationLevel::default(),
        }
    }
}

impl Options {
    #[must_use]
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.command_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }
}

/// Options for [`bulk_insert`](crate::tasks::SqlTasks::bulk_insert).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkInsertOptions {
    #[serde(default = "default_command_timeout")]
    pub command_timeout_seconds: u64,
    /// Make the server fire insert triggers for the copied rows.
    #[serde(default)]
    pub fire_triggers: bool,
    /// Preserve source identity values instead of letting the destination assign them.
    #[serde(default)]
    pub keep_identity: bool,
    /// Rewrite `""` cells to `NULL` before copying (lets empty strings land in non-text columns).
    #[serde(default)]
    pub convert_empty_property_values_to_null: bool,
    #[serde(default, alias = "sqlTransactionIsolationLevel")]
    pub isolation_level: IsolationLevel,
}

impl Default for BulkInsertOptions {
    fn default() -> Self {
        Self {
            command_timeout_seconds: DEFAULT_COMMAND_TIMEOUT_SECONDS,
            fire_triggers: false,
            keep_identity: false,
            convert_empty_property_values_to_null: false,
            isolation_level: IsolationLevel::default(),
        }
    }
}

impl BulkInsertOptions {
    /// The timeout/isolation pair shared with the other operations.
    #[must_use]
    pub fn as_options(&self) -> Options {
        Options {
            command_timeout_seconds: self.command_timeout_seconds,
            isolation_level: self.isolation_level,
        }
    }
}

// Connection strings carry credentials; keep them out of Debug output.
macro_rules! redacted_debug {
    ($ty:ident { $($field:ident),* }) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))*
                    .field("connection_string", &"<redacted>")
                    .finish()
            }
        }
    };
}

redacted_debug!(InputQuery { query, parameters });
redacted_debug!(InputProcedure { execute, parameters });
redacted_debug!(InputBatchOperation { query, input_json });
redacted_debug!(BulkInsertInput { table_name, input_data });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_fill_defaults() {
        let options: Options = serde_json::from_str("{}").unwrap();
        assert_eq!(options, Options::default());
        assert_eq!(options.command_timeout_seconds, 60);
        assert_eq!(options.isolation_level, IsolationLevel::Default);
    }

    #[test]
    fn options_accept_legacy_isolation_key() {
        let options: Options = serde_json::from_str(
            r#"{"commandTimeoutSeconds":5,"sqlTransactionIsolationLevel":"Serializable"}"#,
        )
        .unwrap();
        assert_eq!(options.command_timeout_seconds, 5);
        assert_eq!(options.isolation_level, IsolationLevel::Serializable);
    }

    #[test]
    fn bulk_options_project_to_options() {
        let bulk: BulkInsertOptions = serde_json::from_str(
            r#"{"fireTriggers":true,"convertEmptyPropertyValuesToNull":true,"isolationLevel":"None"}"#,
        )
        .unwrap();
        assert!(bulk.fire_triggers);
        assert!(!bulk.keep_identity);
        assert!(bulk.convert_empty_property_values_to_null);
        assert_eq!(
            bulk.as_options(),
            Options::default().with_isolation_level(IsolationLevel::None)
        );
    }

    #[test]
    fn procedure_input_accepts_both_name_keys() {
        let a: InputProcedure = serde_json::from_str(
            r#"{"execute":"dbo.P","connectionString":"Server=x;"}"#,
        )
        .unwrap();
        let b: InputProcedure = serde_json::from_str(
            r#"{"procedureName":"dbo.P","connectionString":"Server=x;","parameters":[{"name":"A","value":"1"}]}"#,
        )
        .unwrap();
        assert_eq!(a.execute, b.execute);
        assert!(a.parameters.is_empty());
        assert_eq!(b.parameters, vec![Parameter::new("A", "1")]);
    }

    #[test]
    fn debug_output_hides_connection_string() {
        let input = InputQuery {
            query: "select 1".into(),
            parameters: vec![],
            connection_string: "Server=x;Password=secret;".into(),
        };
        let rendered = format!("{input:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("select 1"));
    }
}
