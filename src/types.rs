use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Transaction isolation requested for one task call.
///
/// `None` is a call-level switch, not an isolation level: it means "run in
/// autocommit mode without opening a transaction". It must not be confused
/// with the lowest isolation level, which is `ReadUncommitted`.
///
/// Every other variant opens an explicit transaction. `Default` begins it at
/// the session's ambient level (READ COMMITTED on a fresh pooled connection).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum,
)]
pub enum IsolationLevel {
    /// Open a transaction at the connection's ambient level.
    #[default]
    Default,
    ReadCommitted,
    /// Autocommit; no transaction is opened.
    None,
    Serializable,
    ReadUncommitted,
    RepeatableRead,
    Snapshot,
}

impl IsolationLevel {
    /// Whether this level opens a transaction scope at all.
    #[must_use]
    pub fn uses_transaction(self) -> bool {
        !matches!(self, IsolationLevel::None)
    }
}

/// How the command text of a call is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
pub enum CommandType {
    /// Ad-hoc T-SQL text with named `@placeholders`.
    #[default]
    Text,
    /// Name of a stored procedure; parameters are passed by name.
    StoredProcedure,
}

/// One named bind variable as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Option<String>,
}

impl Parameter {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }

    /// A parameter that binds SQL `NULL`.
    #[must_use]
    pub fn null(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// Values bound to statement placeholders.
///
/// Parameters coming from [`Parameter`] are always `Text` (or `Null`); batch
/// records map their JSON scalars onto the matching variant:
/// ```rust
/// use sql_tasks::ParamValue;
///
/// let v = ParamValue::from_json(&serde_json::json!(15));
/// assert_eq!(v, ParamValue::Int(15));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Map one JSON value to a bind value. Arrays and objects bind as their
    /// JSON text.
    #[must_use]
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => ParamValue::Null,
            JsonValue::Bool(b) => ParamValue::Bool(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ParamValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    ParamValue::Float(f)
                } else {
                    ParamValue::Text(n.to_string())
                }
            }
            JsonValue::String(s) => ParamValue::Text(s.clone()),
            other => ParamValue::Text(other.to_string()),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let ParamValue::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }
}

impl From<Option<String>> for ParamValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(ParamValue::Null, ParamValue::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn none_is_the_only_level_without_transaction() {
        let levels = [
            IsolationLevel::Default,
            IsolationLevel::ReadCommitted,
            IsolationLevel::Serializable,
            IsolationLevel::ReadUncommitted,
            IsolationLevel::RepeatableRead,
            IsolationLevel::Snapshot,
        ];
        assert!(levels.iter().all(|l| l.uses_transaction()));
        assert!(!IsolationLevel::None.uses_transaction());
    }

    #[test]
    fn json_scalars_map_to_param_values() {
        assert_eq!(ParamValue::from_json(&json!(null)), ParamValue::Null);
        assert_eq!(ParamValue::from_json(&json!(true)), ParamValue::Bool(true));
        assert_eq!(ParamValue::from_json(&json!(-3)), ParamValue::Int(-3));
        assert_eq!(ParamValue::from_json(&json!(1.5)), ParamValue::Float(1.5));
        assert_eq!(
            ParamValue::from_json(&json!("Foo")),
            ParamValue::Text("Foo".into())
        );
        assert_eq!(
            ParamValue::from_json(&json!({"a": 1})),
            ParamValue::Text("{\"a\":1}".into())
        );
    }

    #[test]
    fn isolation_level_parses_from_pascal_case() {
        let level: IsolationLevel = serde_json::from_str("\"RepeatableRead\"").unwrap();
        assert_eq!(level, IsolationLevel::RepeatableRead);
        assert_eq!(IsolationLevel::default(), IsolationLevel::Default);
    }
}
