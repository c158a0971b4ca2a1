use std::borrow::Cow;

use serde_json::{Map, Value as JsonValue};
use tiberius::{ColumnData, IntoSql, Query};

use crate::error::SqlTaskError;
use crate::identifiers;
use crate::types::{ParamValue, Parameter};

/// Ordered name → value mapping bound to one statement execution.
///
/// Names are unique case-insensitively, since SQL Server compares variable
/// names that way. The position of a name is its `@Pn` index minus one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    names: Vec<String>,
    values: Vec<ParamValue>,
}

impl ParameterSet {
    /// Build from caller-supplied parameters; every value binds as text or `NULL`.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ParameterError` for an invalid or duplicate name.
    pub fn from_parameters(parameters: &[Parameter]) -> Result<Self, SqlTaskError> {
        let mut set = Self::default();
        for parameter in parameters {
            set.insert(&parameter.name, ParamValue::from(parameter.value.clone()))?;
        }
        Ok(set)
    }

    /// Build from one batch record; JSON scalars keep their type.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ParameterError` for an invalid or duplicate name.
    pub fn from_record(record: &Map<String, JsonValue>) -> Result<Self, SqlTaskError> {
        let mut set = Self::default();
        for (name, value) in record {
            set.insert(name, ParamValue::from_json(value))?;
        }
        Ok(set)
    }

    /// Append a parameter.
    ///
    /// # Errors
    ///
    /// Returns `SqlTaskError::ParameterError` for an invalid or duplicate name.
    pub fn insert(&mut self, raw_name: &str, value: ParamValue) -> Result<(), SqlTaskError> {
        let name = identifiers::parameter_name(raw_name)?;
        if self.names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
            return Err(SqlTaskError::ParameterError(format!(
                "duplicate parameter name {name:?}"
            )));
        }
        self.names.push(name.to_string());
        self.values.push(value);
        Ok(())
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn values(&self) -> &[ParamValue] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Bind parameters directly to the query for SQL Server
/// Return a query builder with parameters already bound
pub fn bind_query_params<'a>(query: impl Into<Cow<'a, str>>, params: &[ParamValue]) -> Query<'a> {
    let mut query_builder = Query::new(query);

    for param in params {
        match param {
            ParamValue::Int(i) => query_builder.bind(*i),
            ParamValue::Float(f) => query_builder.bind(*f),
            ParamValue::Text(s) => query_builder.bind(s.clone()),
            ParamValue::Bool(b) => query_builder.bind(*b),
            ParamValue::Null => query_builder.bind(Option::<String>::None),
        }
    }

    query_builder
}

/// Owned, already-typed value for binding a coerced cell.
#[derive(Debug, Clone)]
pub struct TypedParam(pub ColumnData<'static>);

impl<'a> IntoSql<'a> for TypedParam {
    fn into_sql(self) -> ColumnData<'a> {
        self.0
    }
}

/// Bind already-typed cells, in order.
pub fn bind_typed_params<'a>(
    query: impl Into<Cow<'a, str>>,
    params: impl IntoIterator<Item = ColumnData<'static>>,
) -> Query<'a> {
    let mut query_builder = Query::new(query);
    for param in params {
        query_builder.bind(TypedParam(param));
    }
    query_builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parameters_keep_declaration_order() {
        let set = ParameterSet::from_parameters(&[
            Parameter::new("@LastName", "Last"),
            Parameter::null("FirstName"),
        ])
        .unwrap();
        assert_eq!(set.names(), ["LastName", "FirstName"]);
        assert_eq!(
            set.values(),
            [ParamValue::Text("Last".into()), ParamValue::Null]
        );
    }

    #[test]
    fn duplicate_names_are_rejected_case_insensitively() {
        let err = ParameterSet::from_parameters(&[
            Parameter::new("Name", "a"),
            Parameter::new("@name", "b"),
        ])
        .unwrap_err();
        assert!(matches!(err, SqlTaskError::ParameterError(_)));
    }

    #[test]
    fn records_bind_typed_values() {
        let record = json!({"Id": 15, "LastName": "Last", "Active": true, "Note": null});
        let set = ParameterSet::from_record(record.as_object().unwrap()).unwrap();
        assert_eq!(set.len(), 4);
        assert_eq!(
            set.values(),
            [
                ParamValue::Int(15),
                ParamValue::Text("Last".into()),
                ParamValue::Bool(true),
                ParamValue::Null
            ]
        );
    }

    #[test]
    fn invalid_names_fail_before_execution() {
        let record = json!({"bad name": 1});
        assert!(ParameterSet::from_record(record.as_object().unwrap()).is_err());
    }
}
