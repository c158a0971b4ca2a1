//! Validation for names that end up interpolated into T-SQL text.
//!
//! Parameter names, procedure names and destination table names cannot be
//! bound as values, so they are checked here before any statement is built.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SqlTaskError;

lazy_static! {
    static ref PARAMETER_NAME: Regex = Regex::new(r"^[\p{L}_][\p{L}\p{N}_@#$]{0,127}$")
        .expect("parameter name pattern is valid");
    static ref PLAIN_PART: Regex = Regex::new(r"^[\p{L}_#][\p{L}\p{N}_@#$]{0,127}$")
        .expect("object name part pattern is valid");
}

/// Normalize and validate a bind-parameter name; a leading `@` is stripped.
///
/// # Errors
///
/// Returns `SqlTaskError::ParameterError` if the name is not a valid T-SQL variable name.
pub fn parameter_name(raw: &str) -> Result<&str, SqlTaskError> {
    let name = raw.trim().strip_prefix('@').unwrap_or(raw.trim());
    if PARAMETER_NAME.is_match(name) {
        Ok(name)
    } else {
        Err(SqlTaskError::ParameterError(format!(
            "invalid parameter name {raw:?}"
        )))
    }
}

/// Validate a possibly multi-part object name such as `dbo.[My Table]`.
///
/// Each part is either a regular identifier or a bracket-quoted one (`]]`
/// escapes a closing bracket); at most four parts are allowed.
///
/// # Errors
///
/// Returns `SqlTaskError::ParameterError` if the name cannot be used safely as an object name.
pub fn object_name(raw: &str) -> Result<&str, SqlTaskError> {
    let name = raw.trim();
    let invalid = || SqlTaskError::ParameterError(format!("invalid object name {raw:?}"));

    let parts = split_object_name(name).ok_or_else(invalid)?;
    if parts.is_empty() || parts.len() > 4 {
        return Err(invalid());
    }
    for part in &parts {
        let quoted = part.len() >= 2 && part.starts_with('[') && part.ends_with(']');
        if !quoted && !PLAIN_PART.is_match(part) {
            return Err(invalid());
        }
    }
    Ok(name)
}

/// Quote a single identifier with brackets.
#[must_use]
pub fn quote(identifier: &str) -> String {
    format!("[{}]", identifier.replace(']', "]]"))
}

/// Split on dots outside brackets; `None` on an unterminated bracket or an
/// empty part.
fn split_object_name(name: &str) -> Option<Vec<&str>> {
    let mut parts = Vec::new();
    let bytes = name.as_bytes();
    let mut start = 0;
    let mut idx = 0;
    let mut in_bracket = false;

    while idx < bytes.len() {
        match bytes[idx] {
            b'[' if !in_bracket && idx == start => in_bracket = true,
            b']' if in_bracket => {
                if bytes.get(idx + 1) == Some(&b']') {
                    idx += 1;
                } else {
                    in_bracket = false;
                    if !matches!(bytes.get(idx + 1), None | Some(b'.')) {
                        return None;
                    }
                }
            }
            b'.' if !in_bracket => {
                if idx == start {
                    return None;
                }
                parts.push(&name[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
        idx += 1;
    }

    if in_bracket || start >= bytes.len() {
        return None;
    }
    parts.push(&name[start..]);
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_names_strip_at_sign() {
        assert_eq!(parameter_name("@FirstName").unwrap(), "FirstName");
        assert_eq!(parameter_name("Id").unwrap(), "Id");
        assert_eq!(parameter_name("nimi_2").unwrap(), "nimi_2");
    }

    #[test]
    fn parameter_names_reject_injection() {
        for bad in ["", "@", "1abc", "a b", "a;drop table t", "a=1", "a--"] {
            assert!(parameter_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn object_names_accept_qualified_and_bracketed() {
        for good in [
            "TestProcedure",
            "dbo.TestProcedure",
            "[dbo].[Test Table]",
            "db.dbo.[a]]b]",
            "#staging",
        ] {
            assert_eq!(object_name(good).unwrap(), good);
        }
    }

    #[test]
    fn object_names_reject_statements() {
        for bad in [
            "",
            "t; drop table x",
            "t--",
            "[unterminated",
            "a..b",
            "dbo.",
            "[a]b",
            "a.b.c.d.e",
            "t (x)",
        ] {
            assert!(object_name(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn quote_escapes_closing_bracket() {
        assert_eq!(quote("My]Col"), "[My]]Col]");
    }
}
