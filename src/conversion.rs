//! Type conversion helpers.
//!
//! Exhaustive mappings from the task-level enumerations to what is actually
//! sent to SQL Server, plus the bulk-copy flag set.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::SqlTaskError;
use crate::identifiers;
use crate::mssql::params::ParameterSet;
use crate::translation::translate_named_placeholders;
use crate::types::{CommandType, IsolationLevel};

/// What a call does about transactions for a given [`IsolationLevel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPlan {
    /// Autocommit, no transaction.
    Autocommit,
    /// `BEGIN TRANSACTION` at the session's current level.
    Ambient,
    /// Set the named level, then `BEGIN TRANSACTION`.
    Explicit(&'static str),
}

impl From<IsolationLevel> for TransactionPlan {
    fn from(level: IsolationLevel) -> Self {
        match level {
            IsolationLevel::None => TransactionPlan::Autocommit,
            IsolationLevel::Default => TransactionPlan::Ambient,
            IsolationLevel::ReadUncommitted => TransactionPlan::Explicit("READ UNCOMMITTED"),
            IsolationLevel::ReadCommitted => TransactionPlan::Explicit("READ COMMITTED"),
            IsolationLevel::RepeatableRead => TransactionPlan::Explicit("REPEATABLE READ"),
            IsolationLevel::Serializable => TransactionPlan::Explicit("SERIALIZABLE"),
            IsolationLevel::Snapshot => TransactionPlan::Explicit("SNAPSHOT"),
        }
    }
}

impl TransactionPlan {
    /// The T-SQL batch that opens the transaction, if any.
    #[must_use]
    pub fn begin_statement(self) -> Option<String> {
        match self {
            TransactionPlan::Autocommit => None,
            TransactionPlan::Ambient => Some("BEGIN TRANSACTION".to_string()),
            TransactionPlan::Explicit(level) => Some(format!(
                "SET TRANSACTION ISOLATION LEVEL {level}; BEGIN TRANSACTION"
            )),
        }
    }

    /// Whether the session level must be restored once the transaction ends.
    #[must_use]
    pub fn changes_session_level(self) -> bool {
        matches!(self, TransactionPlan::Explicit(_))
    }
}

/// Level every pooled session is returned to; the server default.
pub(crate) const SESSION_DEFAULT_ISOLATION: &str = "SET TRANSACTION ISOLATION LEVEL READ COMMITTED";

/// Bulk-copy option bits.
///
/// Values follow the conventional bulk-copy option numbering, so a combined
/// value is interchangeable with other SQL Server tooling.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BulkCopyFlags(u32);

impl BulkCopyFlags {
    pub const NONE: Self = Self(0);
    pub const KEEP_IDENTITY: Self = Self(1);
    pub const FIRE_TRIGGERS: Self = Self(16);

    /// Combine the two boolean options into one flag value.
    ///
    /// ```rust
    /// use sql_tasks::conversion::BulkCopyFlags;
    ///
    /// assert_eq!(BulkCopyFlags::combine(true, true).bits(), 17);
    /// assert_eq!(
    ///     BulkCopyFlags::combine(true, true),
    ///     BulkCopyFlags::combine(true, false) | BulkCopyFlags::combine(false, true)
    /// );
    /// ```
    #[must_use]
    pub fn combine(fire_triggers: bool, keep_identity: bool) -> Self {
        flag_if(fire_triggers, Self::FIRE_TRIGGERS) | flag_if(keep_identity, Self::KEEP_IDENTITY)
    }

    #[must_use]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for BulkCopyFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for BulkCopyFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for BulkCopyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Self::KEEP_IDENTITY) {
            names.push("KEEP_IDENTITY");
        }
        if self.contains(Self::FIRE_TRIGGERS) {
            names.push("FIRE_TRIGGERS");
        }
        if names.is_empty() {
            names.push("NONE");
        }
        write!(f, "BulkCopyFlags({})", names.join(" | "))
    }
}

/// `flag` when `value` is set, the type's neutral default otherwise.
pub fn flag_if<T: Default>(value: bool, flag: T) -> T {
    if value { flag } else { T::default() }
}

/// Build the statement text sent for a command.
///
/// Text commands get their named placeholders translated; stored procedures
/// become `EXEC <name> @Param = @Pn, ...` with parameters in set order.
///
/// # Errors
///
/// Returns `SqlTaskError::ParameterError` if a procedure name is not a valid object name.
pub fn command_statement(
    command_type: CommandType,
    text: &str,
    params: &ParameterSet,
) -> Result<String, SqlTaskError> {
    match command_type {
        CommandType::Text => Ok(translate_named_placeholders(text, params.names()).into_owned()),
        CommandType::StoredProcedure => {
            let procedure = identifiers::object_name(text)?;
            let args = params
                .names()
                .iter()
                .enumerate()
                .map(|(i, name)| format!("@{name} = @P{}", i + 1))
                .collect::<Vec<_>>()
                .join(", ");
            if args.is_empty() {
                Ok(format!("EXEC {procedure}"))
            } else {
                Ok(format!("EXEC {procedure} {args}"))
            }
        }
    }
}
