//! Error type shared by every layer of the execution core.
//!
//! Variants split into two families. User errors describe a problem with the
//! query itself and are reported verbatim. [`Error::Internal`] signals a
//! broken contract between the core and whoever built the query; it is never
//! retried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("column not found in table(s): {0}")]
    ColumnNotFound(String),

    #[error("ambiguous column name: {0}")]
    AmbiguousColumn(String),

    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table referenced more than once: {0}")]
    DuplicateTable(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("integer overflow: {0}")]
    Overflow(String),

    #[error("cannot convert {0}")]
    Conversion(String),

    #[error("{0} must appear in the GROUP BY clause or be used in an aggregate function")]
    NonAggregateColumn(String),

    #[error("invalid use of aggregate: {0}")]
    InvalidAggregate(String),

    #[error("{0} join requires an ON clause")]
    MissingJoinCondition(String),

    #[error("unsupported join condition: {0}")]
    UnsupportedJoinCondition(String),

    #[error("query timed out")]
    Timeout,

    #[error("table is locked: {0}")]
    Locked(String),

    #[error("invalid storage operation: {0}")]
    Invalid(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Wraps the error with the table (or column) it was raised for.
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through any context wrappers.
    pub fn root(&self) -> &Error {
        let mut current = self;
        while let Error::Context { source, .. } = current {
            current = source;
        }
        current
    }

    /// True for engine invariant violations, as opposed to problems with the
    /// query text.
    pub fn is_internal(&self) -> bool {
        matches!(self.root(), Error::Internal(_))
    }
}
