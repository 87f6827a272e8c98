//! Error types for sluice-rdbc
//!
//! Errors are classified so callers can pick a recovery strategy:
//! - Retriable errors (connection, timeout)
//! - Malformed-query errors (the database rejected the statement shape)
//! - Everything else (data, transaction, configuration)

use std::fmt;
use thiserror::Error;

/// Result type for sluice-rdbc operations
pub type Result<T> = std::result::Result<T, Error>;

/// SQLSTATE classes that mean the statement itself was rejected
/// (dynamic SQL error, cardinality, SQL routine, ambiguous cursor, syntax/access rule,
/// default data error)
const BAD_GRAMMAR_CLASSES: &[&str] = &["07", "21", "2A", "37", "42", "65"];

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Connection-related errors (retriable)
    Connection,
    /// Query execution errors
    Query,
    /// The statement shape was rejected by the database
    Grammar,
    /// Transaction errors
    Transaction,
    /// Type conversion errors (not retriable)
    TypeConversion,
    /// Timeout errors (retriable)
    Timeout,
    /// Configuration error
    Configuration,
    /// Unknown/other errors
    Other,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for sluice-rdbc
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Connection failed
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Query execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        sqlstate: Option<String>,
    },

    /// Statement rejected as malformed (syntax, unknown relation, planner refusal)
    #[error("bad SQL grammar [{sqlstate}]: {message}")]
    BadGrammar {
        message: String,
        sql: Option<String>,
        sqlstate: String,
    },

    /// Transaction error
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Type conversion failed
    #[error("type conversion error: {message}")]
    TypeConversion { message: String },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Unsupported operation for this backend
    #[error("unsupported: {message}")]
    Unsupported { message: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::BadGrammar { .. } => ErrorCategory::Grammar,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::TypeConversion { .. } => ErrorCategory::TypeConversion,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Unsupported { .. } => ErrorCategory::Other,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether the database rejected the statement shape itself
    #[inline]
    pub fn is_malformed_query(&self) -> bool {
        self.category() == ErrorCategory::Grammar
    }

    /// SQLSTATE reported by the database, if any
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Query { sqlstate, .. } => sqlstate.as_deref(),
            Self::BadGrammar { sqlstate, .. } => Some(sqlstate),
            _ => None,
        }
    }

    /// Classify a failed statement by its SQLSTATE.
    ///
    /// Codes in the grammar classes become [`Error::BadGrammar`], anything else
    /// (including a missing code) stays a plain [`Error::Query`].
    pub fn from_sqlstate(
        message: impl Into<String>,
        sql: Option<&str>,
        sqlstate: Option<&str>,
    ) -> Self {
        match sqlstate {
            Some(code) if is_bad_grammar_code(code) => Self::BadGrammar {
                message: message.into(),
                sql: sql.map(str::to_string),
                sqlstate: code.to_string(),
            },
            _ => Self::Query {
                message: message.into(),
                sql: sql.map(str::to_string),
                sqlstate: sqlstate.map(str::to_string),
            },
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            sqlstate: None,
        }
    }

    /// Create a query error with SQL
    pub fn query_with_sql(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            sqlstate: None,
        }
    }

    /// Create a malformed-query error
    pub fn bad_grammar(message: impl Into<String>, sqlstate: impl Into<String>) -> Self {
        Self::BadGrammar {
            message: message.into(),
            sql: None,
            sqlstate: sqlstate.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a type conversion error
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    /// Create a transaction error
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            source: None,
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported {
            message: message.into(),
        }
    }
}

/// Whether a SQLSTATE belongs to one of the grammar classes
pub fn is_bad_grammar_code(sqlstate: &str) -> bool {
    sqlstate
        .get(..2)
        .is_some_and(|class| BAD_GRAMMAR_CLASSES.contains(&class))
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Grammar => write!(f, "grammar"),
            Self::Transaction => write!(f, "transaction"),
            Self::TypeConversion => write!(f, "type_conversion"),
            Self::Timeout => write!(f, "timeout"),
            Self::Configuration => write!(f, "configuration"),
            Self::Other => write!(f, "other"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_retriable() {
        assert!(ErrorCategory::Connection.is_retriable());
        assert!(ErrorCategory::Timeout.is_retriable());

        assert!(!ErrorCategory::Grammar.is_retriable());
        assert!(!ErrorCategory::TypeConversion.is_retriable());
        assert!(!ErrorCategory::Query.is_retriable());
    }

    #[test]
    fn test_sqlstate_classification() {
        // 42601 syntax_error, 42P01 undefined_table, 54001 statement_too_complex
        assert!(Error::from_sqlstate("syntax", None, Some("42601")).is_malformed_query());
        assert!(Error::from_sqlstate("no table", None, Some("42P01")).is_malformed_query());
        assert!(Error::from_sqlstate("direct statement", None, Some("2A000")).is_malformed_query());
        assert!(Error::from_sqlstate("cardinality", None, Some("21000")).is_malformed_query());
        assert!(!Error::from_sqlstate("too complex", None, Some("54001")).is_malformed_query());
        assert!(!Error::from_sqlstate("unknown", None, None).is_malformed_query());
    }

    #[test]
    fn test_sqlstate_is_kept() {
        let err = Error::from_sqlstate("deadlock", Some("SELECT 1"), Some("40P01"));
        assert_eq!(err.sqlstate(), Some("40P01"));
        assert_eq!(err.category(), ErrorCategory::Query);

        let err = Error::bad_grammar("bad", "42601");
        assert_eq!(err.sqlstate(), Some("42601"));
    }

    #[test]
    fn test_short_sqlstate_is_not_grammar() {
        assert!(!is_bad_grammar_code("4"));
        assert!(!is_bad_grammar_code(""));
    }

    #[test]
    fn test_error_display() {
        let err = Error::connection("connection refused");
        assert!(err.to_string().contains("connection refused"));

        let err = Error::bad_grammar("syntax error at or near \"FORM\"", "42601");
        assert!(err.to_string().contains("42601"));
        assert!(err.to_string().contains("FORM"));
    }
}
