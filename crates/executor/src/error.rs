//! Executor-level errors
//!
//! Engine errors crossing the executor boundary are annotated with the
//! originating statement text, following the propagation policy: deadlocks
//! roll the whole transaction back, lock timeouts roll back to the pre-row
//! savepoint, everything else surfaces annotated to the caller or its async
//! handler.

use thiserror::Error;
use vellum_transaction::Error as EngineError;

/// Result type for statement execution
pub type Result<T> = std::result::Result<T, ExecuteError>;

/// Errors surfaced from running a statement
#[derive(Error, Debug)]
pub enum ExecuteError {
    /// An engine error, annotated with the statement that hit it.
    #[error("{source} -- statement: {statement}")]
    Statement {
        statement: String,
        #[source]
        source: EngineError,
    },

    /// The session's cancel flag was raised mid-statement.
    #[error("statement canceled -- statement: {statement}")]
    Canceled { statement: String },
}

impl ExecuteError {
    pub fn statement(statement: impl Into<String>, source: EngineError) -> Self {
        Self::Statement {
            statement: statement.into(),
            source,
        }
    }

    /// The underlying engine error, if any.
    pub fn cause(&self) -> Option<&EngineError> {
        match self {
            ExecuteError::Statement { source, .. } => Some(source),
            ExecuteError::Canceled { .. } => None,
        }
    }

    pub fn is_deadlock(&self) -> bool {
        matches!(self.cause(), Some(EngineError::Deadlock { .. }))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self.cause(), Some(EngineError::LockTimeout))
    }
}
