//! Errors raised synchronously to callers.
//!
//! Dependency discovery anomalies are not errors: they are logged and the
//! affected read is simply not tracked.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("Dependency graph is too deep: {depth} levels of computed signals, limit is {limit}")]
    TooComplex { depth: usize, limit: usize },

    #[error("Cannot modify a transaction after it has been committed")]
    TransactionCommitted,

    #[error("Transaction has been disposed")]
    TransactionDisposed,
}

pub type Result<T, E = SignalError> = std::result::Result<T, E>;
