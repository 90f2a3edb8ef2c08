// Ledger Errors
//
// Every fallible ledger operation surfaces one of these kinds
// synchronously to its caller. Nothing is retried internally.

use crate::clock::ClockError;
use crate::config::ConfigError;
use crate::store::StoreError;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// Invalid setter input, or an operation called out of order.
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    /// The remote clock query did not complete within the retry ceiling.
    #[error("clock unavailable: query not complete after {attempts} attempts")]
    ClockUnavailable { attempts: u32 },

    /// The remote clock answered with something that is not a usable revision.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A read-side query did not complete within the retry ceiling.
    #[error("query timed out after {attempts} attempts")]
    QueryTimeout { attempts: u32 },

    /// The bulk insert for `table` rejected one or more rows.
    #[error("commit to `{table}` failed: {}", .failures.join("; "))]
    CommitFailure { table: String, failures: Vec<String> },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("payload encoding failed: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ClockError> for LedgerError {
    fn from(err: ClockError) -> Self {
        match err {
            ClockError::Unavailable { attempts } => LedgerError::ClockUnavailable { attempts },
            ClockError::InvalidTimestamp(raw) => LedgerError::InvalidTimestamp(raw),
            ClockError::Store(err) => LedgerError::Store(err),
        }
    }
}
