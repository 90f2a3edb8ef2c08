// Clock Source
//
// Revisions come from the warehouse's own clock, so revision order
// agrees with the store that later answers latest-version queries.

use serde_json::Value;

use crate::retry::{BackoffPolicy, PollOutcome, Sleeper};
use crate::revision::{parse_remote_timestamp, Revision};
use crate::store::{wait_for_job, Query, StoreError, WarehouseStore};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    #[error("clock query not complete after {attempts} attempts")]
    Unavailable { attempts: u32 },

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Source of revision numbers.
pub trait RevisionClock: Send + Sync {
    fn current_revision(&self) -> Result<Revision, ClockError>;
}

/// Always returns the same revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub Revision);

impl RevisionClock for FixedClock {
    fn current_revision(&self) -> Result<Revision, ClockError> {
        if !self.0.is_assigned() {
            return Err(ClockError::InvalidTimestamp(self.0.to_string()));
        }
        Ok(self.0)
    }
}

/// Reads `CURRENT_TIMESTAMP()` from the warehouse.
pub struct WarehouseClock<'a, S: WarehouseStore + ?Sized> {
    store: &'a S,
    backoff: BackoffPolicy,
    sleeper: &'a dyn Sleeper,
}

impl<'a, S: WarehouseStore + ?Sized> WarehouseClock<'a, S> {
    pub fn new(store: &'a S, backoff: BackoffPolicy, sleeper: &'a dyn Sleeper) -> Self {
        Self {
            store,
            backoff,
            sleeper,
        }
    }

    /// Submit the clock query and poll it with linear backoff.
    pub fn current_revision(&self) -> Result<Revision, ClockError> {
        let mut handle = self.store.run_query(&Query::CurrentTimestamp)?;

        match wait_for_job(self.store, &mut handle, &self.backoff, self.sleeper)? {
            PollOutcome::Ready(()) => {}
            PollOutcome::TimedOut { attempts } => {
                tracing::warn!(attempts, "clock query did not complete");
                return Err(ClockError::Unavailable { attempts });
            }
        }

        let row = self
            .store
            .first_row(&handle)?
            .ok_or_else(|| ClockError::InvalidTimestamp("<no rows>".into()))?;

        let reading = match row.get("ts") {
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(n)) => n.to_string(),
            other => {
                return Err(ClockError::InvalidTimestamp(format!("{other:?}")));
            }
        };

        let revision = Revision::from_timestamp(parse_remote_timestamp(&reading)?)?;
        tracing::debug!(%reading, %revision, "read warehouse clock");
        Ok(revision)
    }
}

impl<S: WarehouseStore + Sync + ?Sized> RevisionClock for WarehouseClock<'_, S> {
    fn current_revision(&self) -> Result<Revision, ClockError> {
        WarehouseClock::current_revision(self)
    }
}
