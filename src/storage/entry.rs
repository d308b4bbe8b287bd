//! Counter replies returned by storage backends.

use std::time::Duration;

/// What an atomic acquire did to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterOutcome {
    /// The key did not exist; it was created with the initial remaining count.
    Created,
    /// The key held a positive count; it was decremented by one.
    Decremented,
    /// The key held zero (or less); nothing was written.
    Exhausted,
}

/// Reply to a [`Storage::acquire`](crate::storage::Storage::acquire) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReply {
    /// What happened to the counter.
    pub outcome: CounterOutcome,
    /// Remaining admits after the operation.
    pub remaining: u64,
    /// Time until the key expires, when the store reports it.
    pub expires_in: Option<Duration>,
}

impl CounterReply {
    /// Create a reply.
    pub fn new(outcome: CounterOutcome, remaining: u64, expires_in: Option<Duration>) -> Self {
        Self {
            outcome,
            remaining,
            expires_in,
        }
    }

    /// Whether the acquire admitted a request.
    pub fn is_admitted(&self) -> bool {
        !matches!(self.outcome, CounterOutcome::Exhausted)
    }
}
