//! Slot floor core.
//!
//! - [`OutcomeEngine`] turns one uniform draw into an outcome, reel stops consistent with
//!   it and a judged payout. It is pure and shared freely across tasks.
//! - [`Ledger`] folds signed deltas into the player, team and global aggregates. Each
//!   commit is persisted through a [`Store`] before memory changes, so a failed write
//!   leaves every aggregate as it was.
//! - [`PlayOrchestrator`] runs one play end to end and publishes a notification.
//!
//! Registration, team membership, statistics and period resets are `Ledger` methods
//! (see `roster` and `stats`).

pub mod backoff;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod reels;
pub mod rng;
pub mod roster;
pub mod stats;
pub mod store;
pub mod table;

#[cfg(any(test, feature = "mocks"))]
pub mod mocks;

use std::time::{SystemTime, UNIX_EPOCH};

pub use backoff::RetryPolicy;
pub use engine::{MissingSymbol, OutcomeEngine, Spin};
pub use error::{LedgerError, Result};
pub use ledger::{CommittedBalances, Ledger, PersistenceSnapshot};
pub use orchestrator::{PlayOrchestrator, PlaySink};
pub use reels::{ReelError, ReelSet};
pub use rng::{GameRng, SeedSource};
pub use stats::Actor;
pub use store::{MembershipChange, PlayCommit, Store};
pub use table::{ProbabilityTable, ProbabilityTables, TableError};

#[cfg(any(test, feature = "mocks"))]
pub use store::Memory;

/// Wall-clock milliseconds since the Unix epoch (0 if the clock is before it).
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}
