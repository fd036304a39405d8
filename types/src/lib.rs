//! Shared data model for slotfloor.
//!
//! `slot` holds the reel/outcome vocabulary and the persisted aggregates; `api` holds the
//! JSON payloads exchanged with clients.

pub mod api;
pub mod slot;

pub use slot::{
    BalanceSnapshot, BonusKind, GlobalAggregate, JudgeResult, Outcome, PlayHistoryEntry,
    PlayerAggregate, Reel, ReelStops, Symbol, TeamAggregate, TeamProfile, WinLine,
};
