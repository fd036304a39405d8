//! JSON payloads exchanged with clients and pushed to subscribers.

use crate::slot::{BalanceSnapshot, JudgeResult, Outcome, PlayHistoryEntry, ReelStops};
use serde::{Deserialize, Serialize};

/// Client-visible part of a balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceView {
    pub total: i64,
    pub period: i64,
}

impl From<BalanceSnapshot> for BalanceView {
    fn from(snapshot: BalanceSnapshot) -> Self {
        Self {
            total: snapshot.total,
            period: snapshot.period,
        }
    }
}

/// Returned to the player who issued a play.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayResponse {
    pub outcome_label: Outcome,
    pub reel_positions: ReelStops,
    pub payout: u64,
    pub delta: i64,
    pub player_balance: BalanceView,
    pub team_balance: Option<BalanceView>,
    pub judge: JudgeResult,
    pub play_sequence_number: u64,
}

/// Pushed to every subscriber once per committed play.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayNotification {
    pub player_id: String,
    pub outcome_label: Outcome,
    pub payout: u64,
    pub delta: i64,
    pub player_balance: BalanceView,
    pub team_balance: Option<BalanceView>,
    pub global_balance: BalanceView,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Newest first.
    pub entries: Vec<PlayHistoryEntry>,
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalStats {
    pub total_players: u64,
    pub total_plays: u64,
    pub total_big: u64,
    pub total_reg: u64,
    pub balance: BalanceSnapshot,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub player_id: String,
    pub player_name: String,
    pub setting: u8,
    pub play_count: u64,
    pub big_count: u64,
    pub reg_count: u64,
    pub balance: BalanceSnapshot,
    pub average_delta: f64,
    pub team_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamMemberView {
    pub player_id: String,
    pub player_name: String,
    pub play_count: u64,
    pub balance: BalanceView,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TeamStats {
    pub team_id: String,
    pub team_name: String,
    pub description: String,
    pub owner_id: String,
    pub members: Vec<TeamMemberView>,
    pub max_members: u8,
    pub is_public: bool,
    pub balance: BalanceSnapshot,
    pub average_delta: f64,
}

/// One row of the team directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_id: String,
    pub team_name: String,
    pub description: String,
    pub owner_id: String,
    pub member_count: usize,
    pub max_members: u8,
    pub is_public: bool,
    pub balance: BalanceView,
    pub created_at: u64,
}

/// Newest teams first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamList {
    pub teams: Vec<TeamSummary>,
    /// Teams matching the filter before paging.
    pub total_count: usize,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingKind {
    #[default]
    Player,
    Team,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingBy {
    #[default]
    Total,
    Period,
    /// BIG bonuses won.
    Big,
    /// REG bonuses won.
    Reg,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankingEntry {
    /// 1-based.
    pub rank: usize,
    pub id: String,
    pub name: String,
    /// Balance for `total` and `period`, bonus count for `big` and `reg`.
    pub value: i64,
    /// Play count for players, member count for teams.
    pub size: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ranking {
    pub kind: RankingKind,
    pub by: RankingBy,
    pub entries: Vec<RankingEntry>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetTarget {
    Player,
    Team,
    Global,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub target: ResetTarget,
    pub balance: BalanceSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}
