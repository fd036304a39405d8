//! Read-side views over the aggregates, rankings and period resets.

use crate::error::{LedgerError, Result};
use crate::ledger::{lock, Ledger};
use crate::store::Store;
use slotfloor_types::api::{
    GlobalStats, PlayerStats, Ranking, RankingBy, RankingEntry, RankingKind, ResetResponse,
    ResetTarget, TeamList, TeamMemberView, TeamStats, TeamSummary,
};
use slotfloor_types::slot::{DEFAULT_TEAM_PAGE, MAX_TEAM_PAGE};
use slotfloor_types::{BalanceSnapshot, PlayerAggregate, TeamAggregate};
use tracing::info;

/// Who asks for an administrative action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Actor {
    pub player_id: String,
    /// Set by the request layer once an admin credential checked out.
    pub is_admin: bool,
}

impl Actor {
    pub fn player(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            is_admin: false,
        }
    }

    pub fn admin(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            is_admin: true,
        }
    }
}

fn player_value(player: &PlayerAggregate, by: RankingBy) -> i64 {
    match by {
        RankingBy::Total => player.balance.total,
        RankingBy::Period => player.balance.period,
        RankingBy::Big => player.big_count as i64,
        RankingBy::Reg => player.reg_count as i64,
    }
}

fn team_balance_value(balance: &BalanceSnapshot, by: RankingBy) -> Option<i64> {
    match by {
        RankingBy::Total => Some(balance.total),
        RankingBy::Period => Some(balance.period),
        RankingBy::Big | RankingBy::Reg => None,
    }
}

impl<S: Store> Ledger<S> {
    pub async fn global_stats(&self) -> Result<GlobalStats> {
        let global = self.global_snapshot().await?;
        Ok(GlobalStats {
            total_players: global.total_players,
            total_plays: global.total_plays,
            total_big: global.total_big,
            total_reg: global.total_reg,
            balance: global.balance,
        })
    }

    pub async fn player_stats(&self, player_id: &str) -> Result<PlayerStats> {
        let player = self.player_snapshot(player_id).await?;
        Ok(PlayerStats {
            average_delta: player.average_delta(),
            player_id: player.player_id,
            player_name: player.player_name,
            setting: player.setting,
            play_count: player.play_count,
            big_count: player.big_count,
            reg_count: player.reg_count,
            balance: player.balance,
            team_id: player.team_id,
        })
    }

    pub async fn team_stats(&self, team_id: &str) -> Result<TeamStats> {
        let team = self.team_snapshot(team_id)?;
        let mut members = Vec::with_capacity(team.profile.members.len());
        for member_id in &team.profile.members {
            let player = self.player_snapshot(member_id).await?;
            members.push(TeamMemberView {
                player_id: player.player_id,
                player_name: player.player_name,
                play_count: player.play_count,
                balance: player.balance.into(),
            });
        }
        Ok(TeamStats {
            average_delta: team.average_delta(),
            team_id: team.profile.team_id,
            team_name: team.profile.team_name,
            description: team.profile.description,
            owner_id: team.profile.owner_id,
            members,
            max_members: team.profile.max_members,
            is_public: team.profile.is_public,
            balance: team.balance,
        })
    }

    /// Highest value first; ties broken by id so the order is stable.
    ///
    /// Teams keep no bonus counters of their own, so a team's `big`/`reg` value is the sum
    /// over its current members.
    pub async fn ranking(&self, kind: RankingKind, by: RankingBy, limit: usize) -> Result<Ranking> {
        let mut rows: Vec<(String, String, i64, u64)> = match kind {
            RankingKind::Player => {
                let mut rows = Vec::new();
                for slot in self.player_slots() {
                    let player = slot.lock().await;
                    rows.push((
                        player.player_id.clone(),
                        player.player_name.clone(),
                        player_value(&player, by),
                        player.play_count,
                    ));
                }
                rows
            }
            RankingKind::Team => {
                let teams: Vec<TeamAggregate> = self
                    .team_slots()
                    .iter()
                    .map(|slot| lock(slot, "team").clone())
                    .collect();
                let mut rows = Vec::with_capacity(teams.len());
                for team in teams {
                    let value = match team_balance_value(&team.balance, by) {
                        Some(value) => value,
                        None => {
                            let mut sum = 0;
                            for member_id in &team.profile.members {
                                sum += player_value(&self.player_snapshot(member_id).await?, by);
                            }
                            sum
                        }
                    };
                    rows.push((
                        team.profile.team_id,
                        team.profile.team_name,
                        value,
                        team.profile.members.len() as u64,
                    ));
                }
                rows
            }
        };
        rows.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| a.0.cmp(&b.0)));
        let entries = rows
            .into_iter()
            .take(limit)
            .enumerate()
            .map(|(index, (id, name, value, size))| RankingEntry {
                rank: index + 1,
                id,
                name,
                value,
                size,
            })
            .collect();
        Ok(Ranking { kind, by, entries })
    }

    /// Team directory, newest first. `public_only` hides private teams.
    pub fn list_teams(
        &self,
        public_only: bool,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<TeamList> {
        let limit = limit.unwrap_or(DEFAULT_TEAM_PAGE);
        if limit == 0 || limit > MAX_TEAM_PAGE {
            return Err(LedgerError::Validation(format!(
                "limit must be within 1..={MAX_TEAM_PAGE}"
            )));
        }
        let offset = offset.unwrap_or(0);
        let mut teams: Vec<TeamSummary> = self
            .team_slots()
            .iter()
            .filter_map(|slot| {
                let team = lock(slot, "team");
                if public_only && !team.profile.is_public {
                    return None;
                }
                Some(TeamSummary {
                    team_id: team.profile.team_id.clone(),
                    team_name: team.profile.team_name.clone(),
                    description: team.profile.description.clone(),
                    owner_id: team.profile.owner_id.clone(),
                    member_count: team.profile.members.len(),
                    max_members: team.profile.max_members,
                    is_public: team.profile.is_public,
                    balance: team.balance.into(),
                    created_at: team.profile.created_at,
                })
            })
            .collect();
        teams.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.team_id.cmp(&b.team_id))
        });
        let total_count = teams.len();
        let teams = teams.into_iter().skip(offset).take(limit).collect();
        Ok(TeamList {
            teams,
            total_count,
            limit,
            offset,
        })
    }

    /// Zero the period balance of `target`. Players reset themselves, teams are reset by
    /// their owner and the global aggregate needs an admin.
    pub async fn reset_period(&self, actor: &Actor, target: ResetTarget) -> Result<ResetResponse> {
        let balance = match target {
            ResetTarget::Player => {
                let mut guard = self.player_slot(&actor.player_id)?.lock_owned().await;
                let mut player = (*guard).clone();
                player.balance.reset_period(crate::now_ms());
                let balance = player.balance;
                self.save_player(&mut guard, player).await?;
                balance
            }
            ResetTarget::Team => {
                let _membership = self.membership.lock().await;
                let player = self.player_snapshot(&actor.player_id).await?;
                let Some(team_id) = player.team_id else {
                    return Err(LedgerError::Conflict(format!(
                        "player {} is not in a team",
                        actor.player_id
                    )));
                };
                let owner = self.team_snapshot(&team_id)?.profile.owner_id;
                if owner != actor.player_id {
                    return Err(LedgerError::Forbidden(format!(
                        "only the owner of team {team_id} may reset its period"
                    )));
                }
                self.reset_team_period(&team_id).await?
            }
            ResetTarget::Global => {
                if !actor.is_admin {
                    return Err(LedgerError::Forbidden(
                        "global period reset requires an administrator".to_string(),
                    ));
                }
                self.reset_global_period().await?
            }
        };
        info!(actor = %actor.player_id, ?target, "period reset");
        Ok(ResetResponse { target, balance })
    }
}
