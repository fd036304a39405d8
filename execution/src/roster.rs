//! Registration and team membership.
//!
//! Every operation here runs under the ledger's membership mutex and holds the moving
//! player's lock, so no play of that player is in flight while its team changes.

use crate::error::{LedgerError, Result};
use crate::ledger::{lock, persistence, Ledger, PlayerGuard};
use crate::now_ms;
use crate::stats::Actor;
use crate::store::{MembershipChange, Store};
use slotfloor_types::slot::{
    BASE_SETTING_LEVEL, MAX_DESCRIPTION_LENGTH, MAX_ID_LENGTH, MAX_NAME_LENGTH, MAX_SETTING_LEVEL,
    MIN_SETTING_LEVEL,
};
use slotfloor_types::{PlayerAggregate, TeamAggregate, TeamProfile};
use tracing::info;

pub(crate) fn validate_setting(level: u8) -> Result<u8> {
    if !(MIN_SETTING_LEVEL..=MAX_SETTING_LEVEL).contains(&level) {
        return Err(LedgerError::Validation(format!(
            "setting level {level} outside {MIN_SETTING_LEVEL}..={MAX_SETTING_LEVEL}"
        )));
    }
    Ok(level)
}

fn validate_text(field: &str, value: &str, max: usize, allow_empty: bool) -> Result<String> {
    let value = value.trim();
    if value.is_empty() && !allow_empty {
        return Err(LedgerError::Validation(format!("{field} must not be empty")));
    }
    if value.len() > max {
        return Err(LedgerError::Validation(format!(
            "{field} is {} bytes (max {max})",
            value.len()
        )));
    }
    Ok(value.to_string())
}

impl<S: Store> Ledger<S> {
    pub async fn register(
        &self,
        player_id: &str,
        player_name: &str,
        setting: Option<u8>,
    ) -> Result<PlayerAggregate> {
        let player_id = validate_text("player_id", player_id, MAX_ID_LENGTH, false)?;
        let player_name = validate_text("player_name", player_name, MAX_NAME_LENGTH, false)?;
        let setting = validate_setting(setting.unwrap_or(BASE_SETTING_LEVEL))?;

        let global = self.global().await?;
        let _membership = self.membership.lock().await;
        if self.contains_player(&player_id) {
            return Err(LedgerError::Conflict(format!(
                "player {player_id} already registered"
            )));
        }
        let player = PlayerAggregate::new(player_id, player_name, setting, now_ms());
        self.store()
            .create_player(&player)
            .await
            .map_err(|err| persistence(err, "create player"))?;
        lock(global, "global").total_players += 1;
        self.insert_player(player.clone());
        info!(player_id = %player.player_id, setting, "player registered");
        Ok(player)
    }

    pub async fn set_setting(&self, player_id: &str, level: u8) -> Result<PlayerAggregate> {
        self.update_profile(&Actor::player(player_id), player_id, None, Some(level))
            .await
    }

    /// Rename a player and/or change its stored setting. Players may only edit themselves.
    pub async fn update_profile(
        &self,
        actor: &Actor,
        player_id: &str,
        player_name: Option<&str>,
        setting: Option<u8>,
    ) -> Result<PlayerAggregate> {
        if actor.player_id != player_id {
            return Err(LedgerError::Forbidden(format!(
                "player {} may not edit player {player_id}",
                actor.player_id
            )));
        }
        let player_name = player_name
            .map(|name| validate_text("player_name", name, MAX_NAME_LENGTH, false))
            .transpose()?;
        let setting = setting.map(validate_setting).transpose()?;

        let mut guard = self.player_slot(player_id)?.lock_owned().await;
        let mut player = (*guard).clone();
        if let Some(name) = player_name {
            player.player_name = name;
        }
        if let Some(level) = setting {
            player.setting = level;
        }
        if player != *guard {
            self.save_player(&mut guard, player.clone()).await?;
            info!(player_id, setting = player.setting, "player profile updated");
        }
        Ok(player)
    }

    pub async fn create_team(
        &self,
        owner_id: &str,
        team_name: &str,
        description: &str,
        is_public: bool,
    ) -> Result<TeamAggregate> {
        let team_name = validate_text("team_name", team_name, MAX_NAME_LENGTH, false)?;
        let description = validate_text("description", description, MAX_DESCRIPTION_LENGTH, true)?;

        let _membership = self.membership.lock().await;
        let taken = self.team_slots().iter().any(|slot| {
            lock(slot, "team")
                .profile
                .team_name
                .eq_ignore_ascii_case(&team_name)
        });
        if taken {
            return Err(LedgerError::Conflict(format!(
                "team name {team_name} is taken"
            )));
        }

        let mut guard = self.player_slot(owner_id)?.lock_owned().await;
        let mut player = (*guard).clone();
        let mut change = MembershipChange::default();
        self.detach(&mut player, &mut change)?;

        let team_id = uuid::Uuid::new_v4().to_string();
        let profile = TeamProfile::new(
            team_id.clone(),
            team_name,
            description,
            player.player_id.clone(),
            is_public,
            now_ms(),
        );
        player.team_id = Some(team_id.clone());
        change.upsert_teams.push(profile);
        change.players.push(player);
        self.apply_change(&mut guard, change).await?;
        info!(owner_id, team_id = %team_id, "team created");
        self.team_snapshot(&team_id)
    }

    pub async fn join_team(&self, player_id: &str, team_id: &str) -> Result<TeamAggregate> {
        let _membership = self.membership.lock().await;
        let mut profile = self.team_snapshot(team_id)?.profile;
        if profile.is_member(player_id) {
            return Err(LedgerError::Conflict(format!(
                "player {player_id} already belongs to team {team_id}"
            )));
        }
        if profile.is_full() {
            return Err(LedgerError::Conflict(format!(
                "team {team_id} is full ({} members)",
                profile.max_members
            )));
        }

        let mut guard = self.player_slot(player_id)?.lock_owned().await;
        let mut player = (*guard).clone();
        let mut change = MembershipChange::default();
        self.detach(&mut player, &mut change)?;

        profile.members.push(player.player_id.clone());
        player.team_id = Some(profile.team_id.clone());
        change.upsert_teams.push(profile);
        change.players.push(player);
        self.apply_change(&mut guard, change).await?;
        info!(player_id, team_id, "team joined");
        self.team_snapshot(team_id)
    }

    /// Returns the team that was left, or `None` when leaving deleted it.
    pub async fn leave_team(&self, player_id: &str) -> Result<Option<TeamAggregate>> {
        let _membership = self.membership.lock().await;
        let mut guard = self.player_slot(player_id)?.lock_owned().await;
        let Some(team_id) = guard.team_id.clone() else {
            return Err(LedgerError::Conflict(format!(
                "player {player_id} is not in a team"
            )));
        };
        let mut player = (*guard).clone();
        let mut change = MembershipChange::default();
        self.detach(&mut player, &mut change)?;
        let deleted = change.delete_teams.contains(&team_id);
        change.players.push(player);
        self.apply_change(&mut guard, change).await?;
        info!(player_id, team_id = %team_id, deleted, "team left");
        if deleted {
            return Ok(None);
        }
        self.team_snapshot(&team_id).map(Some)
    }

    /// Remove `player` from its current team (if any), recording the profile edit.
    fn detach(&self, player: &mut PlayerAggregate, change: &mut MembershipChange) -> Result<()> {
        let Some(team_id) = player.team_id.take() else {
            return Ok(());
        };
        let mut profile = self.team_snapshot(&team_id)?.profile;
        profile.members.retain(|member| member != &player.player_id);
        if profile.members.is_empty() {
            change.delete_teams.push(team_id);
            return Ok(());
        }
        if profile.owner_id == player.player_id {
            profile.owner_id = profile.members[0].clone();
            info!(team_id = %team_id, owner_id = %profile.owner_id, "team ownership transferred");
        }
        change.upsert_teams.push(profile);
        Ok(())
    }

    async fn apply_change(&self, guard: &mut PlayerGuard, change: MembershipChange) -> Result<()> {
        for profile in &change.upsert_teams {
            profile
                .validate_invariants()
                .map_err(|err| LedgerError::InvariantViolation(err.to_string()))?;
        }
        self.store()
            .apply_membership(&change)
            .await
            .map_err(|err| persistence(err, "apply membership"))?;

        for profile in change.upsert_teams {
            match self.team_slot(&profile.team_id) {
                Ok(slot) => lock(&slot, "team").profile = profile,
                Err(_) => self.insert_team(TeamAggregate::new(profile)),
            }
        }
        for team_id in &change.delete_teams {
            self.remove_team(team_id);
        }
        for player in change.players {
            if player.player_id == guard.player_id {
                **guard = player;
            }
        }
        Ok(())
    }
}
