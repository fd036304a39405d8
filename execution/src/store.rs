//! Storage seam for the ledger.
//!
//! The ledger persists first and folds into memory second, so a store must make each
//! call all-or-nothing. Team and global balances are only ever moved by additive updates
//! (`commit_play`) or explicit resets, never overwritten with a value computed in memory.

use anyhow::Result;
use slotfloor_types::{BonusKind, GlobalAggregate, PlayerAggregate, TeamAggregate, TeamProfile};
use std::future::Future;

#[cfg(any(test, feature = "mocks"))]
use anyhow::{anyhow, Context as _};
#[cfg(any(test, feature = "mocks"))]
use std::collections::HashMap;
#[cfg(any(test, feature = "mocks"))]
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Mutex,
};

/// Everything one committed play (or balance adjustment) changes.
#[derive(Clone, Debug, PartialEq)]
pub struct PlayCommit {
    /// The player record after the play, written whole.
    pub player: PlayerAggregate,
    /// Team credited with `delta`, if the player belongs to one.
    pub team_id: Option<String>,
    pub delta: i64,
    /// Plays added to the global counter (0 for a bare adjustment).
    pub plays: u64,
    pub bonus: Option<BonusKind>,
}

/// Records touched by one membership operation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MembershipChange {
    pub players: Vec<PlayerAggregate>,
    /// Inserted with a zero balance when new; otherwise only the profile is replaced.
    pub upsert_teams: Vec<TeamProfile>,
    pub delete_teams: Vec<String>,
}

pub trait Store: Send + Sync + 'static {
    fn load_players(&self) -> impl Future<Output = Result<Vec<PlayerAggregate>>> + Send;
    fn load_teams(&self) -> impl Future<Output = Result<Vec<TeamAggregate>>> + Send;
    fn load_global(&self) -> impl Future<Output = Result<Option<GlobalAggregate>>> + Send;
    fn create_global(&self, global: &GlobalAggregate) -> impl Future<Output = Result<()>> + Send;

    /// Insert a new player and count it in the global aggregate.
    fn create_player(&self, player: &PlayerAggregate) -> impl Future<Output = Result<()>> + Send;
    fn save_player(&self, player: &PlayerAggregate) -> impl Future<Output = Result<()>> + Send;
    fn apply_membership(
        &self,
        change: &MembershipChange,
    ) -> impl Future<Output = Result<()>> + Send;
    fn commit_play(&self, commit: &PlayCommit) -> impl Future<Output = Result<()>> + Send;
    fn reset_team_period(
        &self,
        team_id: &str,
        started_at: u64,
    ) -> impl Future<Output = Result<()>> + Send;
    fn reset_global_period(&self, started_at: u64) -> impl Future<Output = Result<()>> + Send;
}

#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
struct MemoryState {
    players: HashMap<String, PlayerAggregate>,
    teams: HashMap<String, TeamAggregate>,
    global: Option<GlobalAggregate>,
}

/// In-memory store with failure injection for tests.
#[cfg(any(test, feature = "mocks"))]
#[derive(Default)]
pub struct Memory {
    state: Mutex<MemoryState>,
    fail_commits: AtomicU32,
    commits: AtomicU64,
}

#[cfg(any(test, feature = "mocks"))]
impl Memory {
    /// Make the next `count` calls to `commit_play` fail.
    pub fn fail_next_commits(&self, count: u32) {
        self.fail_commits.store(count, Ordering::SeqCst);
    }

    /// Successful `commit_play` calls so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn player(&self, player_id: &str) -> Option<PlayerAggregate> {
        self.lock().ok()?.players.get(player_id).cloned()
    }

    pub fn team(&self, team_id: &str) -> Option<TeamAggregate> {
        self.lock().ok()?.teams.get(team_id).cloned()
    }

    pub fn global(&self) -> Option<GlobalAggregate> {
        self.lock().ok()?.global.clone()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| anyhow!("memory store poisoned"))
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

#[cfg(any(test, feature = "mocks"))]
impl Store for Memory {
    async fn load_players(&self) -> Result<Vec<PlayerAggregate>> {
        Ok(self.lock()?.players.values().cloned().collect())
    }

    async fn load_teams(&self) -> Result<Vec<TeamAggregate>> {
        Ok(self.lock()?.teams.values().cloned().collect())
    }

    async fn load_global(&self) -> Result<Option<GlobalAggregate>> {
        Ok(self.lock()?.global.clone())
    }

    async fn create_global(&self, global: &GlobalAggregate) -> Result<()> {
        let mut state = self.lock()?;
        if state.global.is_none() {
            state.global = Some(global.clone());
        }
        Ok(())
    }

    async fn create_player(&self, player: &PlayerAggregate) -> Result<()> {
        let mut state = self.lock()?;
        if state.players.contains_key(&player.player_id) {
            return Err(anyhow!("player {} already stored", player.player_id));
        }
        let global = state.global.as_mut().context("global aggregate missing")?;
        global.total_players += 1;
        state.players.insert(player.player_id.clone(), player.clone());
        Ok(())
    }

    async fn save_player(&self, player: &PlayerAggregate) -> Result<()> {
        self.lock()?
            .players
            .insert(player.player_id.clone(), player.clone());
        Ok(())
    }

    async fn apply_membership(&self, change: &MembershipChange) -> Result<()> {
        let mut state = self.lock()?;
        for player in &change.players {
            state.players.insert(player.player_id.clone(), player.clone());
        }
        for profile in &change.upsert_teams {
            match state.teams.get_mut(&profile.team_id) {
                Some(team) => team.profile = profile.clone(),
                None => {
                    state
                        .teams
                        .insert(profile.team_id.clone(), TeamAggregate::new(profile.clone()));
                }
            }
        }
        for team_id in &change.delete_teams {
            state.teams.remove(team_id);
        }
        Ok(())
    }

    async fn commit_play(&self, commit: &PlayCommit) -> Result<()> {
        if self.take_injected_failure() {
            return Err(anyhow!("injected commit failure"));
        }
        let mut state = self.lock()?;
        let team_balance = match &commit.team_id {
            Some(team_id) => {
                let team = state
                    .teams
                    .get(team_id)
                    .with_context(|| format!("team {team_id} missing"))?;
                Some(team.balance.checked_apply(commit.delta).context("team balance overflow")?)
            }
            None => None,
        };
        let global = state.global.as_mut().context("global aggregate missing")?;
        global.balance.apply_delta(commit.delta)?;
        global.total_plays += commit.plays;
        if let Some(kind) = commit.bonus {
            global.record_bonus(kind);
        }
        if let (Some(team_id), Some(balance)) = (&commit.team_id, team_balance) {
            if let Some(team) = state.teams.get_mut(team_id) {
                team.balance = balance;
            }
        }
        state
            .players
            .insert(commit.player.player_id.clone(), commit.player.clone());
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reset_team_period(&self, team_id: &str, started_at: u64) -> Result<()> {
        let mut state = self.lock()?;
        let team = state
            .teams
            .get_mut(team_id)
            .with_context(|| format!("team {team_id} missing"))?;
        team.balance.reset_period(started_at);
        Ok(())
    }

    async fn reset_global_period(&self, started_at: u64) -> Result<()> {
        let mut state = self.lock()?;
        let global = state.global.as_mut().context("global aggregate missing")?;
        global.balance.reset_period(started_at);
        Ok(())
    }
}
