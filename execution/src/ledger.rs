//! Balance ledger: folds play deltas into the player, team and global aggregates.
//!
//! ## Commit protocol
//! 1. The caller holds the player's owned lock for the whole play.
//! 2. The commit runs on its own task so that dropping the caller cannot split it.
//! 3. Under the shared commit gate, the commit is persisted (with retries) and only then
//!    folded into memory. A final persistence failure leaves memory untouched.
//!
//! Team and global snapshots sit behind short-lived `std` mutexes, held only while one
//! delta is applied. Period resets on those aggregates take the commit gate exclusively
//! so storage and memory agree on which deltas a reset erased.

use crate::backoff::RetryPolicy;
use crate::error::{LedgerError, Result};
use crate::now_ms;
use crate::store::{PlayCommit, Store};
use serde::Serialize;
use slotfloor_types::{BalanceSnapshot, GlobalAggregate, PlayerAggregate, TeamAggregate};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{OnceCell, OwnedMutexGuard};
use tracing::{error, info, warn};

pub type PlayerSlot = Arc<tokio::sync::Mutex<PlayerAggregate>>;
pub type PlayerGuard = OwnedMutexGuard<PlayerAggregate>;
pub(crate) type TeamSlot = Arc<Mutex<TeamAggregate>>;

/// Balances after a commit was folded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommittedBalances {
    pub player: BalanceSnapshot,
    pub team: Option<BalanceSnapshot>,
    pub global: BalanceSnapshot,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PersistenceSnapshot {
    pub commits: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Default)]
struct PersistenceMetrics {
    commits: AtomicU64,
    retries: AtomicU64,
    failures: AtomicU64,
}

pub(crate) fn lock<'a, T>(mutex: &'a Mutex<T>, what: &'static str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(what, "lock poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

fn read<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(what, "lock poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

fn write<'a, T>(lock: &'a RwLock<T>, what: &'static str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(what, "lock poisoned; recovering");
            poisoned.into_inner()
        }
    }
}

pub(crate) fn persistence(err: anyhow::Error, action: &'static str) -> LedgerError {
    LedgerError::Persistence(err.context(action))
}

pub struct Ledger<S: Store> {
    store: S,
    players: RwLock<HashMap<String, PlayerSlot>>,
    teams: RwLock<HashMap<String, TeamSlot>>,
    global: OnceCell<Mutex<GlobalAggregate>>,
    commit_gate: tokio::sync::RwLock<()>,
    /// Serializes registration and membership changes.
    pub(crate) membership: tokio::sync::Mutex<()>,
    retry: RetryPolicy,
    metrics: PersistenceMetrics,
}

impl<S: Store> Ledger<S> {
    /// Hydrate players and teams from `store`. The global aggregate is loaded (or created)
    /// on first use.
    pub async fn open(store: S, retry: RetryPolicy) -> anyhow::Result<Arc<Self>> {
        let players = store.load_players().await?;
        let teams = store.load_teams().await?;
        info!(
            players = players.len(),
            teams = teams.len(),
            "ledger hydrated"
        );
        let players = players
            .into_iter()
            .map(|player| {
                (
                    player.player_id.clone(),
                    Arc::new(tokio::sync::Mutex::new(player)),
                )
            })
            .collect();
        let teams = teams
            .into_iter()
            .map(|team| (team.profile.team_id.clone(), Arc::new(Mutex::new(team))))
            .collect();
        Ok(Arc::new(Self {
            store,
            players: RwLock::new(players),
            teams: RwLock::new(teams),
            global: OnceCell::new(),
            commit_gate: tokio::sync::RwLock::new(()),
            membership: tokio::sync::Mutex::new(()),
            retry,
            metrics: PersistenceMetrics::default(),
        }))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn persistence_snapshot(&self) -> PersistenceSnapshot {
        PersistenceSnapshot {
            commits: self.metrics.commits.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
            failures: self.metrics.failures.load(Ordering::Relaxed),
        }
    }

    pub fn player_slot(&self, player_id: &str) -> Result<PlayerSlot> {
        read(&self.players, "players")
            .get(player_id)
            .cloned()
            .ok_or_else(|| LedgerError::player_not_found(player_id))
    }

    pub(crate) fn player_slots(&self) -> Vec<PlayerSlot> {
        read(&self.players, "players").values().cloned().collect()
    }

    pub(crate) fn contains_player(&self, player_id: &str) -> bool {
        read(&self.players, "players").contains_key(player_id)
    }

    pub(crate) fn insert_player(&self, player: PlayerAggregate) {
        write(&self.players, "players").insert(
            player.player_id.clone(),
            Arc::new(tokio::sync::Mutex::new(player)),
        );
    }

    pub(crate) fn team_slot(&self, team_id: &str) -> Result<TeamSlot> {
        read(&self.teams, "teams")
            .get(team_id)
            .cloned()
            .ok_or_else(|| LedgerError::team_not_found(team_id))
    }

    pub(crate) fn team_slots(&self) -> Vec<TeamSlot> {
        read(&self.teams, "teams").values().cloned().collect()
    }

    pub(crate) fn insert_team(&self, team: TeamAggregate) {
        write(&self.teams, "teams")
            .insert(team.profile.team_id.clone(), Arc::new(Mutex::new(team)));
    }

    pub(crate) fn remove_team(&self, team_id: &str) {
        write(&self.teams, "teams").remove(team_id);
    }

    pub async fn player_snapshot(&self, player_id: &str) -> Result<PlayerAggregate> {
        let slot = self.player_slot(player_id)?;
        let player = slot.lock().await;
        Ok(player.clone())
    }

    pub fn team_snapshot(&self, team_id: &str) -> Result<TeamAggregate> {
        let slot = self.team_slot(team_id)?;
        let team = lock(&slot, "team");
        Ok(team.clone())
    }

    pub(crate) async fn global(&self) -> Result<&Mutex<GlobalAggregate>> {
        self.global
            .get_or_try_init(|| async {
                let global = match self
                    .store
                    .load_global()
                    .await
                    .map_err(|err| persistence(err, "load global aggregate"))?
                {
                    Some(global) => global,
                    None => {
                        let global = GlobalAggregate::new(now_ms());
                        self.store
                            .create_global(&global)
                            .await
                            .map_err(|err| persistence(err, "create global aggregate"))?;
                        info!("global aggregate created");
                        global
                    }
                };
                Ok::<_, LedgerError>(Mutex::new(global))
            })
            .await
    }

    pub async fn global_snapshot(&self) -> Result<GlobalAggregate> {
        let global = self.global().await?;
        let snapshot = lock(global, "global").clone();
        Ok(snapshot)
    }

    /// Apply a bare balance adjustment to a player, its team and the global aggregate.
    pub async fn propagate(
        self: &Arc<Self>,
        player_id: &str,
        delta: i64,
    ) -> Result<CommittedBalances> {
        let slot = self.player_slot(player_id)?;
        let guard = slot.lock_owned().await;
        let mut player = (*guard).clone();
        player.balance.apply_delta(delta)?;
        let commit = PlayCommit {
            team_id: player.team_id.clone(),
            player,
            delta,
            plays: 0,
            bonus: None,
        };
        self.commit(guard, commit).await
    }

    /// Persist `commit` and fold it into memory, releasing the player lock afterwards.
    ///
    /// `commit.player` must already carry the new player balance and history; the team and
    /// global aggregates receive `commit.delta`.
    pub async fn commit(
        self: &Arc<Self>,
        guard: PlayerGuard,
        commit: PlayCommit,
    ) -> Result<CommittedBalances> {
        let ledger = Arc::clone(self);
        tokio::spawn(async move {
            let global = ledger.global().await?;
            let _gate = ledger.commit_gate.read().await;
            ledger.check_headroom(global, &commit)?;
            ledger.persist_with_retry(&commit).await?;
            Ok(ledger.fold(guard, global, commit))
        })
        .await
        .map_err(|err| LedgerError::InvariantViolation(format!("commit task failed: {err}")))?
    }

    fn check_headroom(&self, global: &Mutex<GlobalAggregate>, commit: &PlayCommit) -> Result<()> {
        if let Some(team_id) = &commit.team_id {
            let slot = self.team_slot(team_id)?;
            lock(&slot, "team")
                .balance
                .checked_apply(commit.delta)
                .ok_or_else(|| {
                    LedgerError::Validation(format!("team {team_id} balance overflow"))
                })?;
        }
        lock(global, "global")
            .balance
            .checked_apply(commit.delta)
            .ok_or_else(|| LedgerError::Validation("global balance overflow".to_string()))?;
        Ok(())
    }

    async fn persist_with_retry(&self, commit: &PlayCommit) -> Result<()> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.store.commit_play(commit).await {
                Ok(()) => {
                    self.metrics.commits.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(err) if attempt < attempts => {
                    self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        player_id = %commit.player.player_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "commit failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                    error!(
                        player_id = %commit.player.player_id,
                        attempts,
                        error = %err,
                        "commit abandoned; in-memory state unchanged"
                    );
                    return Err(persistence(err, "commit play"));
                }
            }
        }
    }

    fn fold(
        &self,
        mut guard: PlayerGuard,
        global: &Mutex<GlobalAggregate>,
        commit: PlayCommit,
    ) -> CommittedBalances {
        let team = commit.team_id.as_deref().and_then(|team_id| {
            let slot = match self.team_slot(team_id) {
                Ok(slot) => slot,
                Err(_) => {
                    error!(team_id, "team missing while folding a persisted commit");
                    return None;
                }
            };
            let mut team = lock(&slot, "team");
            if let Err(err) = team.balance.apply_delta(commit.delta) {
                error!(team_id, %err, "team balance not folded");
            }
            Some(team.balance)
        });
        let global = {
            let mut global = lock(global, "global");
            if let Err(err) = global.balance.apply_delta(commit.delta) {
                error!(%err, "global balance not folded");
            }
            global.total_plays += commit.plays;
            if let Some(kind) = commit.bonus {
                global.record_bonus(kind);
            }
            global.balance
        };
        *guard = commit.player;
        CommittedBalances {
            player: guard.balance,
            team,
            global,
        }
    }

    /// Write a player record outside of a play (settings, period resets).
    pub(crate) async fn save_player(
        &self,
        guard: &mut PlayerGuard,
        player: PlayerAggregate,
    ) -> Result<()> {
        self.store
            .save_player(&player)
            .await
            .map_err(|err| persistence(err, "save player"))?;
        **guard = player;
        Ok(())
    }

    pub(crate) async fn reset_team_period(&self, team_id: &str) -> Result<BalanceSnapshot> {
        let slot = self.team_slot(team_id)?;
        let _gate = self.commit_gate.write().await;
        let now = now_ms();
        self.store
            .reset_team_period(team_id, now)
            .await
            .map_err(|err| persistence(err, "reset team period"))?;
        let mut team = lock(&slot, "team");
        team.balance.reset_period(now);
        Ok(team.balance)
    }

    pub(crate) async fn reset_global_period(&self) -> Result<BalanceSnapshot> {
        let global = self.global().await?;
        let _gate = self.commit_gate.write().await;
        let now = now_ms();
        self.store
            .reset_global_period(now)
            .await
            .map_err(|err| persistence(err, "reset global period"))?;
        let mut global = lock(global, "global");
        global.balance.reset_period(now);
        Ok(global.balance)
    }
}
