//! One play end to end: spin, derive the delta, commit it, tell everyone.

use crate::engine::OutcomeEngine;
use crate::error::{LedgerError, Result};
use crate::ledger::Ledger;
use crate::now_ms;
use crate::rng::{GameRng, SeedSource};
use crate::roster::validate_setting;
use crate::store::{PlayCommit, Store};
use slotfloor_types::api::{HistoryPage, PlayNotification, PlayResponse};
use slotfloor_types::slot::{BET, DEFAULT_HISTORY_PAGE, HISTORY_LIMIT};
use slotfloor_types::PlayHistoryEntry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Receives a notification for every committed play.
pub trait PlaySink: Send + Sync {
    fn publish(&self, notification: PlayNotification);
}

impl PlaySink for broadcast::Sender<PlayNotification> {
    fn publish(&self, notification: PlayNotification) {
        // No subscribers is not an error.
        if self.send(notification).is_err() {
            debug!("play notification dropped; no subscribers");
        }
    }
}

pub struct PlayOrchestrator<S: Store> {
    engine: OutcomeEngine,
    ledger: Arc<Ledger<S>>,
    seeds: SeedSource,
    sink: Option<Arc<dyn PlaySink>>,
    max_history_page: usize,
    invariant_violations: AtomicU64,
}

impl<S: Store> PlayOrchestrator<S> {
    pub fn new(engine: OutcomeEngine, ledger: Arc<Ledger<S>>, seeds: SeedSource) -> Self {
        Self {
            engine,
            ledger,
            seeds,
            sink: None,
            max_history_page: HISTORY_LIMIT,
            invariant_violations: AtomicU64::new(0),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn PlaySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Clamped to the retained history.
    pub fn with_max_history_page(mut self, limit: usize) -> Self {
        self.max_history_page = limit.clamp(1, HISTORY_LIMIT);
        self
    }

    pub fn engine(&self) -> &OutcomeEngine {
        &self.engine
    }

    pub fn ledger(&self) -> &Arc<Ledger<S>> {
        &self.ledger
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    /// Play once. `setting` overrides the player's stored level for this play only.
    ///
    /// Nothing is mutated until the ledger commit starts; once it starts it runs to
    /// completion even if this future is dropped.
    pub async fn play(&self, player_id: &str, setting: Option<u8>) -> Result<PlayResponse> {
        let setting = setting.map(validate_setting).transpose()?;
        let guard = self.ledger.player_slot(player_id)?.lock_owned().await;
        let level = setting.unwrap_or(guard.setting);
        let sequence = guard.next_sequence();
        let mut rng = GameRng::new(&self.seeds.material(), player_id, sequence);
        let spin = self.engine.spin(level, &mut rng);
        if !spin.violations.is_empty() {
            self.invariant_violations
                .fetch_add(spin.violations.len() as u64, Ordering::Relaxed);
        }

        let payout = spin.judge.payout;
        let delta = i64::try_from(payout)
            .ok()
            .and_then(|payout| payout.checked_sub(BET as i64))
            .ok_or_else(|| {
                LedgerError::InvariantViolation(format!("payout {payout} out of range"))
            })?;

        let mut player = (*guard).clone();
        player.balance.apply_delta(delta)?;
        player.record_play(PlayHistoryEntry {
            sequence,
            outcome: spin.outcome,
            payout,
            bet: BET,
            delta,
            balance: player.balance.total,
            is_win: payout > 0,
            is_bonus: spin.outcome.is_bonus(),
            timestamp: now_ms(),
        });
        let commit = PlayCommit {
            team_id: player.team_id.clone(),
            player,
            delta,
            plays: 1,
            bonus: spin.outcome.bonus(),
        };
        let balances = self.ledger.commit(guard, commit).await?;

        info!(
            player_id,
            sequence,
            level,
            outcome = %spin.outcome,
            payout,
            delta,
            "slot.play"
        );
        if let Some(sink) = &self.sink {
            sink.publish(PlayNotification {
                player_id: player_id.to_string(),
                outcome_label: spin.outcome,
                payout,
                delta,
                player_balance: balances.player.into(),
                team_balance: balances.team.map(Into::into),
                global_balance: balances.global.into(),
            });
        }
        Ok(PlayResponse {
            outcome_label: spin.outcome,
            reel_positions: spin.stops,
            payout,
            delta,
            player_balance: balances.player.into(),
            team_balance: balances.team.map(Into::into),
            judge: spin.judge,
            play_sequence_number: sequence,
        })
    }

    /// Newest entries first.
    pub async fn get_history(
        &self,
        player_id: &str,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<HistoryPage> {
        let limit = limit.unwrap_or(DEFAULT_HISTORY_PAGE.min(self.max_history_page));
        if limit == 0 || limit > self.max_history_page {
            return Err(LedgerError::Validation(format!(
                "limit must be within 1..={}",
                self.max_history_page
            )));
        }
        let offset = offset.unwrap_or(0);
        let player = self.ledger.player_snapshot(player_id).await?;
        let entries = player
            .history
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok(HistoryPage {
            entries,
            total_count: player.history.len(),
            limit,
            offset,
        })
    }
}
