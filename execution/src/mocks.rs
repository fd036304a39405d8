//! Builders for ledgers and orchestrators over the in-memory store.

use crate::backoff::RetryPolicy;
use crate::engine::OutcomeEngine;
use crate::ledger::Ledger;
use crate::orchestrator::PlayOrchestrator;
use crate::rng::SeedSource;
use crate::store::Memory;
use std::sync::Arc;
use std::time::Duration;

/// Retries quickly so failure tests stay fast.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(2),
    }
}

pub async fn create_ledger() -> Arc<Ledger<Memory>> {
    Ledger::open(Memory::default(), fast_retry())
        .await
        .expect("memory ledger opens")
}

/// A ledger with each of `player_ids` registered at the base setting.
pub async fn create_ledger_with_players(player_ids: &[&str]) -> Arc<Ledger<Memory>> {
    let ledger = create_ledger().await;
    for player_id in player_ids {
        ledger
            .register(player_id, player_id, None)
            .await
            .expect("player registers");
    }
    ledger
}

/// Reference reels and tables with a fixed seed.
pub fn create_orchestrator(ledger: Arc<Ledger<Memory>>, seed: u64) -> PlayOrchestrator<Memory> {
    PlayOrchestrator::new(OutcomeEngine::default(), ledger, SeedSource::Deterministic(seed))
}
