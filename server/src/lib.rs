//! HTTP and WebSocket front end for the slot floor.
//!
//! [`Server`] owns the ledger (over SQLite), the play orchestrator and the notification
//! channel; [`Api`] exposes them through axum.

use anyhow::Context;
use slotfloor_execution::{Ledger, OutcomeEngine, PlayOrchestrator, ProbabilityTables, ReelSet};
use slotfloor_types::api::PlayNotification;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

mod api;
pub use api::Api;

mod config;
pub use config::ServerConfig;

mod metrics;
pub use metrics::{HttpMetrics, MetricsSnapshot, WsMetrics};

mod persistence;
pub use persistence::SqliteStore;

pub struct Server {
    pub config: ServerConfig,
    ledger: Arc<Ledger<SqliteStore>>,
    orchestrator: PlayOrchestrator<SqliteStore>,
    updates: broadcast::Sender<PlayNotification>,
    http_metrics: HttpMetrics,
    ws_metrics: WsMetrics,
}

impl Server {
    pub async fn open(config: ServerConfig) -> anyhow::Result<Arc<Self>> {
        let store = match &config.database_path {
            Some(path) => SqliteStore::open(path)?,
            None => {
                warn!("no database path configured; balances will not survive a restart");
                SqliteStore::open_in_memory()?
            }
        };
        let tables = match &config.probability_table_path {
            Some(path) => {
                let tables = ProbabilityTables::load(path)
                    .with_context(|| format!("load probability table {}", path.display()))?;
                info!(
                    path = %path.display(),
                    levels = ?tables.populated_levels(),
                    "probability table loaded"
                );
                tables
            }
            None => ProbabilityTables::reference(),
        };
        let engine = OutcomeEngine::new(ReelSet::reference(), tables);
        let ledger = Ledger::open(store, config.retry_policy()).await?;
        ledger
            .global_snapshot()
            .await
            .context("initialize global aggregate")?;

        let (updates, _) = broadcast::channel(config.updates_broadcast_capacity());
        let orchestrator = PlayOrchestrator::new(engine, Arc::clone(&ledger), config.seed_source())
            .with_sink(Arc::new(updates.clone()))
            .with_max_history_page(config.history_page_limit());
        Ok(Arc::new(Self {
            config,
            ledger,
            orchestrator,
            updates,
            http_metrics: HttpMetrics::default(),
            ws_metrics: WsMetrics::default(),
        }))
    }

    pub fn ledger(&self) -> &Arc<Ledger<SqliteStore>> {
        &self.ledger
    }

    pub fn orchestrator(&self) -> &PlayOrchestrator<SqliteStore> {
        &self.orchestrator
    }

    pub fn update_subscriber(&self) -> broadcast::Receiver<PlayNotification> {
        self.updates.subscribe()
    }

    pub fn http_metrics(&self) -> &HttpMetrics {
        &self.http_metrics
    }

    pub fn ws_metrics(&self) -> &WsMetrics {
        &self.ws_metrics
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            http: self.http_metrics.snapshot(),
            ws: self.ws_metrics.snapshot(),
            persistence: self.ledger.persistence_snapshot(),
            invariant_violations: self.orchestrator.invariant_violations(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[tokio::test]
    async fn plays_reach_update_subscribers() {
        let server = Server::open(ServerConfig {
            deterministic_seed: Some(4),
            ..ServerConfig::for_tests()
        })
        .await
        .unwrap();
        server.ledger().register("alice", "Alice", None).await.unwrap();
        let mut updates = server.update_subscriber();

        let response = server.orchestrator().play("alice", None).await.unwrap();
        let notification = updates.recv().await.unwrap();
        assert_eq!(notification.player_id, "alice");
        assert_eq!(notification.delta, response.delta);
        assert_eq!(server.metrics_snapshot().persistence.commits, 1);
    }

    #[tokio::test]
    async fn custom_probability_table_is_used() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "levels:\n  1:\n    - outcome: BELL\n      probability: 0.999999\n"
        )
        .unwrap();
        let server = Server::open(ServerConfig {
            probability_table_path: Some(file.path().to_path_buf()),
            deterministic_seed: Some(1),
            ..ServerConfig::for_tests()
        })
        .await
        .unwrap();
        server.ledger().register("alice", "Alice", None).await.unwrap();
        let mut bells = 0;
        for _ in 0..20 {
            if server.orchestrator().play("alice", None).await.unwrap().payout == 14 {
                bells += 1;
            }
        }
        assert!(bells >= 19, "bells = {bells}");
    }

    #[tokio::test]
    async fn invalid_probability_table_fails_startup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "levels:\n  9:\n    - outcome: BELL\n      probability: 0.5\n").unwrap();
        let result = Server::open(ServerConfig {
            probability_table_path: Some(file.path().to_path_buf()),
            ..ServerConfig::for_tests()
        })
        .await;
        assert!(result.is_err());
    }
}
