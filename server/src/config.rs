use slotfloor_execution::{RetryPolicy, SeedSource};
use slotfloor_types::slot::HISTORY_LIMIT;
use std::path::PathBuf;
use std::time::Duration;

pub(crate) const DEFAULT_HISTORY_PAGE_LIMIT: usize = HISTORY_LIMIT;
pub(crate) const DEFAULT_RANKING_LIMIT_CAP: usize = 500;
const DEFAULT_PERSISTENCE_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_PERSISTENCE_RETRY_BACKOFF_MS: u64 = 25;
const MAX_PERSISTENCE_RETRY_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_HTTP_RATE_LIMIT_PER_SECOND: u64 = 1_000;
const DEFAULT_HTTP_RATE_LIMIT_BURST: u32 = 5_000;
const DEFAULT_PLAY_RATE_LIMIT_PER_MINUTE: u64 = 600;
const DEFAULT_PLAY_RATE_LIMIT_BURST: u32 = 20;
const DEFAULT_HTTP_BODY_LIMIT_BYTES: usize = 64 * 1024;
const DEFAULT_UPDATES_BROADCAST_BUFFER: usize = 1_024;
const DEFAULT_WS_OUTBOUND_BUFFER: usize = 256;
const DEFAULT_WS_MAX_MESSAGE_BYTES: usize = 64 * 1024;
const DEFAULT_WS_SEND_TIMEOUT_MS: u64 = 2_000;

/// Runtime settings. `None` limits are disabled; `None` buffers fall back to defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// In-memory database when unset.
    pub database_path: Option<PathBuf>,
    /// Built-in reference table when unset.
    pub probability_table_path: Option<PathBuf>,
    pub deterministic_seed: Option<u64>,
    pub history_page_limit: Option<usize>,
    pub ranking_limit: Option<usize>,
    pub persistence_retry_attempts: Option<u32>,
    pub persistence_retry_backoff_ms: Option<u64>,
    pub http_rate_limit_per_second: Option<u64>,
    pub http_rate_limit_burst: Option<u32>,
    pub play_rate_limit_per_minute: Option<u64>,
    pub play_rate_limit_burst: Option<u32>,
    pub http_body_limit_bytes: Option<usize>,
    pub updates_broadcast_buffer: Option<usize>,
    pub ws_outbound_buffer: Option<usize>,
    pub ws_max_message_bytes: Option<usize>,
    pub ws_send_timeout_ms: Option<u64>,
    /// Required on global period resets when set; global resets are refused otherwise.
    pub admin_token: Option<String>,
    /// Guards `/metrics/*` when set.
    pub metrics_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            probability_table_path: None,
            deterministic_seed: None,
            history_page_limit: Some(DEFAULT_HISTORY_PAGE_LIMIT),
            ranking_limit: Some(DEFAULT_RANKING_LIMIT_CAP),
            persistence_retry_attempts: Some(DEFAULT_PERSISTENCE_RETRY_ATTEMPTS),
            persistence_retry_backoff_ms: Some(DEFAULT_PERSISTENCE_RETRY_BACKOFF_MS),
            http_rate_limit_per_second: Some(DEFAULT_HTTP_RATE_LIMIT_PER_SECOND),
            http_rate_limit_burst: Some(DEFAULT_HTTP_RATE_LIMIT_BURST),
            play_rate_limit_per_minute: Some(DEFAULT_PLAY_RATE_LIMIT_PER_MINUTE),
            play_rate_limit_burst: Some(DEFAULT_PLAY_RATE_LIMIT_BURST),
            http_body_limit_bytes: Some(DEFAULT_HTTP_BODY_LIMIT_BYTES),
            updates_broadcast_buffer: Some(DEFAULT_UPDATES_BROADCAST_BUFFER),
            ws_outbound_buffer: Some(DEFAULT_WS_OUTBOUND_BUFFER),
            ws_max_message_bytes: Some(DEFAULT_WS_MAX_MESSAGE_BYTES),
            ws_send_timeout_ms: Some(DEFAULT_WS_SEND_TIMEOUT_MS),
            admin_token: None,
            metrics_token: None,
        }
    }
}

impl ServerConfig {
    /// No rate limits, so in-process requests without a peer address get through.
    pub fn for_tests() -> Self {
        Self {
            http_rate_limit_per_second: None,
            http_rate_limit_burst: None,
            play_rate_limit_per_minute: None,
            play_rate_limit_burst: None,
            ..Self::default()
        }
    }

    pub fn history_page_limit(&self) -> usize {
        self.history_page_limit
            .unwrap_or(HISTORY_LIMIT)
            .clamp(1, HISTORY_LIMIT)
    }

    /// Unlimited when disabled.
    pub fn ranking_limit(&self) -> usize {
        self.ranking_limit.unwrap_or(usize::MAX).max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        let initial_backoff = self
            .persistence_retry_backoff_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.initial_backoff);
        RetryPolicy {
            attempts: self
                .persistence_retry_attempts
                .unwrap_or(defaults.attempts)
                .max(1),
            initial_backoff,
            max_backoff: MAX_PERSISTENCE_RETRY_BACKOFF.max(initial_backoff),
        }
    }

    pub fn seed_source(&self) -> SeedSource {
        match self.deterministic_seed {
            Some(seed) => SeedSource::Deterministic(seed),
            None => SeedSource::Entropy,
        }
    }

    pub fn updates_broadcast_capacity(&self) -> usize {
        self.updates_broadcast_buffer
            .unwrap_or(DEFAULT_UPDATES_BROADCAST_BUFFER)
            .max(1)
    }

    pub fn ws_outbound_capacity(&self) -> usize {
        self.ws_outbound_buffer
            .unwrap_or(DEFAULT_WS_OUTBOUND_BUFFER)
            .max(1)
    }

    pub fn ws_max_message_bytes(&self) -> usize {
        self.ws_max_message_bytes
            .unwrap_or(DEFAULT_WS_MAX_MESSAGE_BYTES)
            .max(1)
    }

    pub fn ws_send_timeout(&self) -> Duration {
        Duration::from_millis(
            self.ws_send_timeout_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_WS_SEND_TIMEOUT_MS),
        )
    }
}
