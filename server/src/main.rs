use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use slotfloor_server::{Api, Server, ServerConfig};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SERVICE_NAME: &str = "slotfloor-server";

fn non_empty_env(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn sampling_rate() -> f64 {
    non_empty_env("OTEL_SAMPLING_RATE")
        .and_then(|value| value.parse::<f64>().ok())
        .map(|value| value.clamp(0.0, 1.0))
        .unwrap_or(1.0)
}

fn init_tracing() -> Result<()> {
    let Some(endpoint) = non_empty_env("OTEL_EXPORTER_OTLP_ENDPOINT") else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
        return Ok(());
    };

    let service_name =
        non_empty_env("OTEL_SERVICE_NAME").unwrap_or_else(|| SERVICE_NAME.to_string());
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .context("failed to build OTLP exporter")?;
    let resource = opentelemetry_sdk::Resource::builder_empty()
        .with_attributes([opentelemetry::KeyValue::new("service.name", service_name)])
        .build();
    let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
        .with_sampler(opentelemetry_sdk::trace::Sampler::TraceIdRatioBased(sampling_rate()))
        .with_resource(resource)
        .with_batch_exporter(exporter)
        .build();
    let tracer = tracer_provider.tracer(SERVICE_NAME);
    opentelemetry::global::set_tracer_provider(tracer_provider);

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(LevelFilter::INFO))
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .init();
    Ok(())
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Path to the SQLite database (in-memory when omitted).
    #[arg(long)]
    database_path: Option<PathBuf>,

    /// YAML probability table (built-in reference table when omitted).
    #[arg(long)]
    probability_table: Option<PathBuf>,

    /// Seed for reproducible plays (optional).
    #[arg(long)]
    deterministic_seed: Option<u64>,

    /// Maximum history page size (0 uses default).
    #[arg(long)]
    history_page_limit: Option<usize>,

    /// Maximum ranking size (0 disables limit).
    #[arg(long)]
    ranking_limit: Option<usize>,

    /// Persistence attempts per commit before giving up (0 uses default).
    #[arg(long)]
    persistence_retry_attempts: Option<u32>,

    /// Initial backoff between persistence attempts in milliseconds (0 uses default).
    #[arg(long)]
    persistence_retry_backoff_ms: Option<u64>,

    /// HTTP rate limit per IP in requests per second (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_per_second: Option<u64>,

    /// HTTP rate limit burst size (0 disables rate limiting).
    #[arg(long)]
    http_rate_limit_burst: Option<u32>,

    /// Play endpoint rate limit per IP in requests per minute (0 disables).
    #[arg(long)]
    play_rate_limit_per_minute: Option<u64>,

    /// Play endpoint rate limit burst size (0 disables).
    #[arg(long)]
    play_rate_limit_burst: Option<u32>,

    /// Max request body size in bytes (0 disables limit).
    #[arg(long)]
    http_body_limit_bytes: Option<usize>,

    /// Max queued notifications in the broadcast channel (0 uses default).
    #[arg(long)]
    updates_broadcast_buffer: Option<usize>,

    /// Max queued WebSocket outbound messages per connection (0 uses default).
    #[arg(long)]
    ws_outbound_buffer: Option<usize>,

    /// Max WebSocket message size in bytes (0 uses default).
    #[arg(long)]
    ws_max_message_bytes: Option<usize>,
}

fn is_production() -> bool {
    matches!(
        std::env::var("NODE_ENV").as_deref(),
        Ok("production") | Ok("prod")
    )
}

/// Maps an optional arg value to Option: 0 => None, Some(v) => Some(v), None => default
fn map_optional_limit<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => None,
        Some(v) => Some(v),
        None => default,
    }
}

/// Maps an optional arg value keeping default on 0: 0 => default, Some(v) => Some(v),
/// None => default
fn map_optional_default_on_zero<T: Copy + PartialEq + From<u8>>(
    arg: Option<T>,
    default: Option<T>,
) -> Option<T> {
    match arg {
        Some(v) if v == T::from(0) => default,
        Some(v) => Some(v),
        None => default,
    }
}

fn env_value<T: FromStr>(var: &str) -> Result<Option<T>> {
    non_empty_env(var)
        .map(|value| {
            value
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid {var}: {value}"))
        })
        .transpose()
}

fn build_config(args: &Args) -> Result<ServerConfig> {
    let defaults = ServerConfig::default();
    if let Some(path) = &args.probability_table {
        if !path.is_file() {
            anyhow::bail!("probability_table not found: {}", path.display());
        }
    }
    let http_rate_limit_per_second = args
        .http_rate_limit_per_second
        .or(env_value("RATE_LIMIT_HTTP_PER_SEC")?);
    let http_rate_limit_burst = args
        .http_rate_limit_burst
        .or(env_value("RATE_LIMIT_HTTP_BURST")?);

    Ok(ServerConfig {
        database_path: args.database_path.clone(),
        probability_table_path: args.probability_table.clone(),
        deterministic_seed: args.deterministic_seed.or(defaults.deterministic_seed),
        history_page_limit: map_optional_default_on_zero(
            args.history_page_limit,
            defaults.history_page_limit,
        ),
        ranking_limit: map_optional_limit(args.ranking_limit, defaults.ranking_limit),
        persistence_retry_attempts: map_optional_default_on_zero(
            args.persistence_retry_attempts,
            defaults.persistence_retry_attempts,
        ),
        persistence_retry_backoff_ms: map_optional_default_on_zero(
            args.persistence_retry_backoff_ms,
            defaults.persistence_retry_backoff_ms,
        ),
        http_rate_limit_per_second: map_optional_limit(
            http_rate_limit_per_second,
            defaults.http_rate_limit_per_second,
        ),
        http_rate_limit_burst: map_optional_limit(
            http_rate_limit_burst,
            defaults.http_rate_limit_burst,
        ),
        play_rate_limit_per_minute: map_optional_limit(
            args.play_rate_limit_per_minute,
            defaults.play_rate_limit_per_minute,
        ),
        play_rate_limit_burst: map_optional_limit(
            args.play_rate_limit_burst,
            defaults.play_rate_limit_burst,
        ),
        http_body_limit_bytes: map_optional_limit(
            args.http_body_limit_bytes,
            defaults.http_body_limit_bytes,
        ),
        updates_broadcast_buffer: map_optional_default_on_zero(
            args.updates_broadcast_buffer,
            defaults.updates_broadcast_buffer,
        ),
        ws_outbound_buffer: map_optional_default_on_zero(
            args.ws_outbound_buffer,
            defaults.ws_outbound_buffer,
        ),
        ws_max_message_bytes: map_optional_default_on_zero(
            args.ws_max_message_bytes,
            defaults.ws_max_message_bytes,
        ),
        ws_send_timeout_ms: defaults.ws_send_timeout_ms,
        admin_token: non_empty_env("ADMIN_AUTH_TOKEN"),
        metrics_token: non_empty_env("METRICS_AUTH_TOKEN"),
    })
}

fn require_env(var: &str) -> Result<String> {
    let value = std::env::var(var).unwrap_or_default();
    if value.trim().is_empty() {
        anyhow::bail!("Missing required env: {var}");
    }
    Ok(value)
}

fn ensure_production_env(args: &Args) -> Result<()> {
    if !is_production() {
        return Ok(());
    }

    require_env("ALLOWED_HTTP_ORIGINS")?;
    require_env("METRICS_AUTH_TOKEN")?;
    require_env("ADMIN_AUTH_TOKEN")?;
    if args.database_path.is_none() {
        anyhow::bail!("--database-path is required in production");
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse args
    let args = Args::parse();

    // Create logger
    init_tracing()?;

    ensure_production_env(&args)?;

    let config = build_config(&args)?;
    let server = Server::open(config).await.context("open server")?;
    let api = Api::new(server);
    let app = api.router();

    // Start server
    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("axum server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limits_disable_or_keep_defaults() {
        let args = Args::parse_from([
            "slotfloor-server",
            "--deterministic-seed",
            "7",
            "--ranking-limit",
            "0",
            "--history-page-limit",
            "0",
            "--play-rate-limit-per-minute",
            "0",
            "--ws-outbound-buffer",
            "0",
        ]);
        let config = build_config(&args).expect("config should parse");
        let defaults = ServerConfig::default();
        assert_eq!(config.deterministic_seed, Some(7));
        assert_eq!(config.ranking_limit, None);
        assert_eq!(config.history_page_limit, defaults.history_page_limit);
        assert_eq!(config.play_rate_limit_per_minute, None);
        assert_eq!(config.ws_outbound_buffer, defaults.ws_outbound_buffer);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let args = Args::parse_from([
            "slotfloor-server",
            "--database-path",
            "/tmp/slotfloor.db",
            "--history-page-limit",
            "50",
            "--persistence-retry-attempts",
            "5",
            "--http-body-limit-bytes",
            "1024",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/slotfloor.db")));
        assert_eq!(config.history_page_limit, Some(50));
        assert_eq!(config.persistence_retry_attempts, Some(5));
        assert_eq!(config.http_body_limit_bytes, Some(1024));
    }

    #[test]
    fn rejects_missing_probability_table() {
        let args = Args::parse_from([
            "slotfloor-server",
            "--probability-table",
            "/definitely/not/here.yaml",
        ]);
        let err = build_config(&args).unwrap_err();
        assert!(
            err.to_string().contains("probability_table"),
            "unexpected error: {err}"
        );
    }
}
