use axum::{
    extract::{DefaultBodyLimit, Request, State as AxumState},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post, put},
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::Server;

mod http;
mod ws;

pub(crate) const PLAYER_ID_HEADER: &str = "x-player-id";
pub(crate) const ADMIN_TOKEN_HEADER: &str = "x-admin-token";
const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct Api {
    server: Arc<Server>,
}

type IpGovernorConfig =
    tower_governor::governor::GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>;

fn governor_config(period: Duration, burst_size: u32) -> Option<Arc<IpGovernorConfig>> {
    GovernorConfigBuilder::default()
        .period(period)
        .burst_size(burst_size)
        .key_extractor(SmartIpKeyExtractor)
        .finish()
        .or_else(|| {
            tracing::warn!("invalid rate-limit config; falling back to defaults");
            GovernorConfigBuilder::default()
                .key_extractor(SmartIpKeyExtractor)
                .finish()
        })
        .map(Arc::new)
}

impl Api {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    pub fn router(&self) -> Router {
        let config = &self.server.config;
        let allowed_origins = parse_allowed_origins("ALLOWED_HTTP_ORIGINS");
        let allow_any_origin = allowed_origins.contains("*");
        if allowed_origins.is_empty() {
            tracing::warn!("ALLOWED_HTTP_ORIGINS is empty; all browser origins will be rejected");
        }
        let cors_origins = allowed_origins
            .iter()
            .filter(|origin| *origin != "*")
            .filter_map(|origin| match HeaderValue::from_str(origin) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "invalid origin in ALLOWED_HTTP_ORIGINS");
                    None
                }
            })
            .collect::<Vec<_>>();
        let cors = if allow_any_origin {
            CorsLayer::new().allow_origin(AllowOrigin::any())
        } else {
            CorsLayer::new().allow_origin(AllowOrigin::list(cors_origins))
        }
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(REQUEST_ID_HEADER),
            header::HeaderName::from_static(PLAYER_ID_HEADER),
            header::HeaderName::from_static(ADMIN_TOKEN_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static(REQUEST_ID_HEADER)]);

        let governor_conf =
            match (config.http_rate_limit_per_second, config.http_rate_limit_burst) {
                (Some(rate_per_second), Some(burst_size))
                    if rate_per_second > 0 && burst_size > 0 =>
                {
                    let period =
                        Duration::from_nanos((1_000_000_000u64 / rate_per_second).max(1));
                    governor_config(period, burst_size)
                }
                _ => None,
            };
        let play_governor_conf =
            match (config.play_rate_limit_per_minute, config.play_rate_limit_burst) {
                (Some(rate_per_minute), Some(burst_size))
                    if rate_per_minute > 0 && burst_size > 0 =>
                {
                    let period =
                        Duration::from_nanos((60_000_000_000u64 / rate_per_minute).max(1));
                    tracing::info!(
                        rate_per_minute,
                        burst_size,
                        period_ms = period.as_millis() as u64,
                        "play rate limit configured"
                    );
                    governor_config(period, burst_size)
                }
                _ => None,
            };

        let play_route = match play_governor_conf {
            Some(config) => Router::new()
                .route("/slot/play", post(http::play))
                .layer(GovernorLayer { config }),
            None => Router::new().route("/slot/play", post(http::play)),
        };

        let router = Router::new()
            .route("/healthz", get(http::healthz))
            .route("/metrics/http", get(http::http_metrics))
            .route("/players", post(http::register))
            .route("/players/setting", post(http::set_setting))
            .route("/players/:id", put(http::update_profile))
            .route("/slot/history", get(http::history))
            .route("/stats/global", get(http::global_stats))
            .route("/stats/player/:id", get(http::player_stats))
            .route("/stats/team/:id", get(http::team_stats))
            .route("/stats/reset-period", post(http::reset_period))
            .route("/stats/ranking", get(http::ranking))
            .route("/teams", get(http::list_teams).post(http::create_team))
            .route("/teams/leave", post(http::leave_team))
            .route("/teams/:id/join", post(http::join_team))
            .route("/updates", get(ws::updates_ws));

        let router = match governor_conf {
            Some(config) => router.layer(GovernorLayer { config }),
            None => router,
        };
        let router = router.merge(play_route);
        let router = router.layer(cors);
        let router = match config.http_body_limit_bytes {
            Some(limit) if limit > 0 => router.layer(DefaultBodyLimit::max(limit)),
            _ => router,
        };
        let router = router.layer(middleware::from_fn_with_state(
            self.server.clone(),
            request_id_middleware,
        ));
        let router = router.layer(TraceLayer::new_for_http());

        router.with_state(self.server.clone())
    }
}

fn parse_allowed_origins(var: &str) -> HashSet<String> {
    std::env::var(var)
        .unwrap_or_default()
        .split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

async fn request_id_middleware(
    AxumState(server): AxumState<Arc<Server>>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let mut response = next.run(req).await;
    match response.status() {
        StatusCode::UNAUTHORIZED => server.http_metrics().inc_reject_unauthorized(),
        StatusCode::PAYLOAD_TOO_LARGE => server.http_metrics().inc_reject_body_limit(),
        StatusCode::TOO_MANY_REQUESTS => server.http_metrics().inc_reject_rate_limit(),
        _ => {}
    }
    if let Ok(header_value) = HeaderValue::from_str(&request_id) {
        response
            .headers_mut()
            .insert(header::HeaderName::from_static(REQUEST_ID_HEADER), header_value);
    }
    tracing::info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "http.request"
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use axum::body::{to_bytes, Body};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn app(config: ServerConfig) -> Router {
        let server = Server::open(ServerConfig {
            deterministic_seed: Some(21),
            ..config
        })
        .await
        .unwrap();
        Api::new(server).router()
    }

    fn request(method: Method, uri: &str, player: Option<&str>, body: Option<Value>) -> Request {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(player) = player {
            builder = builder.header(PLAYER_ID_HEADER, player);
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: &Router, request: Request) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn register(router: &Router, player: &str) {
        let (status, _) = send(
            router,
            request(
                Method::POST,
                "/players",
                None,
                Some(json!({ "player_id": player, "player_name": player })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn healthz_echoes_request_id() {
        let router = app(ServerConfig::for_tests()).await;
        let response = router
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .header(REQUEST_ID_HEADER, "req-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-1");

        let response = router
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }

    #[tokio::test]
    async fn play_flow_and_error_mapping() {
        let router = app(ServerConfig::for_tests()).await;
        register(&router, "alice").await;

        let (status, body) = send(
            &router,
            request(
                Method::POST,
                "/players",
                None,
                Some(json!({ "player_id": "alice", "player_name": "again" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");

        let (status, body) = send(&router, request(Method::POST, "/slot/play", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, body) =
            send(&router, request(Method::POST, "/slot/play", Some("ghost"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");

        let (status, body) =
            send(&router, request(Method::POST, "/slot/play", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["play_sequence_number"], 1);
        let delta = body["delta"].as_i64().unwrap();
        assert_eq!(body["player_balance"]["total"], delta);
        assert!(body["outcome_label"].is_string());
        assert_eq!(body["reel_positions"].as_array().unwrap().len(), 3);

        let (status, body) = send(
            &router,
            request(Method::GET, "/slot/history?limit=5", Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["entries"][0]["delta"], delta);

        let (status, _) = send(
            &router,
            request(Method::GET, "/slot/history?limit=0", Some("alice"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &router,
            request(
                Method::POST,
                "/players/setting",
                Some("alice"),
                Some(json!({ "setting": 9 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) = send(&router, request(Method::GET, "/stats/global", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_players"], 1);
        assert_eq!(body["total_plays"], 1);
        assert_eq!(body["balance"]["total"], delta);
    }

    #[tokio::test]
    async fn play_body_overrides_setting() {
        use std::io::Write as _;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            "levels:\n  1:\n    - {{ outcome: REPLAY, probability: 0.999999 }}\n  \
             3:\n    - {{ outcome: BELL, probability: 0.999999 }}\n"
        )
        .unwrap();
        let router = app(ServerConfig {
            probability_table_path: Some(file.path().to_path_buf()),
            ..ServerConfig::for_tests()
        })
        .await;
        register(&router, "alice").await;

        let (status, body) = send(
            &router,
            request(Method::POST, "/slot/play", Some("alice"), Some(json!({ "setting": 3 }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome_label"], "BELL");
        assert_eq!(body["payout"], 14);

        let (status, body) =
            send(&router, request(Method::POST, "/slot/play", Some("alice"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome_label"], "REPLAY");

        let (status, body) = send(
            &router,
            request(Method::POST, "/slot/play", Some("alice"), Some(json!({ "setting": 9 }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation");

        let (status, body) =
            send(&router, request(Method::GET, "/stats/player/alice", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["setting"], 1);
        assert_eq!(body["play_count"], 2);
    }

    #[tokio::test]
    async fn profiles_and_team_directory() {
        let router = app(ServerConfig::for_tests()).await;
        register(&router, "alice").await;
        register(&router, "bob").await;

        let (status, body) = send(
            &router,
            request(
                Method::PUT,
                "/players/alice",
                Some("alice"),
                Some(json!({ "player_name": "Alice", "setting": 5 })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["player_name"], "Alice");
        assert_eq!(body["setting"], 5);

        let (status, body) = send(
            &router,
            request(
                Method::PUT,
                "/players/alice",
                Some("bob"),
                Some(json!({ "player_name": "Mallory" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        for (owner, name, is_public) in [("alice", "Open", true), ("bob", "Hidden", false)] {
            let (status, _) = send(
                &router,
                request(
                    Method::POST,
                    "/teams",
                    Some(owner),
                    Some(json!({ "name": name, "is_public": is_public })),
                ),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = send(&router, request(Method::GET, "/teams", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 1);
        assert_eq!(body["teams"][0]["team_name"], "Open");
        assert_eq!(body["teams"][0]["member_count"], 1);

        let (status, body) = send(
            &router,
            request(Method::GET, "/teams?public_only=false&limit=1", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_count"], 2);
        assert_eq!(body["teams"].as_array().unwrap().len(), 1);

        let (status, _) =
            send(&router, request(Method::GET, "/teams?limit=0", None, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &router,
            request(Method::GET, "/stats/ranking?by=big", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["by"], "big");
        assert_eq!(body["entries"][0]["value"], 0);
    }

    #[tokio::test]
    async fn teams_and_resets() {
        let router = app(ServerConfig {
            admin_token: Some("root".to_string()),
            ..ServerConfig::for_tests()
        })
        .await;
        register(&router, "owner").await;
        register(&router, "member").await;

        let (status, team) = send(
            &router,
            request(
                Method::POST,
                "/teams",
                Some("owner"),
                Some(json!({ "name": "Owls" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(team["owner_id"], "owner");
        let team_id = team["team_id"].as_str().unwrap().to_string();

        let (status, _) = send(
            &router,
            request(Method::POST, "/teams/missing/join", Some("member"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, team) = send(
            &router,
            request(Method::POST, &format!("/teams/{team_id}/join"), Some("member"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(team["members"].as_array().unwrap().len(), 2);

        let (status, body) = send(
            &router,
            request(
                Method::POST,
                "/stats/reset-period",
                Some("member"),
                Some(json!({ "target": "team" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");

        let (status, _) = send(
            &router,
            request(
                Method::POST,
                "/stats/reset-period",
                Some("owner"),
                Some(json!({ "target": "global" })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut admin = request(
            Method::POST,
            "/stats/reset-period",
            Some("owner"),
            Some(json!({ "target": "global" })),
        );
        admin
            .headers_mut()
            .insert(ADMIN_TOKEN_HEADER, HeaderValue::from_static("root"));
        let (status, body) = send(&router, admin).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["target"], "global");
        assert_eq!(body["balance"]["period"], 0);

        let (status, ranking) = send(
            &router,
            request(Method::GET, "/stats/ranking?kind=team&by=period", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ranking["entries"][0]["id"], team_id.as_str());
        assert_eq!(ranking["entries"][0]["size"], 2);

        let (status, body) =
            send(&router, request(Method::POST, "/teams/leave", Some("owner"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["team"]["owner_id"], "member");
        let (status, body) =
            send(&router, request(Method::POST, "/teams/leave", Some("member"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["team"].is_null());
        let (status, _) =
            send(&router, request(Method::POST, "/teams/leave", Some("member"), None)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(
            &router,
            request(Method::GET, &format!("/stats/team/{team_id}"), None, None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn ranking_limit_is_capped() {
        let router = app(ServerConfig {
            ranking_limit: Some(10),
            ..ServerConfig::for_tests()
        })
        .await;
        let (status, _) = send(
            &router,
            request(Method::GET, "/stats/ranking?limit=11", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) =
            send(&router, request(Method::GET, "/stats/ranking", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["kind"], "player");
        assert_eq!(body["by"], "total");
    }

    #[tokio::test]
    async fn metrics_require_token_when_configured() {
        let router = app(ServerConfig {
            metrics_token: Some("secret".to_string()),
            ..ServerConfig::for_tests()
        })
        .await;
        let (status, _) = send(&router, request(Method::GET, "/metrics/http", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/metrics/http")
                    .header(header::AUTHORIZATION, "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["http"]["reject_unauthorized"], 1);
        assert_eq!(body["persistence"]["failures"], 0);
    }

    #[tokio::test]
    async fn oversized_bodies_are_rejected() {
        let router = app(ServerConfig {
            http_body_limit_bytes: Some(64),
            ..ServerConfig::for_tests()
        })
        .await;
        let (status, _) = send(
            &router,
            request(
                Method::POST,
                "/players",
                None,
                Some(json!({ "player_id": "a", "player_name": "x".repeat(200) })),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
}
