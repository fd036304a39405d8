use axum::{
    body::Bytes,
    extract::{Path, Query, State as AxumState},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use slotfloor_execution::{Actor, LedgerError};
use slotfloor_types::api::{ErrorBody, RankingBy, RankingKind, ResetTarget, TeamStats};
use slotfloor_types::slot::DEFAULT_RANKING_LIMIT;
use std::sync::Arc;
use std::time::Instant;

use super::{ADMIN_TOKEN_HEADER, PLAYER_ID_HEADER};
use crate::Server;

#[derive(Serialize)]
struct HealthzResponse {
    ok: bool,
}

#[derive(Deserialize)]
pub(super) struct RegisterRequest {
    player_id: String,
    player_name: String,
    setting: Option<u8>,
}

#[derive(Deserialize)]
pub(super) struct SettingRequest {
    setting: u8,
}

#[derive(Deserialize)]
pub(super) struct ProfileRequest {
    player_name: Option<String>,
    setting: Option<u8>,
}

#[derive(Deserialize)]
pub(super) struct TeamListQuery {
    #[serde(default = "default_public")]
    public_only: bool,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// An empty body plays at the stored setting.
#[derive(Default, Deserialize)]
struct PlayRequest {
    setting: Option<u8>,
}

#[derive(Deserialize)]
pub(super) struct HistoryQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct RankingQuery {
    #[serde(default)]
    kind: RankingKind,
    #[serde(default)]
    by: RankingBy,
    limit: Option<usize>,
}

#[derive(Deserialize)]
pub(super) struct ResetRequest {
    target: ResetTarget,
}

#[derive(Deserialize)]
pub(super) struct CreateTeamRequest {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_public")]
    is_public: bool,
}

fn default_public() -> bool {
    true
}

#[derive(Serialize)]
struct LeaveTeamResponse {
    /// The team left behind; `None` when the last member left and it was deleted.
    team: Option<TeamStats>,
}

pub(super) enum ApiError {
    Ledger(LedgerError),
    Unauthorized(&'static str),
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message, retry) = match self {
            Self::Unauthorized(message) => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                message.to_string(),
                false,
            ),
            Self::Ledger(err) => {
                let status = match &err {
                    err if err.is_transient() => StatusCode::SERVICE_UNAVAILABLE,
                    LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
                    LedgerError::Validation(_) => StatusCode::BAD_REQUEST,
                    LedgerError::Conflict(_) => StatusCode::CONFLICT,
                    LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
                    LedgerError::Persistence(_) | LedgerError::InvariantViolation(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if status.is_server_error() {
                    tracing::error!(kind = err.kind(), error = %err, "request failed");
                }
                (status, err.kind(), err.to_string(), err.is_transient())
            }
        };
        let body = Json(ErrorBody {
            error: error.to_string(),
            message,
        });
        if retry {
            return (status, [(header::RETRY_AFTER, "1")], body).into_response();
        }
        (status, body).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn player_id(headers: &HeaderMap) -> ApiResult<String> {
    headers
        .get(PLAYER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::Unauthorized("missing x-player-id header"))
}

fn is_admin(headers: &HeaderMap, server: &Server) -> bool {
    let Some(expected) = server.config.admin_token.as_deref().filter(|token| !token.is_empty())
    else {
        return false;
    };
    headers
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|token| token == expected)
}

fn metrics_auth_error(headers: &HeaderMap, server: &Server) -> Option<StatusCode> {
    let token = server.config.metrics_token.as_deref().unwrap_or_default();
    if token.is_empty() {
        return None;
    }
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let header_token = headers
        .get("x-metrics-token")
        .and_then(|value| value.to_str().ok());
    if bearer == Some(token) || header_token == Some(token) {
        None
    } else {
        Some(StatusCode::UNAUTHORIZED)
    }
}

pub(super) async fn healthz() -> Response {
    Json(HealthzResponse { ok: true }).into_response()
}

pub(super) async fn http_metrics(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> Response {
    if let Some(status) = metrics_auth_error(&headers, &server) {
        return status.into_response();
    }
    Json(server.metrics_snapshot()).into_response()
}

pub(super) async fn register(
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Response> {
    let ledger = server.ledger();
    let player = ledger
        .register(&request.player_id, &request.player_name, request.setting)
        .await?;
    let stats = ledger.player_stats(&player.player_id).await?;
    Ok((StatusCode::CREATED, Json(stats)).into_response())
}

pub(super) async fn update_profile(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<String>,
    Json(request): Json<ProfileRequest>,
) -> ApiResult<Response> {
    let actor = Actor::player(player_id(&headers)?);
    let ledger = server.ledger();
    ledger
        .update_profile(&actor, &id, request.player_name.as_deref(), request.setting)
        .await?;
    Ok(Json(ledger.player_stats(&id).await?).into_response())
}

pub(super) async fn set_setting(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<SettingRequest>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let ledger = server.ledger();
    ledger.set_setting(&player_id, request.setting).await?;
    Ok(Json(ledger.player_stats(&player_id).await?).into_response())
}

fn play_request(body: &[u8]) -> ApiResult<PlayRequest> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PlayRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| LedgerError::Validation(format!("invalid play request: {err}")).into())
}

pub(super) async fn play(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    body: Bytes,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let request = play_request(&body)?;
    let start = Instant::now();
    let result = server.orchestrator().play(&player_id, request.setting).await;
    server.http_metrics().record_play(
        start.elapsed(),
        result.as_ref().ok().map(|response| response.outcome_label),
    );
    Ok(Json(result?).into_response())
}

pub(super) async fn history(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let start = Instant::now();
    let page = server
        .orchestrator()
        .get_history(&player_id, query.limit, query.offset)
        .await;
    server.http_metrics().record_history(start.elapsed());
    Ok(Json(page?).into_response())
}

pub(super) async fn global_stats(AxumState(server): AxumState<Arc<Server>>) -> ApiResult<Response> {
    let start = Instant::now();
    let stats = server.ledger().global_stats().await;
    server.http_metrics().record_stats(start.elapsed());
    Ok(Json(stats?).into_response())
}

pub(super) async fn player_stats(
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let start = Instant::now();
    let stats = server.ledger().player_stats(&id).await;
    server.http_metrics().record_stats(start.elapsed());
    Ok(Json(stats?).into_response())
}

pub(super) async fn team_stats(
    AxumState(server): AxumState<Arc<Server>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let start = Instant::now();
    let stats = server.ledger().team_stats(&id).await;
    server.http_metrics().record_stats(start.elapsed());
    Ok(Json(stats?).into_response())
}

pub(super) async fn ranking(
    AxumState(server): AxumState<Arc<Server>>,
    Query(query): Query<RankingQuery>,
) -> ApiResult<Response> {
    let cap = server.config.ranking_limit();
    let limit = query.limit.unwrap_or(DEFAULT_RANKING_LIMIT.min(cap));
    if limit == 0 || limit > cap {
        return Err(LedgerError::Validation(format!("limit must be within 1..={cap}")).into());
    }
    let start = Instant::now();
    let ranking = server.ledger().ranking(query.kind, query.by, limit).await;
    server.http_metrics().record_stats(start.elapsed());
    Ok(Json(ranking?).into_response())
}

pub(super) async fn reset_period(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<ResetRequest>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let actor = Actor {
        player_id,
        is_admin: is_admin(&headers, &server),
    };
    let response = server.ledger().reset_period(&actor, request.target).await?;
    Ok(Json(response).into_response())
}

pub(super) async fn list_teams(
    AxumState(server): AxumState<Arc<Server>>,
    Query(query): Query<TeamListQuery>,
) -> ApiResult<Response> {
    let start = Instant::now();
    let teams = server
        .ledger()
        .list_teams(query.public_only, query.limit, query.offset);
    server.http_metrics().record_stats(start.elapsed());
    Ok(Json(teams?).into_response())
}

pub(super) async fn create_team(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Json(request): Json<CreateTeamRequest>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let ledger = server.ledger();
    let team = ledger
        .create_team(&player_id, &request.name, &request.description, request.is_public)
        .await?;
    let stats = ledger.team_stats(&team.profile.team_id).await?;
    Ok((StatusCode::CREATED, Json(stats)).into_response())
}

pub(super) async fn join_team(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
    Path(team_id): Path<String>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let ledger = server.ledger();
    ledger.join_team(&player_id, &team_id).await?;
    Ok(Json(ledger.team_stats(&team_id).await?).into_response())
}

pub(super) async fn leave_team(
    headers: HeaderMap,
    AxumState(server): AxumState<Arc<Server>>,
) -> ApiResult<Response> {
    let player_id = player_id(&headers)?;
    let ledger = server.ledger();
    let team = match ledger.leave_team(&player_id).await? {
        Some(team) => Some(ledger.team_stats(&team.profile.team_id).await?),
        None => None,
    };
    Ok(Json(LeaveTeamResponse { team }).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn play_body_is_optional() {
        assert_eq!(play_request(b"").ok().map(|r| r.setting), Some(None));
        assert_eq!(play_request(b"  \n").ok().map(|r| r.setting), Some(None));
        assert_eq!(play_request(b"{}").ok().map(|r| r.setting), Some(None));
        assert_eq!(play_request(br#"{"setting":4}"#).ok().map(|r| r.setting), Some(Some(4)));
        for body in [&br#"{"setting":"high"}"#[..], br#"{"setting":-1}"#, b"not json"] {
            assert!(matches!(
                play_request(body),
                Err(ApiError::Ledger(LedgerError::Validation(_)))
            ));
        }
    }

    #[test]
    fn transient_errors_ask_for_retry() {
        let response =
            ApiError::from(LedgerError::Persistence(anyhow::anyhow!("disk busy"))).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");

        let response = ApiError::from(LedgerError::player_not_found("ghost")).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!response.headers().contains_key(header::RETRY_AFTER));

        let response =
            ApiError::from(LedgerError::InvariantViolation("bad reel".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key(header::RETRY_AFTER));
    }
}
