use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::db;
use crate::models::{
    ApiResponse, EventDescriptor, LeagueMember, Match, Player, PointsSnapshot, PriceHistoryEntry, Region,
    StatLineView,
};
use crate::services::SyncService;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub sync: SyncService,
}

pub async fn serve(port: u16, state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = create_router().with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    tracing::info!("vctsync API server listening on port {}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/sync", post(sync_handler))
        .route("/recalibrate", post(recalibrate_handler))
        .route("/matches/{id}", get(get_match_handler))
        .route("/matches/{id}/stats", get(get_match_stats_handler))
        .route("/players", get(get_players_handler))
        .route("/players/{id}/prices", get(get_price_history_handler))
        .route("/league", get(get_league_handler))
        .route("/league/{id}/history", get(get_member_history_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

async fn health_check() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("vctsync API is running"))
}

// POST /sync - one event, or the whole catalogue when no path is given
#[derive(Deserialize)]
struct SyncRequest {
    path: Option<String>,
    name: Option<String>,
    region: Option<String>,
}

#[derive(Debug, Serialize)]
struct SyncSummary {
    processed: usize,
}

async fn sync_handler(
    State(state): State<AppState>,
    Json(request): Json<SyncRequest>,
) -> Result<Json<ApiResponse<SyncSummary>>, (StatusCode, Json<ApiResponse<SyncSummary>>)> {
    let processed = match request.path {
        None => state.sync.sync_all().await,
        Some(path) => {
            let region = match request.region.as_deref().map(str::parse::<Region>) {
                Some(Ok(region)) => region,
                Some(Err(e)) => return Err((StatusCode::BAD_REQUEST, Json(ApiResponse::error(e)))),
                None => {
                    return Err((
                        StatusCode::BAD_REQUEST,
                        Json(ApiResponse::error("region is required with path".to_string())),
                    ))
                }
            };
            let event = EventDescriptor {
                name: request.name.unwrap_or_else(|| path.clone()),
                path,
                region,
            };
            state.sync.sync_event(&event).await
        }
    };
    Ok(Json(ApiResponse::success(SyncSummary { processed })))
}

// POST /recalibrate - rescore every stat line and roll everything up
#[derive(Debug, Serialize)]
struct RecalibrateSummary {
    players: usize,
    owners: usize,
    rescored_matches: usize,
}

async fn recalibrate_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<RecalibrateSummary>>, StatusCode> {
    match state.sync.recalibrate_all().await {
        Ok(report) => Ok(Json(ApiResponse::success(RecalibrateSummary {
            players: report.players,
            owners: report.owners,
            rescored_matches: report.rescored_matches.len(),
        }))),
        Err(e) => {
            tracing::error!("Recalibration failed: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /matches/{id}
async fn get_match_handler(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<ApiResponse<Match>>, StatusCode> {
    match state.sync.cache().get_match(&state.pool, &match_id).await {
        Ok(Some(m)) => Ok(Json(ApiResponse::success(m))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch match {}: {}", match_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /matches/{id}/stats
async fn get_match_stats_handler(
    State(state): State<AppState>,
    Path(match_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<StatLineView>>>, StatusCode> {
    match state.sync.cache().get_match_stats(&state.pool, &match_id).await {
        Ok(Some(lines)) => Ok(Json(ApiResponse::success(lines))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch stats for match {}: {}", match_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /players
async fn get_players_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<Player>>>, StatusCode> {
    match state.sync.cache().get_all_players(&state.pool).await {
        Ok(players) => Ok(Json(ApiResponse::success(players))),
        Err(e) => {
            tracing::error!("Failed to fetch players: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /players/{id}/prices
async fn get_price_history_handler(
    State(state): State<AppState>,
    Path(player_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<PriceHistoryEntry>>>, StatusCode> {
    match load_price_history(&state.pool, &player_id).await {
        Ok(Some(history)) => Ok(Json(ApiResponse::success(history))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch price history for {}: {}", player_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /league - members by total points
async fn get_league_handler(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<LeagueMember>>>, StatusCode> {
    match load_league(&state.pool).await {
        Ok(members) => Ok(Json(ApiResponse::success(members))),
        Err(e) => {
            tracing::error!("Failed to fetch league members: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// GET /league/{id}/history - points snapshots of one member
async fn get_member_history_handler(
    State(state): State<AppState>,
    Path(member_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<PointsSnapshot>>>, StatusCode> {
    match load_member_history(&state.pool, &member_id).await {
        Ok(Some(history)) => Ok(Json(ApiResponse::success(history))),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            tracing::error!("Failed to fetch points history for {}: {}", member_id, e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn load_price_history(pool: &SqlitePool, player_id: &str) -> sqlx::Result<Option<Vec<PriceHistoryEntry>>> {
    let mut conn = pool.acquire().await?;
    if db::get_player(&mut conn, player_id).await?.is_none() {
        return Ok(None);
    }
    db::price_history(&mut conn, player_id).await.map(Some)
}

async fn load_league(pool: &SqlitePool) -> sqlx::Result<Vec<LeagueMember>> {
    let mut conn = pool.acquire().await?;
    db::list_league_members(&mut conn).await
}

async fn load_member_history(pool: &SqlitePool, member_id: &str) -> sqlx::Result<Option<Vec<PointsSnapshot>>> {
    let mut conn = pool.acquire().await?;
    if db::get_league_member(&mut conn, member_id).await?.is_none() {
        return Ok(None);
    }
    db::points_snapshots(&mut conn, member_id).await.map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::db::test_pool;
    use crate::services::{CacheCoordinator, CacheStore, Fetcher};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn test_app() -> Router {
        let pool = test_pool().await;
        let settings = Settings {
            source_base_url: "http://127.0.0.1:9".to_string(),
            fetch_max_retries: 0,
            ..Settings::default()
        };
        let sync = SyncService::new(
            pool.clone(),
            Fetcher::new(&settings).unwrap(),
            CacheCoordinator::new(CacheStore::in_memory(), Duration::from_secs(60)),
            Duration::ZERO,
            CancellationToken::new(),
        );
        create_router().with_state(AppState { pool, sync })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);
    }

    #[tokio::test]
    async fn test_unknown_match_is_404() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/matches/nope/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_sync_rejects_unknown_region() {
        let app = test_app().await;
        let request = Request::post("/sync")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path": "/event/matches/1/x", "region": "Atlantis"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["success"], false);
    }

    #[tokio::test]
    async fn test_unreachable_source_reports_zero() {
        let app = test_app().await;
        let request = Request::post("/sync")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"path": "/event/matches/1/x", "region": "EMEA"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["processed"], 0);
    }

    #[tokio::test]
    async fn test_empty_recalibration_and_players() {
        let app = test_app().await;
        let response = app
            .clone()
            .oneshot(Request::post("/recalibrate").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["data"]["players"], 0);

        let response = app
            .oneshot(Request::get("/players").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["data"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_history_of_unknown_ids_is_404() {
        let app = test_app().await;
        for uri in ["/players/nope/prices", "/league/nope/history"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }
    }
}
