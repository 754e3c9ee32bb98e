use std::any::Any;
use std::path::Path;

use axum::{
    extract::{Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use crate::cash::CashProfile;
use crate::chain::{Platform, ProfileQuery};
use crate::error::AppError;
use crate::proxy::{proxy_image_handler, PROXY_ROUTE};
use crate::shared::AppState;
use crate::tiktok::ResolvedProfile;

pub fn build_router(state: AppState, static_dir: Option<&Path>) -> Router {
    let mut app = Router::new()
        .route("/health", get(health_handler))
        .route("/tiktok", get(tiktok_handler))
        .route("/cash", get(cash_handler))
        .route(PROXY_ROUTE, get(proxy_image_handler))
        .with_state(state);

    if let Some(dir) = static_dir {
        app = app.fallback_service(ServeDir::new(dir));
    }

    let cors_layer = CorsLayer::new()
        .allow_origin(cors::Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(cors::Any);

    app.layer(CatchPanicLayer::custom(panic_response))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
}

fn panic_response(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .cloned()
        .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
        .unwrap_or_else(|| "handler panicked".to_string());
    AppError::Internal(detail).into_response()
}

async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct TikTokParams {
    user: Option<String>,
}

async fn tiktok_handler(
    State(state): State<AppState>,
    Query(params): Query<TikTokParams>,
) -> Result<Json<ResolvedProfile>, AppError> {
    let query = params
        .user
        .as_deref()
        .and_then(|raw| ProfileQuery::parse(Platform::ShortVideo, raw))
        .ok_or(AppError::MissingParameter("user"))?;

    Ok(Json(state.tiktok.resolve(&query).await))
}

#[derive(Debug, Deserialize)]
struct CashParams {
    tag: Option<String>,
}

async fn cash_handler(
    State(state): State<AppState>,
    Query(params): Query<CashParams>,
) -> Result<Json<CashProfile>, AppError> {
    let query = params
        .tag
        .as_deref()
        .and_then(|raw| ProfileQuery::parse(Platform::Payment, raw))
        .ok_or(AppError::MissingParameter("tag"))?;

    Ok(Json(state.cash.resolve(&query).await?))
}
