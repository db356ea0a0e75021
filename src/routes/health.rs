use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::db::keys;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_ok: bool,
    pub store_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    // Lightweight store check
    let probe = state.store.get(&keys::system_config()).await;

    match probe {
        Ok(_) => Ok(Json(HealthResponse { status: "ok", store_ok: true, store_error: None })),
        Err(e) => Ok(Json(HealthResponse { status: "ok", store_ok: false, store_error: Some(e.to_string()) })),
    }
}
