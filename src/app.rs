use std::sync::Arc;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::authz::PermissionChecker;
use crate::config::AccessConfig;
use crate::db::{ConfigStore, SqliteConfigStore};
use crate::errors::AppError;
use crate::jwt::JwtConfig;
use crate::routes::{admin, health, permissions};
use crate::utils::{Clock, SystemClock};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ConfigStore>,
    pub checker: Arc<PermissionChecker>,
    pub jwt: Arc<JwtConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, access: &AccessConfig, jwt: JwtConfig) -> Self {
        let checker = PermissionChecker::new(store.clone(), clock, access);
        Self {
            store,
            checker: Arc::new(checker),
            jwt: Arc::new(jwt),
        }
    }
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let access = AccessConfig::from_env()?;
    let store: Arc<dyn ConfigStore> = Arc::new(SqliteConfigStore::new(pool));
    let state = AppState::new(store, Arc::new(SystemClock), &access, jwt_config);

    Ok(router(state))
}

/// Router over an already-built state; tests use this to inject a store and clock.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health::health))
        .route("/event/phase", get(permissions::current_phase))
        .route("/permissions/check", post(permissions::check_permission))
        .nest("/admin", admin::routes())
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
