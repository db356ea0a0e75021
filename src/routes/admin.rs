//! Admin API Routes
//!
//! System dates, the permission matrix, temporary access grants and the audit
//! trail. Every endpoint requires the admin role.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::authz::{AuditLogPage, AuditLogQuery, GrantStatus, PermissionMatrix, TemporaryAccessGrant};
use crate::errors::AppError;
use crate::jwt::AdminUser;
use crate::models::system_config::{SystemConfig, SystemConfigUpdateRequest};

// =============================================================================
// ROUTER
// =============================================================================

pub fn routes() -> Router<AppState> {
    Router::new()
        // System dates
        .route("/config", get(get_config).put(update_config))
        .route("/phase-cache/invalidate", post(invalidate_phase_cache))
        // Permission matrix
        .route("/permissions", get(get_permissions).put(update_permissions))
        .route("/permissions/reset", post(reset_permissions))
        // Temporary access
        .route("/temporary-access", get(list_temporary_access).post(grant_temporary_access))
        .route("/temporary-access/:user_id", delete(revoke_temporary_access))
        // Audit trail
        .route("/audit-logs", get(list_audit_logs))
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct GrantRequest {
    pub user_id: String,
    /// 1..=720; defaults to the configured `temporary_editing_access_hours`.
    pub hours: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct GrantListQuery {
    pub status: Option<GrantStatus>,
}

// =============================================================================
// SYSTEM CONFIG
// =============================================================================

/// Get the registration dates and grant duration
#[utoipa::path(
    get,
    path = "/admin/config",
    tag = "Admin",
    responses(
        (status = 200, description = "Stored system config", body = SystemConfig),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_config(State(state): State<AppState>, _admin: AdminUser) -> Result<Json<SystemConfig>, AppError> {
    Ok(Json(state.checker.system_config().get().await?))
}

/// Update the registration dates and grant duration
#[utoipa::path(
    put,
    path = "/admin/config",
    tag = "Admin",
    request_body = SystemConfigUpdateRequest,
    responses(
        (status = 200, description = "Updated system config", body = SystemConfig),
        (status = 400, description = "Unparseable or out-of-order dates"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_config(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(req): Json<SystemConfigUpdateRequest>,
) -> Result<Json<SystemConfig>, AppError> {
    let config = state.checker.system_config().update(&admin.admin_id, req).await?;
    state.checker.phases().invalidate_cache();
    Ok(Json(config))
}

/// Drop this instance's cached event phase
#[utoipa::path(
    post,
    path = "/admin/phase-cache/invalidate",
    tag = "Admin",
    responses(
        (status = 204, description = "Cache cleared"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn invalidate_phase_cache(State(state): State<AppState>, _admin: AdminUser) -> StatusCode {
    state.checker.phases().invalidate_cache();
    StatusCode::NO_CONTENT
}

// =============================================================================
// PERMISSION MATRIX
// =============================================================================

/// Get the stored permission matrix, or the default when none is stored
#[utoipa::path(
    get,
    path = "/admin/permissions",
    tag = "Admin",
    responses(
        (status = 200, description = "Permission matrix keyed by action name"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn get_permissions(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Json<PermissionMatrix>, AppError> {
    Ok(Json(state.checker.permissions().get_permissions().await?))
}

/// Replace the permission matrix
#[utoipa::path(
    put,
    path = "/admin/permissions",
    tag = "Admin",
    request_body(content = Object, description = "Complete matrix: every action with all four phase flags"),
    responses(
        (status = 200, description = "Stored permission matrix"),
        (status = 400, description = "Matrix incomplete or malformed; `field` names the gap"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_permissions(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(candidate): Json<Value>,
) -> Result<Json<PermissionMatrix>, AppError> {
    let matrix = state
        .checker
        .permissions()
        .update_permissions(&admin.admin_id, &candidate)
        .await?;
    Ok(Json(matrix))
}

/// Restore the default permission matrix
#[utoipa::path(
    post,
    path = "/admin/permissions/reset",
    tag = "Admin",
    responses(
        (status = 200, description = "Default permission matrix"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn reset_permissions(
    State(state): State<AppState>,
    admin: AdminUser,
) -> Result<Json<PermissionMatrix>, AppError> {
    Ok(Json(state.checker.permissions().reset_permissions(&admin.admin_id).await?))
}

// =============================================================================
// TEMPORARY ACCESS
// =============================================================================

/// Grant a team manager temporary editing access
#[utoipa::path(
    post,
    path = "/admin/temporary-access",
    tag = "Admin",
    request_body = GrantRequest,
    responses(
        (status = 201, description = "Grant created", body = TemporaryAccessGrant),
        (status = 400, description = "Hours out of range"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn grant_temporary_access(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(req): Json<GrantRequest>,
) -> Result<(StatusCode, Json<TemporaryAccessGrant>), AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::validation("user_id", "user_id must not be empty"));
    }
    let grant = state
        .checker
        .grants()
        .grant(&req.user_id, &admin.admin_id, req.hours)
        .await?;
    Ok((StatusCode::CREATED, Json(grant)))
}

/// Revoke a user's temporary access
#[utoipa::path(
    delete,
    path = "/admin/temporary-access/{user_id}",
    tag = "Admin",
    params(("user_id" = String, Path, description = "Grant holder")),
    responses(
        (status = 200, description = "Revoked grant", body = TemporaryAccessGrant),
        (status = 404, description = "No grant for this user"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn revoke_temporary_access(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(user_id): Path<String>,
) -> Result<Json<TemporaryAccessGrant>, AppError> {
    Ok(Json(state.checker.grants().revoke(&user_id, &admin.admin_id).await?))
}

/// List temporary access grants
#[utoipa::path(
    get,
    path = "/admin/temporary-access",
    tag = "Admin",
    params(GrantListQuery),
    responses(
        (status = 200, description = "Grants, lapsed ones reported as expired", body = Vec<TemporaryAccessGrant>),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_temporary_access(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<GrantListQuery>,
) -> Result<Json<Vec<TemporaryAccessGrant>>, AppError> {
    Ok(Json(state.checker.grants().list(query.status).await?))
}

// =============================================================================
// AUDIT TRAIL
// =============================================================================

/// List permission denial and bypass records
#[utoipa::path(
    get,
    path = "/admin/audit-logs",
    tag = "Admin",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Page of audit records in chronological order", body = AuditLogPage),
        (status = 400, description = "Bad limit or continuation token"),
        (status = 403, description = "Admin role required"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_audit_logs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<AuditLogPage>, AppError> {
    Ok(Json(state.checker.audit().list(&query).await?))
}
