//! Permission check and event phase endpoints, open to any authenticated caller.

use std::str::FromStr;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::app::AppState;
use crate::authz::{forbid_denied, require_permission, Action, EventPhase, PermissionResult, ResourceContext};
use crate::errors::AppResult;
use crate::jwt::AuthUser;

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PermissionCheckRequest {
    /// Action name, e.g. `edit_crew_member`. Unknown names are denied.
    pub action: String,
    pub resource: ResourceContext,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CheckQuery {
    /// Answer a denial with 403 and its reason key instead of a 200 result.
    #[serde(default)]
    pub enforce: bool,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct PhaseResponse {
    pub phase: EventPhase,
    pub registration_start_date: Option<String>,
    pub registration_end_date: Option<String>,
    pub payment_deadline: Option<String>,
}

/// Evaluate the caller's permission for an action on a resource
#[utoipa::path(
    post,
    path = "/permissions/check",
    tag = "Permissions",
    request_body = PermissionCheckRequest,
    params(
        CheckQuery,
        ("X-Impersonate-Team-Manager" = Option<String>, Header, description = "Admin only: act as this team manager"),
    ),
    responses(
        (status = 200, description = "Decision; denied too unless enforce=true", body = PermissionResult),
        (status = 401, description = "Missing or invalid token"),
        (status = 403, description = "Denied under enforce=true, or impersonation attempted by a non-admin"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn check_permission(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<CheckQuery>,
    Json(req): Json<PermissionCheckRequest>,
) -> AppResult<Json<PermissionResult>> {
    if !query.enforce {
        let result = state
            .checker
            .check_named(&auth.context, &req.action, &req.resource)
            .await;
        return Ok(Json(result));
    }

    let result = match Action::from_str(&req.action) {
        Ok(action) => require_permission(state.checker.as_ref(), &auth.context, action, &req.resource).await?,
        Err(_) => forbid_denied(
            state
                .checker
                .check_named(&auth.context, &req.action, &req.resource)
                .await,
        )?,
    };
    Ok(Json(result))
}

/// Current event phase and the dates it was derived from
#[utoipa::path(
    get,
    path = "/event/phase",
    tag = "Permissions",
    responses(
        (status = 200, description = "Current phase", body = PhaseResponse),
        (status = 401, description = "Missing or invalid token"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn current_phase(State(state): State<AppState>, _auth: AuthUser) -> AppResult<Json<PhaseResponse>> {
    let phase = state.checker.phases().current_phase().await;
    let dates = match state.checker.system_config().get().await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(error = %err, "could not read system config for phase response");
            Default::default()
        }
    };

    Ok(Json(PhaseResponse {
        phase,
        registration_start_date: dates.registration_start_date,
        registration_end_date: dates.registration_end_date,
        payment_deadline: dates.payment_deadline,
    }))
}
