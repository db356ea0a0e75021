use super::decision::PermissionResult;
use super::evaluator::PolicyEvaluator;
use super::matrix::Action;
use super::principal::{ResourceContext, UserContext};
use crate::errors::{AppError, AppResult};

/// Runs a check for a handler about to mutate `resource`, turning a denial into a 403.
pub async fn require_permission(
    evaluator: &dyn PolicyEvaluator,
    user: &UserContext,
    action: Action,
    resource: &ResourceContext,
) -> AppResult<PermissionResult> {
    forbid_denied(evaluator.check_permission(user, action, resource).await)
}

/// Passes a permitted result through; a denial becomes a 403 carrying its reason key.
pub fn forbid_denied(result: PermissionResult) -> AppResult<PermissionResult> {
    if result.is_permitted {
        return Ok(result);
    }

    Err(AppError::permission_denied(
        result.denial_reason.unwrap_or_else(|| "Permission denied".to_string()),
        result
            .denial_reason_key
            .unwrap_or_else(|| "errors.permission.denied".to_string()),
    ))
}
