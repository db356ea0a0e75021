use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use super::admin::{MatrixAdmin, SystemConfigAdmin};
use super::audit::AuditLog;
use super::decision::{BypassReason, DenialReason, PermissionResult};
use super::grants::GrantStore;
use super::matrix::{Action, ActionRule};
use super::phase::PhaseResolver;
use super::principal::{ResourceContext, ResourceState, UserContext};
use crate::config::AccessConfig;
use crate::db::ConfigStore;
use crate::utils::Clock;

/// Policy evaluator trait for pluggable authorization logic
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    async fn check_permission(
        &self,
        user: &UserContext,
        action: Action,
        resource: &ResourceContext,
    ) -> PermissionResult;
}

/// Phase-, data-state- and bypass-aware permission checker.
///
/// Evaluation order:
/// 1. unknown action -> deny
/// 2. impersonation -> allow, skipping every other rule
/// 3. matrix entry for the current phase; an unreadable matrix -> deny
/// 4. phase denied + active temporary grant -> phase treated as allowed
/// 5. phase still denied -> deny
/// 6. data-state guards (also under temporary access) -> deny
/// 7. allow, auditing any bypass that was needed
pub struct PermissionChecker {
    phases: PhaseResolver,
    grants: GrantStore,
    permissions: MatrixAdmin,
    system: SystemConfigAdmin,
    audit: Arc<AuditLog>,
}

impl PermissionChecker {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, config: &AccessConfig) -> Self {
        let audit = Arc::new(AuditLog::new(store.clone(), clock.clone()));
        Self {
            phases: PhaseResolver::new(store.clone(), clock.clone(), config.phase_cache_ttl),
            grants: GrantStore::new(store.clone(), clock, config.default_temporary_access_hours),
            permissions: MatrixAdmin::new(store.clone(), audit.clone()),
            system: SystemConfigAdmin::new(store, audit.clone()),
            audit,
        }
    }

    pub fn phases(&self) -> &PhaseResolver {
        &self.phases
    }

    pub fn grants(&self) -> &GrantStore {
        &self.grants
    }

    pub fn permissions(&self) -> &MatrixAdmin {
        &self.permissions
    }

    pub fn system_config(&self) -> &SystemConfigAdmin {
        &self.system
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Entry point for callers holding an action name from outside the process
    /// (request bodies, config). Names outside the closed set are denied.
    pub async fn check_named(&self, user: &UserContext, action: &str, resource: &ResourceContext) -> PermissionResult {
        match Action::from_str(action) {
            Ok(action) => self.check_permission(user, action, resource).await,
            Err(_) => {
                self.deny(user, action, resource, DenialReason::UnknownAction(action.to_string()))
                    .await
            }
        }
    }

    async fn evaluate(&self, user: &UserContext, action: Action, resource: &ResourceContext) -> PermissionResult {
        if user.is_impersonating {
            tracing::info!(
                user_id = %user.user_id,
                impersonated_user_id = ?user.team_manager_id,
                action = %action,
                "impersonation bypass"
            );
            return self.grant(user, action, resource, Some(BypassReason::Impersonation)).await;
        }

        let Some(matrix) = self.permissions.effective().await else {
            return self
                .deny(user, action.as_str(), resource, DenialReason::ConfigurationUnavailable)
                .await;
        };
        let Some(rule) = matrix.rule(action).copied() else {
            return self
                .deny(user, action.as_str(), resource, DenialReason::UnknownAction(action.to_string()))
                .await;
        };

        let phase = self.phases.current_phase().await;
        let mut bypass = None;

        if !rule.allows(phase) {
            if user.has_temporary_access && self.grants.is_active(grant_subject(user)).await {
                tracing::debug!(user_id = %user.user_id, action = %action, phase = ?phase, "phase waived by temporary access");
                bypass = Some(BypassReason::TemporaryAccess);
            } else {
                return self.deny(user, action.as_str(), resource, DenialReason::for_phase(phase)).await;
            }
        }

        if let Some(reason) = data_state_violation(&rule, &resource.resource_state) {
            return self.deny(user, action.as_str(), resource, reason).await;
        }

        self.grant(user, action, resource, bypass).await
    }

    async fn grant(
        &self,
        user: &UserContext,
        action: Action,
        resource: &ResourceContext,
        bypass: Option<BypassReason>,
    ) -> PermissionResult {
        if let Some(reason) = bypass {
            self.audit.record_bypass(user, action.as_str(), resource, reason).await;
        }
        PermissionResult::allowed(bypass)
    }

    async fn deny(
        &self,
        user: &UserContext,
        action: &str,
        resource: &ResourceContext,
        reason: DenialReason,
    ) -> PermissionResult {
        tracing::info!(
            user_id = %user.user_id,
            action = %action,
            resource_type = %resource.resource_type,
            reason = reason.code(),
            "permission denied"
        );
        self.audit.record_denial(user, action, resource, &reason).await;
        PermissionResult::denied(&reason)
    }
}

#[async_trait]
impl PolicyEvaluator for PermissionChecker {
    async fn check_permission(
        &self,
        user: &UserContext,
        action: Action,
        resource: &ResourceContext,
    ) -> PermissionResult {
        self.evaluate(user, action, resource).await
    }
}

/// The identity a temporary grant must be held by.
fn grant_subject(user: &UserContext) -> &str {
    user.team_manager_id.as_deref().unwrap_or(&user.user_id)
}

/// Data-state guard for `rule` against the loaded resource. A guard whose
/// state the resource does not carry denies rather than passing silently.
pub fn data_state_violation(rule: &ActionRule, state: &ResourceState) -> Option<DenialReason> {
    if rule.requires_not_assigned {
        match state {
            ResourceState::CrewMember { assigned: true } => return Some(DenialReason::CrewMemberAssigned),
            ResourceState::CrewMember { assigned: false } => {}
            _ => return Some(DenialReason::ResourceStateMismatch),
        }
    }

    if rule.requires_not_paid {
        match state {
            ResourceState::BoatRegistration { paid: true } => return Some(DenialReason::BoatPaid),
            ResourceState::BoatRegistration { paid: false } => {}
            _ => return Some(DenialReason::ResourceStateMismatch),
        }
    }

    None
}
