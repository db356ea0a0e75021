//! Authorization module - Permission Engine
//!
//! Decides whether a user may perform an action on a resource, given:
//! - the current event phase, derived from the configured registration dates
//! - a configurable phase-by-action permission matrix
//! - data-state guards on the resource (assigned crew members, paid boats)
//! - admin impersonation and time-boxed temporary access grants
//!
//! Denials and bypasses are written to the audit log.

pub mod admin;
pub mod audit;
pub mod decision;
mod evaluator;
mod grants;
mod guard;
pub mod matrix;
pub mod phase;
mod principal;

pub use admin::{MatrixAdmin, SystemConfigAdmin};
pub use audit::{AuditLog, AuditLogPage, AuditLogQuery, AuditLogType, AuditRecord, ConfigChangeRecord};
pub use decision::{BypassReason, DenialReason, PermissionResult};
pub use evaluator::{data_state_violation, PermissionChecker, PolicyEvaluator};
pub use grants::{GrantError, GrantStatus, GrantStore, TemporaryAccessGrant, MAX_GRANT_HOURS};
pub use guard::{forbid_denied, require_permission};
pub use matrix::{Action, ActionRule, MatrixValidationError, PermissionMatrix, UnknownAction};
pub use phase::{EventPhase, PhaseResolver};
pub use principal::{ResourceContext, ResourceState, Role, UserContext};
