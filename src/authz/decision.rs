use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::phase::EventPhase;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BypassReason {
    /// Admin acting as a team manager; waives every restriction.
    Impersonation,
    /// Admin-issued grant; waives the phase restriction only.
    TemporaryAccess,
}

impl BypassReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BypassReason::Impersonation => "impersonation",
            BypassReason::TemporaryAccess => "temporary_access",
        }
    }
}

/// Why a check was denied. Each variant maps to a stable key under `errors.permission.`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialReason {
    UnknownAction(String),
    RegistrationNotOpen,
    ActionNotAllowed,
    RegistrationClosed,
    PaymentDeadlinePassed,
    CrewMemberAssigned,
    BoatPaid,
    ResourceStateMismatch,
    ConfigurationUnavailable,
}

impl DenialReason {
    /// The phase-window denial for `phase`.
    pub fn for_phase(phase: EventPhase) -> Self {
        match phase {
            EventPhase::BeforeRegistration => DenialReason::RegistrationNotOpen,
            EventPhase::DuringRegistration => DenialReason::ActionNotAllowed,
            EventPhase::AfterRegistration => DenialReason::RegistrationClosed,
            EventPhase::AfterPaymentDeadline => DenialReason::PaymentDeadlinePassed,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            DenialReason::UnknownAction(_) => "unknown_action",
            DenialReason::RegistrationNotOpen => "registration_not_open",
            DenialReason::ActionNotAllowed => "action_not_allowed",
            DenialReason::RegistrationClosed => "registration_closed",
            DenialReason::PaymentDeadlinePassed => "payment_deadline_passed",
            DenialReason::CrewMemberAssigned => "crew_member_assigned",
            DenialReason::BoatPaid => "boat_paid",
            DenialReason::ResourceStateMismatch => "resource_state_mismatch",
            DenialReason::ConfigurationUnavailable => "configuration_unavailable",
        }
    }

    pub fn key(&self) -> String {
        format!("errors.permission.{}", self.code())
    }

    pub fn message(&self) -> String {
        match self {
            DenialReason::UnknownAction(name) => format!("Permission denied: unknown action '{name}'"),
            DenialReason::RegistrationNotOpen => "Registration has not opened yet".to_string(),
            DenialReason::ActionNotAllowed => "This action is not allowed during registration".to_string(),
            DenialReason::RegistrationClosed => "Registration is closed".to_string(),
            DenialReason::PaymentDeadlinePassed => "The payment deadline has passed".to_string(),
            DenialReason::CrewMemberAssigned => {
                "Crew member is assigned to a boat and cannot be modified".to_string()
            }
            DenialReason::BoatPaid => "Boat registration is paid and cannot be modified".to_string(),
            DenialReason::ResourceStateMismatch => {
                "Resource state does not match what this action requires".to_string()
            }
            DenialReason::ConfigurationUnavailable => "Permission configuration is unavailable".to_string(),
        }
    }
}

/// Outcome of a permission check. Denials are data, never errors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionResult {
    pub is_permitted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_reason: Option<BypassReason>,
}

impl PermissionResult {
    pub fn allowed(bypass_reason: Option<BypassReason>) -> Self {
        Self {
            is_permitted: true,
            denial_reason: None,
            denial_reason_key: None,
            bypass_reason,
        }
    }

    pub fn denied(reason: &DenialReason) -> Self {
        Self {
            is_permitted: false,
            denial_reason: Some(reason.message()),
            denial_reason_key: Some(reason.key()),
            bypass_reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_denials_use_expected_keys() {
        assert_eq!(
            DenialReason::for_phase(EventPhase::BeforeRegistration).key(),
            "errors.permission.registration_not_open"
        );
        assert_eq!(
            DenialReason::for_phase(EventPhase::AfterRegistration).key(),
            "errors.permission.registration_closed"
        );
        assert_eq!(
            DenialReason::for_phase(EventPhase::AfterPaymentDeadline).key(),
            "errors.permission.payment_deadline_passed"
        );
        assert_eq!(DenialReason::BoatPaid.key(), "errors.permission.boat_paid");
    }

    #[test]
    fn denied_result_serializes_without_bypass() {
        let json = serde_json::to_value(PermissionResult::denied(&DenialReason::UnknownAction("fly".into()))).unwrap();
        assert_eq!(json["is_permitted"], false);
        assert_eq!(json["denial_reason_key"], "errors.permission.unknown_action");
        assert!(json["denial_reason"].as_str().unwrap().contains("unknown action"));
        assert!(json.get("bypass_reason").is_none());
    }
}
