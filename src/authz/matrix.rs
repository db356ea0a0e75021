//! Declarative action × phase permission table.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::phase::EventPhase;

/// The closed set of actions the matrix governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    CreateCrewMember,
    EditCrewMember,
    DeleteCrewMember,
    CreateBoatRegistration,
    EditBoatRegistration,
    DeleteBoatRegistration,
    ProcessPayment,
    ViewData,
    ExportData,
}

impl Action {
    pub const ALL: [Action; 9] = [
        Action::CreateCrewMember,
        Action::EditCrewMember,
        Action::DeleteCrewMember,
        Action::CreateBoatRegistration,
        Action::EditBoatRegistration,
        Action::DeleteBoatRegistration,
        Action::ProcessPayment,
        Action::ViewData,
        Action::ExportData,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CreateCrewMember => "create_crew_member",
            Action::EditCrewMember => "edit_crew_member",
            Action::DeleteCrewMember => "delete_crew_member",
            Action::CreateBoatRegistration => "create_boat_registration",
            Action::EditBoatRegistration => "edit_boat_registration",
            Action::DeleteBoatRegistration => "delete_boat_registration",
            Action::ProcessPayment => "process_payment",
            Action::ViewData => "view_data",
            Action::ExportData => "export_data",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .iter()
            .copied()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// One row of the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ActionRule {
    pub before_registration: bool,
    pub during_registration: bool,
    pub after_registration: bool,
    pub after_payment_deadline: bool,
    #[serde(default)]
    pub requires_not_assigned: bool,
    #[serde(default)]
    pub requires_not_paid: bool,
}

impl ActionRule {
    fn phases(before: bool, during: bool, after: bool, after_deadline: bool) -> Self {
        Self {
            before_registration: before,
            during_registration: during,
            after_registration: after,
            after_payment_deadline: after_deadline,
            requires_not_assigned: false,
            requires_not_paid: false,
        }
    }

    fn not_assigned(mut self) -> Self {
        self.requires_not_assigned = true;
        self
    }

    fn not_paid(mut self) -> Self {
        self.requires_not_paid = true;
        self
    }

    pub fn allows(&self, phase: EventPhase) -> bool {
        match phase {
            EventPhase::BeforeRegistration => self.before_registration,
            EventPhase::DuringRegistration => self.during_registration,
            EventPhase::AfterRegistration => self.after_registration,
            EventPhase::AfterPaymentDeadline => self.after_payment_deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMatrix {
    rules: BTreeMap<Action, ActionRule>,
}

impl Default for PermissionMatrix {
    fn default() -> Self {
        let only_during = ActionRule::phases(false, true, false, false);
        let always = ActionRule::phases(true, true, true, true);

        let rules = BTreeMap::from([
            (Action::CreateCrewMember, only_during),
            (Action::EditCrewMember, only_during.not_assigned()),
            (Action::DeleteCrewMember, only_during.not_assigned()),
            (Action::CreateBoatRegistration, only_during),
            (Action::EditBoatRegistration, only_during.not_paid()),
            (Action::DeleteBoatRegistration, only_during.not_paid()),
            (Action::ProcessPayment, ActionRule::phases(false, true, true, false)),
            (Action::ViewData, always),
            (Action::ExportData, always),
        ]);

        Self { rules }
    }
}

impl PermissionMatrix {
    pub fn rule(&self, action: Action) -> Option<&ActionRule> {
        self.rules.get(&action)
    }

    /// Validate an admin-supplied matrix. Every action must be present with
    /// all four phase booleans; guard flags are optional but must be booleans.
    pub fn validate(value: &Value) -> Result<Self, MatrixValidationError> {
        let object = value.as_object().ok_or(MatrixValidationError::NotAnObject)?;

        for name in object.keys() {
            Action::from_str(name).map_err(|_| MatrixValidationError::UnknownAction(name.clone()))?;
        }

        for action in Action::ALL {
            let entry = object
                .get(action.as_str())
                .ok_or(MatrixValidationError::MissingAction(action))?;
            let entry = entry.as_object().ok_or_else(|| MatrixValidationError::InvalidField {
                path: action.as_str().to_string(),
                message: "expected an object of phase flags".to_string(),
            })?;
            for phase in EventPhase::ALL {
                if !entry.contains_key(phase.matrix_key()) {
                    return Err(MatrixValidationError::MissingPhase { action, phase });
                }
            }
        }

        let raw = value.to_string();
        let mut deserializer = serde_json::Deserializer::from_str(&raw);
        let by_name: BTreeMap<String, ActionRule> = serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|err| MatrixValidationError::InvalidField {
                path: err.path().to_string(),
                message: err.inner().to_string(),
            })?;

        let rules = by_name
            .into_iter()
            .map(|(name, rule)| {
                let action = Action::from_str(&name).map_err(|_| MatrixValidationError::UnknownAction(name))?;
                Ok((action, rule))
            })
            .collect::<Result<_, MatrixValidationError>>()?;

        Ok(Self { rules })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatrixValidationError {
    #[error("permission matrix must be a JSON object keyed by action")]
    NotAnObject,
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("missing required action '{0}'")]
    MissingAction(Action),
    #[error("action '{action}' is missing phase '{}'", phase.matrix_key())]
    MissingPhase { action: Action, phase: EventPhase },
    #[error("invalid value at '{path}': {message}")]
    InvalidField { path: String, message: String },
}

impl MatrixValidationError {
    /// Dotted location of the gap, rooted at `permissions`.
    pub fn field(&self) -> String {
        match self {
            MatrixValidationError::NotAnObject => "permissions".to_string(),
            MatrixValidationError::UnknownAction(name) => format!("permissions.{name}"),
            MatrixValidationError::MissingAction(action) => format!("permissions.{action}"),
            MatrixValidationError::MissingPhase { action, phase } => {
                format!("permissions.{action}.{}", phase.matrix_key())
            }
            MatrixValidationError::InvalidField { path, .. } => format!("permissions.{path}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn default_json() -> Value {
        serde_json::to_value(PermissionMatrix::default()).unwrap()
    }

    #[test]
    fn default_matrix_covers_every_action() {
        let matrix = PermissionMatrix::default();
        for action in Action::ALL {
            assert!(matrix.rule(action).is_some(), "{action} missing from default");
        }
        let crew = matrix.rule(Action::EditCrewMember).unwrap();
        assert!(crew.requires_not_assigned);
        assert!(!crew.allows(EventPhase::AfterRegistration));
        let payment = matrix.rule(Action::ProcessPayment).unwrap();
        assert!(payment.allows(EventPhase::DuringRegistration));
        assert!(payment.allows(EventPhase::AfterRegistration));
        assert!(!payment.allows(EventPhase::AfterPaymentDeadline));
    }

    #[test]
    fn serialized_default_validates() {
        let validated = PermissionMatrix::validate(&default_json()).unwrap();
        assert_eq!(validated, PermissionMatrix::default());
    }

    #[test]
    fn action_names_round_trip_through_from_str() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
        }
        assert_eq!("edit_crew".parse::<Action>(), Err(UnknownAction("edit_crew".into())));
    }

    #[test]
    fn rejects_missing_action() {
        let mut value = default_json();
        value.as_object_mut().unwrap().remove("process_payment");
        let err = PermissionMatrix::validate(&value).unwrap_err();
        assert_eq!(err, MatrixValidationError::MissingAction(Action::ProcessPayment));
        assert_eq!(err.field(), "permissions.process_payment");
    }

    #[test]
    fn rejects_missing_phase() {
        let mut value = default_json();
        value["edit_boat_registration"]
            .as_object_mut()
            .unwrap()
            .remove("after_registration");
        let err = PermissionMatrix::validate(&value).unwrap_err();
        assert_eq!(
            err,
            MatrixValidationError::MissingPhase {
                action: Action::EditBoatRegistration,
                phase: EventPhase::AfterRegistration,
            }
        );
        assert!(err.to_string().contains("after_registration"));
    }

    #[test]
    fn rejects_wrong_types_with_path() {
        let mut value = default_json();
        value["view_data"]["before_registration"] = json!("yes");
        let err = PermissionMatrix::validate(&value).unwrap_err();
        assert_eq!(err.field(), "permissions.view_data.before_registration");

        let mut value = default_json();
        value["delete_crew_member"]["requires_not_assigned"] = json!(1);
        let err = PermissionMatrix::validate(&value).unwrap_err();
        assert_eq!(err.field(), "permissions.delete_crew_member.requires_not_assigned");
    }

    #[test]
    fn rejects_unknown_action_and_non_object() {
        let mut value = default_json();
        value["launch_rockets"] = default_json()["view_data"].clone();
        assert_eq!(
            PermissionMatrix::validate(&value).unwrap_err(),
            MatrixValidationError::UnknownAction("launch_rockets".into())
        );
        assert_eq!(
            PermissionMatrix::validate(&json!([1, 2])).unwrap_err(),
            MatrixValidationError::NotAnObject
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_rule() -> impl Strategy<Value = ActionRule> {
            (any::<[bool; 4]>(), proptest::option::of(any::<bool>()), proptest::option::of(any::<bool>())).prop_map(
                |(p, assigned, paid)| ActionRule {
                    before_registration: p[0],
                    during_registration: p[1],
                    after_registration: p[2],
                    after_payment_deadline: p[3],
                    requires_not_assigned: assigned.unwrap_or(false),
                    requires_not_paid: paid.unwrap_or(false),
                },
            )
        }

        fn arb_matrix_json() -> impl Strategy<Value = Value> {
            proptest::collection::vec(arb_rule(), 9).prop_map(|rules| {
                let mut map = serde_json::Map::new();
                for (action, rule) in Action::ALL.iter().zip(rules) {
                    map.insert(action.to_string(), serde_json::to_value(rule).unwrap());
                }
                Value::Object(map)
            })
        }

        proptest! {
            #[test]
            fn complete_matrices_are_accepted(value in arb_matrix_json()) {
                prop_assert!(PermissionMatrix::validate(&value).is_ok());
            }

            #[test]
            fn dropping_any_action_names_it(value in arb_matrix_json(), idx in 0usize..9) {
                let mut value = value;
                let action = Action::ALL[idx];
                value.as_object_mut().unwrap().remove(action.as_str());
                prop_assert_eq!(
                    PermissionMatrix::validate(&value).unwrap_err(),
                    MatrixValidationError::MissingAction(action)
                );
            }

            #[test]
            fn dropping_any_phase_names_it(value in arb_matrix_json(), idx in 0usize..9, phase_idx in 0usize..4) {
                let mut value = value;
                let action = Action::ALL[idx];
                let phase = EventPhase::ALL[phase_idx];
                value[action.as_str()].as_object_mut().unwrap().remove(phase.matrix_key());
                let err = PermissionMatrix::validate(&value).unwrap_err();
                prop_assert_eq!(err, MatrixValidationError::MissingPhase { action, phase });
            }
        }
    }
}
