use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    TeamManager,
    Devops,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::TeamManager => "team_manager",
            Role::Devops => "devops",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "team_manager" => Ok(Role::TeamManager),
            "devops" => Ok(Role::Devops),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// The caller of a permission check, rebuilt for every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserContext {
    pub user_id: String,
    pub role: Role,
    pub is_impersonating: bool,
    pub has_temporary_access: bool,
    /// The impersonated team manager, or the identity a grant is bound to.
    pub team_manager_id: Option<String>,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            is_impersonating: false,
            has_temporary_access: false,
            team_manager_id: None,
        }
    }

    pub fn team_manager(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            team_manager_id: Some(user_id.clone()),
            ..Self::new(user_id, Role::TeamManager)
        }
    }

    /// An admin acting as `team_manager_id`.
    pub fn impersonating(mut self, team_manager_id: impl Into<String>) -> Self {
        self.is_impersonating = true;
        self.team_manager_id = Some(team_manager_id.into());
        self
    }

    pub fn with_temporary_access(mut self, has_temporary_access: bool) -> Self {
        self.has_temporary_access = has_temporary_access;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// State of the already-loaded entity that data-state guards inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceState {
    CrewMember { assigned: bool },
    BoatRegistration { paid: bool },
    Payment,
    /// Resource not yet created, or carrying no guarded state.
    None,
}

impl Default for ResourceState {
    fn default() -> Self {
        ResourceState::None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ResourceContext {
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub resource_state: ResourceState,
}

impl ResourceContext {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            resource_id: None,
            resource_state: ResourceState::None,
        }
    }

    pub fn with_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_state(mut self, state: ResourceState) -> Self {
        self.resource_state = state;
        self
    }

    pub fn crew_member(resource_id: impl Into<String>, assigned: bool) -> Self {
        Self::new("crew_member")
            .with_id(resource_id)
            .with_state(ResourceState::CrewMember { assigned })
    }

    pub fn boat_registration(resource_id: impl Into<String>, paid: bool) -> Self {
        Self::new("boat_registration")
            .with_id(resource_id)
            .with_state(ResourceState::BoatRegistration { paid })
    }

    pub fn payment() -> Self {
        Self::new("payment").with_state(ResourceState::Payment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impersonation_keeps_admin_identity() {
        let acting = UserContext::new("admin-1", Role::Admin).impersonating("tm-7");
        assert_eq!(acting.user_id, "admin-1");
        assert_eq!(acting.team_manager_id.as_deref(), Some("tm-7"));
        assert!(acting.is_impersonating);
        assert!(acting.is_admin());
    }

    #[test]
    fn resource_state_decodes_tagged_json() {
        let ctx: ResourceContext = serde_json::from_value(serde_json::json!({
            "resource_type": "boat_registration",
            "resource_id": "b-1",
            "resource_state": {"kind": "boat_registration", "paid": true}
        }))
        .unwrap();
        assert_eq!(ctx, ResourceContext::boat_registration("b-1", true));

        let bare: ResourceContext = serde_json::from_value(serde_json::json!({"resource_type": "crew_member"})).unwrap();
        assert_eq!(bare.resource_state, ResourceState::None);
    }
}
