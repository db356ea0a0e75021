use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};

use crate::app::AppState;
use crate::authz::{Role, UserContext};
use crate::errors::AppError;

/// Header an admin sends to act as a team manager.
pub const IMPERSONATION_HEADER: &str = "x-impersonate-team-manager";

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;

        Ok(Self::new(secret, exp_hours))
    }

    pub fn new(secret: impl Into<String>, exp_hours: i64) -> Self {
        Self {
            secret: Arc::new(secret.into().into_bytes()),
            exp_hours,
        }
    }

    pub fn encode(&self, user_id: &str, role: Role) -> Result<String, AppError> {
        use chrono::{Duration, Utc};

        let now = Utc::now();
        let exp = now + Duration::hours(self.exp_hours);

        let claims = Claims {
            sub: user_id.to_string(),
            role,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
    pub iat: usize,
}

/// The authenticated caller as the permission engine sees it.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub context: UserContext,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;

        let impersonated = parts
            .headers
            .get(IMPERSONATION_HEADER)
            .map(|value| value.to_str().map(str::trim))
            .transpose()
            .map_err(|_| AppError::bad_request("impersonation header is not valid text"))?
            .filter(|value| !value.is_empty());

        let context = match (claims.role, impersonated) {
            (Role::Admin, Some(team_manager_id)) => {
                UserContext::new(claims.sub, Role::Admin).impersonating(team_manager_id)
            }
            (_, Some(_)) => return Err(AppError::forbidden("only admins may impersonate")),
            (Role::TeamManager, None) => {
                let has_grant = state.checker.grants().is_active(&claims.sub).await;
                UserContext::team_manager(claims.sub).with_temporary_access(has_grant)
            }
            (role, None) => UserContext::new(claims.sub, role),
        };

        Ok(AuthUser { context })
    }
}

/// An authenticated caller holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub admin_id: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let AuthUser { context } = AuthUser::from_request_parts(parts, state).await?;
        if !context.is_admin() {
            return Err(AppError::forbidden("admin role required"));
        }
        Ok(AdminUser {
            admin_id: context.user_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_role() {
        let config = JwtConfig::new("unit-secret", 1);
        let token = config.encode("tm-7", Role::TeamManager).unwrap();
        let claims = config.decode(&token).unwrap();
        assert_eq!(claims.sub, "tm-7");
        assert_eq!(claims.role, Role::TeamManager);
    }

    #[test]
    fn token_signed_with_other_secret_is_rejected() {
        let token = JwtConfig::new("one", 1).encode("a", Role::Admin).unwrap();
        assert!(matches!(JwtConfig::new("two", 1).decode(&token), Err(AppError::Token(_))));
    }
}
