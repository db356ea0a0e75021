//! Time-boxed temporary access grants issued by admins.
//!
//! One grant per user, keyed by user id. `active` lapses to `expired` lazily:
//! whichever read first observes `now > expiration_timestamp` rewrites the record.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::db::{self, keys, ConfigStore, SortKeyRange, StoreError, StoreResult};
use crate::errors::AppError;
use crate::models::system_config::SystemConfig;
use crate::utils::Clock;

pub const MAX_GRANT_HOURS: i64 = 720;

const WRITE_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum GrantStatus {
    Active,
    Expired,
    Revoked,
}

impl std::str::FromStr for GrantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GrantStatus::Active),
            "expired" => Ok(GrantStatus::Expired),
            "revoked" => Ok(GrantStatus::Revoked),
            other => Err(format!("unknown grant status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TemporaryAccessGrant {
    pub user_id: String,
    pub grant_timestamp: DateTime<Utc>,
    pub expiration_timestamp: DateTime<Utc>,
    pub granted_by_admin_id: String,
    pub status: GrantStatus,
    pub hours: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoked_by_admin_id: Option<String>,
}

impl TemporaryAccessGrant {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && now <= self.expiration_timestamp
    }

    fn has_lapsed_at(&self, now: DateTime<Utc>) -> bool {
        self.status == GrantStatus::Active && now > self.expiration_timestamp
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("hours must be between 1 and 720, got {0}")]
    InvalidHours(i64),
    #[error("no temporary access grant for user {0}")]
    NotFound(String),
    #[error("temporary access grant for user {0} kept changing")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GrantError> for AppError {
    fn from(value: GrantError) -> Self {
        match value {
            GrantError::InvalidHours(_) => AppError::validation("hours", value.to_string()),
            GrantError::NotFound(_) => AppError::not_found(value.to_string()),
            GrantError::Conflict(_) => AppError::Internal(value.to_string()),
            GrantError::Store(err) => AppError::Store(err),
        }
    }
}

pub struct GrantStore {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    fallback_hours: i64,
}

impl GrantStore {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, fallback_hours: i64) -> Self {
        Self {
            store,
            clock,
            fallback_hours,
        }
    }

    /// Create or overwrite the grant for `user_id`. `hours` defaults to the
    /// configured `temporary_editing_access_hours`.
    pub async fn grant(
        &self,
        user_id: &str,
        admin_id: &str,
        hours: Option<i64>,
    ) -> Result<TemporaryAccessGrant, GrantError> {
        let hours = match hours {
            Some(hours) => hours,
            None => self.default_hours().await,
        };
        if !(1..=MAX_GRANT_HOURS).contains(&hours) {
            return Err(GrantError::InvalidHours(hours));
        }

        let now = self.clock.now();
        let grant = TemporaryAccessGrant {
            user_id: user_id.to_string(),
            grant_timestamp: now,
            expiration_timestamp: now + Duration::hours(hours),
            granted_by_admin_id: admin_id.to_string(),
            status: GrantStatus::Active,
            hours,
            revoked_at: None,
            revoked_by_admin_id: None,
        };

        db::save(self.store.as_ref(), &keys::temporary_access(user_id), &grant).await?;
        tracing::info!(user_id = %user_id, admin_id = %admin_id, hours, "temporary access granted");

        Ok(grant)
    }

    /// Revoke regardless of current status; revocation is terminal. The write
    /// only lands on the record that was read, so a concurrent re-grant is
    /// revoked on the next attempt rather than overwritten with stale fields.
    pub async fn revoke(&self, user_id: &str, admin_id: &str) -> Result<TemporaryAccessGrant, GrantError> {
        let key = keys::temporary_access(user_id);

        for _ in 0..WRITE_ATTEMPTS {
            let raw = self
                .store
                .get(&key)
                .await?
                .ok_or_else(|| GrantError::NotFound(user_id.to_string()))?;
            let mut grant: TemporaryAccessGrant = serde_json::from_value(raw.clone()).map_err(StoreError::from)?;

            grant.status = GrantStatus::Revoked;
            grant.revoked_at = Some(self.clock.now());
            grant.revoked_by_admin_id = Some(admin_id.to_string());

            let data = serde_json::to_value(&grant).map_err(StoreError::from)?;
            if self.store.put_if_match(&key, &raw, &data).await? {
                tracing::info!(user_id = %user_id, admin_id = %admin_id, "temporary access revoked");
                return Ok(grant);
            }
            tracing::debug!(user_id = %user_id, "grant changed while revoking, retrying");
        }

        Err(GrantError::Conflict(user_id.to_string()))
    }

    pub async fn get(&self, user_id: &str) -> StoreResult<Option<TemporaryAccessGrant>> {
        let Some(raw) = self.store.get(&keys::temporary_access(user_id)).await? else {
            return Ok(None);
        };
        let grant: TemporaryAccessGrant = serde_json::from_value(raw.clone())?;
        Ok(Some(self.expire_if_lapsed(raw, grant, self.clock.now()).await))
    }

    /// All grants, optionally filtered by status, with lapsed grants rewritten to `expired`.
    pub async fn list(&self, status: Option<GrantStatus>) -> StoreResult<Vec<TemporaryAccessGrant>> {
        let items = self
            .store
            .query(keys::TEMP_ACCESS_PARTITION, &SortKeyRange::all())
            .await?;
        let now = self.clock.now();

        let mut grants = Vec::with_capacity(items.len());
        for item in items {
            let grant: TemporaryAccessGrant = match serde_json::from_value(item.data.clone()) {
                Ok(grant) => grant,
                Err(err) => {
                    tracing::warn!(key = %item.key.sk, error = %err, "skipping unreadable grant record");
                    continue;
                }
            };
            let grant = self.expire_if_lapsed(item.data, grant, now).await;
            if status.map_or(true, |wanted| grant.status == wanted) {
                grants.push(grant);
            }
        }

        Ok(grants)
    }

    /// True only for an existing, `active`, unexpired grant. Lookup failures count as no grant.
    pub async fn is_active(&self, user_id: &str) -> bool {
        match self.get(user_id).await {
            Ok(Some(grant)) => grant.is_active_at(self.clock.now()),
            Ok(None) => false,
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "grant lookup failed, treating as no grant");
                false
            }
        }
    }

    async fn default_hours(&self) -> i64 {
        match db::load::<SystemConfig>(self.store.as_ref(), &keys::system_config()).await {
            Ok(Some(SystemConfig {
                temporary_editing_access_hours: Some(hours),
                ..
            })) => hours,
            Ok(_) => self.fallback_hours,
            Err(err) => {
                tracing::warn!(error = %err, "could not read default grant duration, using fallback");
                self.fallback_hours
            }
        }
    }

    /// Persist `active -> expired` for a lapsed grant, conditional on `raw` still
    /// being the stored record. If it changed (an admin re-granted meanwhile),
    /// the current record is returned untouched.
    async fn expire_if_lapsed(&self, raw: Value, mut grant: TemporaryAccessGrant, now: DateTime<Utc>) -> TemporaryAccessGrant {
        if !grant.has_lapsed_at(now) {
            return grant;
        }

        grant.status = GrantStatus::Expired;
        let key = keys::temporary_access(&grant.user_id);
        let data = match serde_json::to_value(&grant) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(user_id = %grant.user_id, error = %err, "failed to encode lapsed grant");
                return grant;
            }
        };

        match self.store.put_if_match(&key, &raw, &data).await {
            Ok(true) => {
                tracing::info!(user_id = %grant.user_id, "temporary access expired");
                grant
            }
            Ok(false) => match db::load::<TemporaryAccessGrant>(self.store.as_ref(), &key).await {
                Ok(Some(current)) => {
                    tracing::debug!(user_id = %grant.user_id, "grant replaced before expiry was written");
                    current
                }
                Ok(None) => grant,
                Err(err) => {
                    tracing::warn!(user_id = %grant.user_id, error = %err, "failed to reload replaced grant");
                    grant
                }
            },
            Err(err) => {
                tracing::warn!(user_id = %grant.user_id, error = %err, "failed to persist lapsed grant");
                grant
            }
        }
    }
}
