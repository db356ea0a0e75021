//! Admin-side mutation of the configuration the checker reads.

use std::sync::Arc;

use serde_json::Value;

use super::audit::AuditLog;
use super::grants::MAX_GRANT_HOURS;
use super::matrix::PermissionMatrix;
use super::phase::{parse_boundary, Boundary};
use crate::db::{self, keys, ConfigStore, StoreResult};
use crate::errors::{AppError, AppResult};
use crate::models::system_config::{SystemConfig, SystemConfigUpdateRequest};

pub mod change_types {
    pub const PERMISSIONS_UPDATED: &str = "permissions_updated";
    pub const PERMISSIONS_RESET: &str = "permissions_reset";
    pub const SYSTEM_CONFIG_UPDATED: &str = "system_config_updated";
}

pub struct MatrixAdmin {
    store: Arc<dyn ConfigStore>,
    audit: Arc<AuditLog>,
}

impl MatrixAdmin {
    pub fn new(store: Arc<dyn ConfigStore>, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }

    /// The stored matrix, or the built-in default when none is stored or the
    /// stored one no longer decodes.
    pub async fn get_permissions(&self) -> StoreResult<PermissionMatrix> {
        let Some(value) = self.store.get(&keys::permission_matrix()).await? else {
            return Ok(PermissionMatrix::default());
        };

        match PermissionMatrix::validate(&value) {
            Ok(matrix) => Ok(matrix),
            Err(err) => {
                tracing::warn!(error = %err, "stored permission matrix is invalid, using default");
                Ok(PermissionMatrix::default())
            }
        }
    }

    /// Matrix used for decisions. Only an absent matrix falls back to the
    /// default; an unreadable or invalid one yields `None` so the caller denies.
    pub async fn effective(&self) -> Option<PermissionMatrix> {
        let value = match self.store.get(&keys::permission_matrix()).await {
            Ok(Some(value)) => value,
            Ok(None) => return Some(PermissionMatrix::default()),
            Err(err) => {
                tracing::error!(error = %err, "failed to load permission matrix");
                return None;
            }
        };

        match PermissionMatrix::validate(&value) {
            Ok(matrix) => Some(matrix),
            Err(err) => {
                tracing::error!(error = %err, "stored permission matrix is invalid");
                None
            }
        }
    }

    pub async fn update_permissions(&self, admin_id: &str, candidate: &Value) -> AppResult<PermissionMatrix> {
        let matrix = PermissionMatrix::validate(candidate)?;
        self.replace(admin_id, matrix, change_types::PERMISSIONS_UPDATED).await
    }

    pub async fn reset_permissions(&self, admin_id: &str) -> AppResult<PermissionMatrix> {
        self.replace(admin_id, PermissionMatrix::default(), change_types::PERMISSIONS_RESET)
            .await
    }

    async fn replace(&self, admin_id: &str, matrix: PermissionMatrix, change_type: &str) -> AppResult<PermissionMatrix> {
        let previous = self.get_permissions().await?;
        db::save(self.store.as_ref(), &keys::permission_matrix(), &matrix).await?;

        tracing::info!(admin_id = %admin_id, change_type, "permission matrix replaced");
        self.audit
            .record_config_change(
                admin_id,
                change_type,
                serde_json::to_value(&previous).unwrap_or_default(),
                serde_json::to_value(&matrix).unwrap_or_default(),
            )
            .await;

        Ok(matrix)
    }
}

pub struct SystemConfigAdmin {
    store: Arc<dyn ConfigStore>,
    audit: Arc<AuditLog>,
}

impl SystemConfigAdmin {
    pub fn new(store: Arc<dyn ConfigStore>, audit: Arc<AuditLog>) -> Self {
        Self { store, audit }
    }

    pub async fn get(&self) -> StoreResult<SystemConfig> {
        Ok(db::load(self.store.as_ref(), &keys::system_config())
            .await?
            .unwrap_or_default())
    }

    /// Merge, validate and persist. Callers own invalidating any phase cache.
    pub async fn update(&self, admin_id: &str, update: SystemConfigUpdateRequest) -> AppResult<SystemConfig> {
        let previous = self.get().await?;
        let next = previous.merged(update);
        validate_system_config(&next)?;

        db::save(self.store.as_ref(), &keys::system_config(), &next).await?;
        tracing::info!(admin_id = %admin_id, "system config updated");
        self.audit
            .record_config_change(
                admin_id,
                change_types::SYSTEM_CONFIG_UPDATED,
                serde_json::to_value(&previous).unwrap_or_default(),
                serde_json::to_value(&next).unwrap_or_default(),
            )
            .await;

        Ok(next)
    }
}

pub fn validate_system_config(config: &SystemConfig) -> AppResult<()> {
    let parse = |field: &str, raw: Option<&String>, boundary: Boundary| -> AppResult<_> {
        raw.map(|raw| {
            parse_boundary(raw, boundary)
                .ok_or_else(|| AppError::validation(field, format!("'{raw}' is not a date (YYYY-MM-DD) or RFC 3339 datetime")))
        })
        .transpose()
    };

    let start = parse("registration_start_date", config.registration_start_date.as_ref(), Boundary::Opening)?;
    let end = parse("registration_end_date", config.registration_end_date.as_ref(), Boundary::Closing)?;
    let deadline = parse("payment_deadline", config.payment_deadline.as_ref(), Boundary::Closing)?;

    if let (Some(start), Some(end)) = (start, end) {
        if start > end {
            return Err(AppError::validation(
                "registration_end_date",
                "registration end must not precede registration start",
            ));
        }
    }
    if let (Some(end), Some(deadline)) = (end, deadline) {
        if end > deadline {
            return Err(AppError::validation(
                "payment_deadline",
                "payment deadline must not precede registration end",
            ));
        }
    }

    if let Some(hours) = config.temporary_editing_access_hours {
        if !(1..=MAX_GRANT_HOURS).contains(&hours) {
            return Err(AppError::validation(
                "temporary_editing_access_hours",
                format!("must be between 1 and {MAX_GRANT_HOURS}"),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::matrix::Action;
    use crate::db::MemoryConfigStore;
    use crate::utils::ManualClock;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<MemoryConfigStore>, Arc<AuditLog>, MatrixAdmin, SystemConfigAdmin) {
        let store = Arc::new(MemoryConfigStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 10, 8, 0, 0).unwrap()));
        let audit = Arc::new(AuditLog::new(store.clone(), clock));
        let matrix = MatrixAdmin::new(store.clone(), audit.clone());
        let system = SystemConfigAdmin::new(store.clone(), audit.clone());
        (store, audit, matrix, system)
    }

    #[tokio::test]
    async fn returns_default_when_nothing_stored() {
        let (_, _, admin, _) = setup();
        assert_eq!(admin.get_permissions().await.unwrap(), PermissionMatrix::default());
    }

    #[tokio::test]
    async fn update_persists_and_audits() {
        let (_, audit, admin, _) = setup();
        let mut value = serde_json::to_value(PermissionMatrix::default()).unwrap();
        value["create_crew_member"]["after_registration"] = Value::Bool(true);

        let updated = admin.update_permissions("admin-1", &value).await.unwrap();
        assert!(updated.rule(Action::CreateCrewMember).unwrap().after_registration);
        assert_eq!(admin.get_permissions().await.unwrap(), updated);

        let changes = audit.list_config_changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, change_types::PERMISSIONS_UPDATED);
        assert_eq!(changes[0].previous["create_crew_member"]["after_registration"], false);
    }

    #[tokio::test]
    async fn invalid_update_leaves_store_untouched() {
        let (store, _, admin, _) = setup();
        let mut value = serde_json::to_value(PermissionMatrix::default()).unwrap();
        value.as_object_mut().unwrap().remove("export_data");

        let err = admin.update_permissions("admin-1", &value).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "permissions.export_data"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reset_restores_default() {
        let (_, audit, admin, _) = setup();
        let mut value = serde_json::to_value(PermissionMatrix::default()).unwrap();
        value["view_data"]["before_registration"] = Value::Bool(false);
        admin.update_permissions("admin-1", &value).await.unwrap();

        let reset = admin.reset_permissions("admin-2").await.unwrap();
        assert_eq!(reset, PermissionMatrix::default());
        assert_eq!(admin.get_permissions().await.unwrap(), PermissionMatrix::default());
        assert_eq!(audit.list_config_changes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn effective_matrix_is_unavailable_during_outage() {
        let (store, _, admin, _) = setup();
        assert_eq!(admin.effective().await, Some(PermissionMatrix::default()));

        store.set_unavailable(true);
        assert_eq!(admin.effective().await, None);
    }

    #[tokio::test]
    async fn invalid_stored_matrix_is_not_effective() {
        let (store, _, admin, _) = setup();
        store
            .put(&keys::permission_matrix(), &serde_json::json!({"view_data": "yes"}))
            .await
            .unwrap();

        assert_eq!(admin.effective().await, None);
        assert_eq!(admin.get_permissions().await.unwrap(), PermissionMatrix::default());
    }

    #[tokio::test]
    async fn system_config_update_merges_and_validates() {
        let (_, audit, _, system) = setup();
        let saved = system
            .update(
                "admin-1",
                SystemConfigUpdateRequest {
                    registration_start_date: Some("2025-03-01".into()),
                    registration_end_date: Some("2025-04-15".into()),
                    payment_deadline: Some("2025-05-01T18:00:00Z".into()),
                    temporary_editing_access_hours: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.registration_end_date.as_deref(), Some("2025-04-15"));

        let saved = system
            .update(
                "admin-1",
                SystemConfigUpdateRequest {
                    registration_start_date: None,
                    registration_end_date: None,
                    payment_deadline: None,
                    temporary_editing_access_hours: Some(24),
                },
            )
            .await
            .unwrap();
        assert_eq!(saved.registration_start_date.as_deref(), Some("2025-03-01"));
        assert_eq!(saved.temporary_editing_access_hours, Some(24));
        assert_eq!(audit.list_config_changes().await.unwrap().len(), 2);

        let err = system
            .update(
                "admin-1",
                SystemConfigUpdateRequest {
                    registration_start_date: None,
                    registration_end_date: Some("2025-06-01".into()),
                    payment_deadline: None,
                    temporary_editing_access_hours: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "payment_deadline"));
    }

    #[test]
    fn rejects_unparseable_dates() {
        let config = SystemConfig {
            registration_start_date: Some("March 1st".into()),
            ..SystemConfig::default()
        };
        let err = validate_system_config(&config).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "registration_start_date"));
    }
}
