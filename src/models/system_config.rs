use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Singleton system configuration record (`CONFIG` / `SYSTEM`).
///
/// Dates are kept as the raw strings admins entered; they are parsed at
/// resolution time so a malformed value fails closed instead of failing the write path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SystemConfig {
    #[schema(example = "2025-03-01")]
    pub registration_start_date: Option<String>,
    #[schema(example = "2025-04-15")]
    pub registration_end_date: Option<String>,
    #[schema(example = "2025-05-01T18:00:00Z")]
    pub payment_deadline: Option<String>,
    #[schema(example = 48)]
    pub temporary_editing_access_hours: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SystemConfigUpdateRequest {
    pub registration_start_date: Option<String>,
    pub registration_end_date: Option<String>,
    pub payment_deadline: Option<String>,
    pub temporary_editing_access_hours: Option<i64>,
}

impl SystemConfig {
    /// Apply the fields present in `update`, keeping the others.
    pub fn merged(&self, update: SystemConfigUpdateRequest) -> Self {
        Self {
            registration_start_date: update.registration_start_date.or_else(|| self.registration_start_date.clone()),
            registration_end_date: update.registration_end_date.or_else(|| self.registration_end_date.clone()),
            payment_deadline: update.payment_deadline.or_else(|| self.payment_deadline.clone()),
            temporary_editing_access_hours: update
                .temporary_editing_access_hours
                .or(self.temporary_editing_access_hours),
        }
    }
}
