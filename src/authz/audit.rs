//! Append-only audit trail for permission denials, bypasses and configuration changes.
//!
//! Writes never fail the caller: errors are logged and the record is dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use super::decision::{BypassReason, DenialReason};
use super::principal::{ResourceContext, ResourceState, UserContext};
use crate::db::{keys, ConfigStore, SortKeyRange, StoreKey, StoreResult, StoredItem};
use crate::errors::AppError;
use crate::utils::{sort_key_timestamp, Clock};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLogType {
    PermissionDenial,
    PermissionBypass,
}

impl AuditLogType {
    pub fn partition(&self) -> &'static str {
        match self {
            AuditLogType::PermissionDenial => keys::AUDIT_DENIAL_PARTITION,
            AuditLogType::PermissionBypass => keys::AUDIT_BYPASS_PARTITION,
        }
    }

    fn from_partition(pk: &str) -> Option<Self> {
        match pk {
            keys::AUDIT_DENIAL_PARTITION => Some(AuditLogType::PermissionDenial),
            keys::AUDIT_BYPASS_PARTITION => Some(AuditLogType::PermissionBypass),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DenialRecord {
    pub user_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub denial_reason: String,
    pub denial_reason_key: String,
    #[schema(value_type = Object)]
    pub resource_state: ResourceState,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct BypassRecord {
    pub user_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub bypass_reason: BypassReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub impersonated_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "log_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditRecord {
    PermissionDenial(DenialRecord),
    PermissionBypass(BypassRecord),
}

impl AuditRecord {
    pub fn log_type(&self) -> AuditLogType {
        match self {
            AuditRecord::PermissionDenial(_) => AuditLogType::PermissionDenial,
            AuditRecord::PermissionBypass(_) => AuditLogType::PermissionBypass,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            AuditRecord::PermissionDenial(r) => &r.user_id,
            AuditRecord::PermissionBypass(r) => &r.user_id,
        }
    }

    pub fn action(&self) -> &str {
        match self {
            AuditRecord::PermissionDenial(r) => &r.action,
            AuditRecord::PermissionBypass(r) => &r.action,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            AuditRecord::PermissionDenial(r) => r.timestamp,
            AuditRecord::PermissionBypass(r) => r.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ConfigChangeRecord {
    pub admin_id: String,
    pub change_type: String,
    #[schema(value_type = Object)]
    pub previous: Value,
    #[schema(value_type = Object)]
    pub current: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditLogQuery {
    pub log_type: Option<AuditLogType>,
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditLogPage {
    #[schema(value_type = Vec<Object>)]
    pub items: Vec<AuditRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

const APPEND_ATTEMPTS: usize = 3;

pub struct AuditLog {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    sequence: AtomicU64,
}

impl AuditLog {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn record_denial(
        &self,
        user: &UserContext,
        action: &str,
        resource: &ResourceContext,
        reason: &DenialReason,
    ) {
        let timestamp = self.clock.now();
        let record = AuditRecord::PermissionDenial(DenialRecord {
            user_id: user.user_id.clone(),
            action: action.to_string(),
            resource_type: resource.resource_type.clone(),
            resource_id: resource.resource_id.clone(),
            denial_reason: reason.message(),
            denial_reason_key: reason.key(),
            resource_state: resource.resource_state,
            timestamp,
        });
        self.append(keys::AUDIT_DENIAL_PARTITION, timestamp, &user.user_id, &record)
            .await;
    }

    pub async fn record_bypass(
        &self,
        user: &UserContext,
        action: &str,
        resource: &ResourceContext,
        bypass_reason: BypassReason,
    ) {
        let timestamp = self.clock.now();
        let impersonated_user_id = match bypass_reason {
            BypassReason::Impersonation => user.team_manager_id.clone(),
            BypassReason::TemporaryAccess => None,
        };
        let record = AuditRecord::PermissionBypass(BypassRecord {
            user_id: user.user_id.clone(),
            action: action.to_string(),
            resource_type: resource.resource_type.clone(),
            resource_id: resource.resource_id.clone(),
            bypass_reason,
            impersonated_user_id,
            timestamp,
        });
        self.append(keys::AUDIT_BYPASS_PARTITION, timestamp, &user.user_id, &record)
            .await;
    }

    pub async fn record_config_change(&self, admin_id: &str, change_type: &str, previous: Value, current: Value) {
        let timestamp = self.clock.now();
        let record = ConfigChangeRecord {
            admin_id: admin_id.to_string(),
            change_type: change_type.to_string(),
            previous,
            current,
            timestamp,
        };
        self.append(keys::AUDIT_CONFIG_CHANGE_PARTITION, timestamp, admin_id, &record)
            .await;
    }

    /// Sort keys are `{timestamp}#{user_id}#{sequence}`: chronological, and
    /// distinct for writes by one user within the same microsecond.
    async fn append<T: Serialize>(&self, partition: &str, timestamp: DateTime<Utc>, user_id: &str, record: &T) {
        let value = match serde_json::to_value(record) {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(partition, user_id, error = %err, "failed to serialize audit record");
                return;
            }
        };

        for _ in 0..APPEND_ATTEMPTS {
            let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
            let key = StoreKey::new(
                partition,
                format!("{}#{}#{:016x}", sort_key_timestamp(timestamp), user_id, seq),
            );
            match self.store.put_if_absent(&key, &value).await {
                Ok(true) => {
                    tracing::debug!(partition, user_id, "audit record written");
                    return;
                }
                Ok(false) => tracing::debug!(partition, user_id, sk = %key.sk, "audit key taken, retrying"),
                Err(err) => {
                    tracing::error!(partition, user_id, error = %err, "failed to write audit record");
                    return;
                }
            }
        }
        tracing::error!(partition, user_id, "no free audit key, record dropped");
    }

    /// Chronological listing of denial and bypass records. Each partition is
    /// read in batches of one page plus one row, starting after the cursor.
    pub async fn list(&self, query: &AuditLogQuery) -> Result<AuditLogPage, AppError> {
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(AppError::validation("limit", format!("limit must be between 1 and {MAX_PAGE_SIZE}")));
        }

        let cursor = query.next_token.as_deref().map(decode_token).transpose()?;
        let types = match query.log_type {
            Some(log_type) => vec![log_type],
            None => vec![AuditLogType::PermissionDenial, AuditLogType::PermissionBypass],
        };

        let base = SortKeyRange {
            from: query.from.map(sort_key_timestamp),
            // Past every `#user_id#sequence` suffix stamped at `to`.
            to: query.to.map(|to| format!("{}#\u{10ffff}", sort_key_timestamp(to))),
            after: None,
            limit: Some(limit + 1),
        };

        let mut scans: Vec<PartitionScan> = types
            .into_iter()
            .map(|log_type| {
                let pk = log_type.partition();
                let mut range = base.clone();
                if let Some((cursor_pk, cursor_sk)) = &cursor {
                    // Pages are ordered by (sk, pk): a later partition may still hold the cursor's sk.
                    if pk > cursor_pk.as_str() {
                        range.from = Some(match range.from {
                            Some(from) if from > *cursor_sk => from,
                            _ => cursor_sk.clone(),
                        });
                    } else {
                        range.after = Some(cursor_sk.clone());
                    }
                }
                PartitionScan::new(pk, range)
            })
            .collect();

        let mut items = Vec::new();
        let mut last_key = None;
        let mut has_more = false;
        loop {
            for scan in scans.iter_mut() {
                scan.fill(self.store.as_ref()).await?;
            }
            let next = scans
                .iter()
                .enumerate()
                .filter_map(|(idx, scan)| scan.buffer.front().map(|row| (idx, (&row.key.sk, &row.key.pk))))
                .min_by(|a, b| a.1.cmp(&b.1))
                .map(|(idx, _)| idx);
            let Some(row) = next.and_then(|idx| scans[idx].buffer.pop_front()) else {
                break;
            };

            let record: AuditRecord = match serde_json::from_value(row.data) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(sk = %row.key.sk, error = %err, "skipping unreadable audit record");
                    continue;
                }
            };
            if !matches_filters(&record, query) {
                continue;
            }
            if items.len() == limit {
                has_more = true;
                break;
            }
            last_key = Some(row.key);
            items.push(record);
        }

        let next_token = match (has_more, last_key) {
            (true, Some(key)) => Some(encode_token(&key)),
            _ => None,
        };

        Ok(AuditLogPage { items, next_token })
    }

    pub async fn list_config_changes(&self) -> StoreResult<Vec<ConfigChangeRecord>> {
        let items = self
            .store
            .query(keys::AUDIT_CONFIG_CHANGE_PARTITION, &SortKeyRange::all())
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item.data).ok())
            .collect())
    }
}

/// Batched forward read of one audit partition.
struct PartitionScan {
    pk: &'static str,
    range: SortKeyRange,
    buffer: VecDeque<StoredItem>,
    exhausted: bool,
}

impl PartitionScan {
    fn new(pk: &'static str, range: SortKeyRange) -> Self {
        Self {
            pk,
            range,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn fill(&mut self, store: &dyn ConfigStore) -> StoreResult<()> {
        if self.exhausted || !self.buffer.is_empty() {
            return Ok(());
        }
        let rows = store.query(self.pk, &self.range).await?;
        if rows.len() < self.range.limit.unwrap_or(usize::MAX) {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.range.after = Some(last.key.sk.clone());
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

fn matches_filters(record: &AuditRecord, query: &AuditLogQuery) -> bool {
    query.user_id.as_deref().map_or(true, |user| record.user_id() == user)
        && query.action.as_deref().map_or(true, |action| record.action() == action)
}

fn encode_token(key: &StoreKey) -> String {
    hex::encode(format!("{}\n{}", key.pk, key.sk))
}

fn decode_token(token: &str) -> Result<(String, String), AppError> {
    let invalid = || AppError::validation("next_token", "malformed continuation token");
    let bytes = hex::decode(token).map_err(|_| invalid())?;
    let raw = String::from_utf8(bytes).map_err(|_| invalid())?;
    let (pk, sk) = raw.split_once('\n').ok_or_else(invalid)?;
    AuditLogType::from_partition(pk).ok_or_else(invalid)?;
    Ok((pk.to_string(), sk.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authz::principal::Role;
    use crate::db::MemoryConfigStore;
    use crate::utils::ManualClock;
    use chrono::{Duration, TimeZone};

    fn setup() -> (Arc<MemoryConfigStore>, Arc<ManualClock>, AuditLog) {
        let store = Arc::new(MemoryConfigStore::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 20, 9, 0, 0).unwrap()));
        let log = AuditLog::new(store.clone(), clock.clone());
        (store, clock, log)
    }

    async fn seed(log: &AuditLog, clock: &ManualClock) {
        let tm = UserContext::team_manager("tm-1");
        let other = UserContext::team_manager("tm-2");
        let admin = UserContext::new("admin-1", Role::Admin).impersonating("tm-1");
        let boat = ResourceContext::boat_registration("b-1", true);

        log.record_denial(&tm, "edit_boat_registration", &boat, &DenialReason::BoatPaid).await;
        clock.advance(Duration::seconds(1));
        log.record_bypass(&admin, "edit_boat_registration", &boat, BypassReason::Impersonation).await;
        clock.advance(Duration::seconds(1));
        log.record_denial(&other, "create_crew_member", &ResourceContext::new("crew_member"), &DenialReason::RegistrationClosed)
            .await;
        clock.advance(Duration::seconds(1));
        log.record_bypass(&tm, "create_crew_member", &ResourceContext::new("crew_member"), BypassReason::TemporaryAccess)
            .await;
    }

    #[tokio::test]
    async fn lists_both_streams_chronologically() {
        let (_, clock, log) = setup();
        seed(&log, &clock).await;

        let page = log.list(&AuditLogQuery::default()).await.unwrap();
        let types: Vec<_> = page.items.iter().map(AuditRecord::log_type).collect();
        assert_eq!(
            types,
            vec![
                AuditLogType::PermissionDenial,
                AuditLogType::PermissionBypass,
                AuditLogType::PermissionDenial,
                AuditLogType::PermissionBypass,
            ]
        );
        assert!(page.next_token.is_none());
    }

    #[tokio::test]
    async fn impersonated_user_only_on_impersonation_bypass() {
        let (_, clock, log) = setup();
        seed(&log, &clock).await;

        let page = log
            .list(&AuditLogQuery {
                log_type: Some(AuditLogType::PermissionBypass),
                ..Default::default()
            })
            .await
            .unwrap();
        match (&page.items[0], &page.items[1]) {
            (AuditRecord::PermissionBypass(first), AuditRecord::PermissionBypass(second)) => {
                assert_eq!(first.bypass_reason, BypassReason::Impersonation);
                assert_eq!(first.impersonated_user_id.as_deref(), Some("tm-1"));
                assert_eq!(second.bypass_reason, BypassReason::TemporaryAccess);
                assert_eq!(second.impersonated_user_id, None);
            }
            other => panic!("unexpected records: {other:?}"),
        }
    }

    #[tokio::test]
    async fn filters_by_user_action_and_date() {
        let (_, clock, log) = setup();
        let start = clock.now();
        seed(&log, &clock).await;

        let by_user = log
            .list(&AuditLogQuery {
                user_id: Some("tm-1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.items.len(), 2);

        let by_action = log
            .list(&AuditLogQuery {
                action: Some("create_crew_member".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_action.items.len(), 2);

        let window = log
            .list(&AuditLogQuery {
                from: Some(start + Duration::seconds(1)),
                to: Some(start + Duration::seconds(2)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(window.items.len(), 2);
        assert_eq!(window.items[0].timestamp(), start + Duration::seconds(1));
    }

    #[tokio::test]
    async fn paginates_with_continuation_token() {
        let (_, clock, log) = setup();
        seed(&log, &clock).await;

        let mut seen = Vec::new();
        let mut token = None;
        loop {
            let page = log
                .list(&AuditLogQuery {
                    limit: Some(3),
                    next_token: token.clone(),
                    ..Default::default()
                })
                .await
                .unwrap();
            seen.extend(page.items.iter().map(AuditRecord::timestamp));
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(seen.len(), 4);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn single_row_pages_walk_both_partitions_in_order() {
        let (_, clock, log) = setup();
        seed(&log, &clock).await;
        let everything = log.list(&AuditLogQuery::default()).await.unwrap().items;

        for user_id in [None, Some("tm-1".to_string())] {
            let mut seen = Vec::new();
            let mut token = None;
            loop {
                let page = log
                    .list(&AuditLogQuery {
                        user_id: user_id.clone(),
                        limit: Some(1),
                        next_token: token.clone(),
                        ..Default::default()
                    })
                    .await
                    .unwrap();
                assert!(page.items.len() <= 1);
                seen.extend(page.items);
                token = page.next_token;
                if token.is_none() {
                    break;
                }
            }
            let expected: Vec<_> = everything
                .iter()
                .filter(|r| user_id.as_deref().map_or(true, |u| r.user_id() == u))
                .cloned()
                .collect();
            assert_eq!(seen, expected);
        }
    }

    #[tokio::test]
    async fn rejects_bad_token_and_limit() {
        let (_, _, log) = setup();
        let bad_token = AuditLogQuery {
            next_token: Some("zz".into()),
            ..Default::default()
        };
        assert!(matches!(log.list(&bad_token).await, Err(AppError::Validation { field, .. }) if field == "next_token"));

        let bad_limit = AuditLogQuery {
            limit: Some(MAX_PAGE_SIZE + 1),
            ..Default::default()
        };
        assert!(log.list(&bad_limit).await.is_err());
    }

    #[tokio::test]
    async fn same_instant_writes_by_one_user_are_all_kept() {
        let (_, _, log) = setup();
        let tm = UserContext::team_manager("tm-1");
        let crew = ResourceContext::crew_member("cm-1", true);
        for _ in 0..3 {
            log.record_denial(&tm, "edit_crew_member", &crew, &DenialReason::CrewMemberAssigned).await;
        }
        log.record_config_change("admin-1", "permissions_reset", Value::Null, Value::Null).await;
        log.record_config_change("admin-1", "permissions_reset", Value::Null, Value::Null).await;

        let page = log.list(&AuditLogQuery::default()).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert_eq!(log.list_config_changes().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn write_failures_are_swallowed() {
        let (store, _, log) = setup();
        store.fail_writes_to(Some("AUDIT#"));
        log.record_denial(
            &UserContext::team_manager("tm-1"),
            "create_crew_member",
            &ResourceContext::new("crew_member"),
            &DenialReason::RegistrationClosed,
        )
        .await;
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn config_changes_are_recorded_separately() {
        let (_, _, log) = setup();
        log.record_config_change("admin-1", "permissions_reset", Value::Null, serde_json::json!({"a": 1}))
            .await;
        let changes = log.list_config_changes().await.unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].change_type, "permissions_reset");
        assert!(log.list(&AuditLogQuery::default()).await.unwrap().items.is_empty());
    }
}
