//! Event phase resolution.
//!
//! The phase is derived from three configured dates and never stored. Anything
//! missing, malformed, or unreadable resolves to the most restrictive phase.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::{self, keys, ConfigStore};
use crate::models::system_config::SystemConfig;
use crate::utils::Clock;

/// Temporal window relative to registration and payment dates, ordered from
/// least to most restrictive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPhase {
    BeforeRegistration,
    DuringRegistration,
    AfterRegistration,
    AfterPaymentDeadline,
}

impl EventPhase {
    pub const ALL: [EventPhase; 4] = [
        EventPhase::BeforeRegistration,
        EventPhase::DuringRegistration,
        EventPhase::AfterRegistration,
        EventPhase::AfterPaymentDeadline,
    ];

    /// Field name of this phase inside a permission matrix entry.
    pub fn matrix_key(&self) -> &'static str {
        match self {
            EventPhase::BeforeRegistration => "before_registration",
            EventPhase::DuringRegistration => "during_registration",
            EventPhase::AfterRegistration => "after_registration",
            EventPhase::AfterPaymentDeadline => "after_payment_deadline",
        }
    }

    pub fn most_restrictive() -> Self {
        EventPhase::AfterPaymentDeadline
    }
}

/// Which side of a window a date-only value describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    /// `YYYY-MM-DD` means the first instant of that day.
    Opening,
    /// `YYYY-MM-DD` means the last millisecond of that day.
    Closing,
}

/// Parse a configured date. Accepts RFC 3339 (`...Z` or offset), a zone-less
/// datetime taken as UTC, or a bare `YYYY-MM-DD`.
pub fn parse_boundary(raw: &str, boundary: Boundary) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let naive = match boundary {
        Boundary::Opening => date.and_hms_opt(0, 0, 0)?,
        Boundary::Closing => date.and_hms_nano_opt(23, 59, 59, 999_999_999)?,
    };
    Some(naive.and_utc())
}

/// Parsed registration window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDates {
    pub registration_start: DateTime<Utc>,
    pub registration_end: DateTime<Utc>,
    pub payment_deadline: DateTime<Utc>,
}

impl EventDates {
    pub fn from_config(config: &SystemConfig) -> Option<Self> {
        Some(Self {
            registration_start: parse_boundary(config.registration_start_date.as_deref()?, Boundary::Opening)?,
            registration_end: parse_boundary(config.registration_end_date.as_deref()?, Boundary::Closing)?,
            payment_deadline: parse_boundary(config.payment_deadline.as_deref()?, Boundary::Closing)?,
        })
    }

    pub fn phase_at(&self, now: DateTime<Utc>) -> EventPhase {
        if now < self.registration_start {
            EventPhase::BeforeRegistration
        } else if now <= self.registration_end {
            EventPhase::DuringRegistration
        } else if now <= self.payment_deadline {
            EventPhase::AfterRegistration
        } else {
            EventPhase::AfterPaymentDeadline
        }
    }
}

/// Pure resolution: `None` config or any unusable date fails closed.
pub fn resolve_phase(config: Option<&SystemConfig>, now: DateTime<Utc>) -> EventPhase {
    config
        .and_then(EventDates::from_config)
        .map(|dates| dates.phase_at(now))
        .unwrap_or_else(EventPhase::most_restrictive)
}

#[derive(Debug, Clone, Copy)]
struct CachedPhase {
    phase: EventPhase,
    cached_at: DateTime<Utc>,
}

/// Reads the system dates and resolves the current phase, caching the answer
/// for `ttl`. The cache is local to this instance.
pub struct PhaseResolver {
    store: Arc<dyn ConfigStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    cache: Mutex<Option<CachedPhase>>,
}

impl PhaseResolver {
    pub fn new(store: Arc<dyn ConfigStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub async fn current_phase(&self) -> EventPhase {
        let now = self.clock.now();

        if let Some(phase) = self.cached(now) {
            return phase;
        }

        match db::load::<SystemConfig>(self.store.as_ref(), &keys::system_config()).await {
            Ok(config) => {
                let phase = resolve_phase(config.as_ref(), now);
                if config.is_none() {
                    tracing::warn!("system config missing, resolving to most restrictive phase");
                }
                self.remember(phase, now);
                phase
            }
            Err(err) => {
                // Not cached, so the next check retries the store.
                tracing::error!(error = %err, "failed to read system config, failing closed");
                EventPhase::most_restrictive()
            }
        }
    }

    pub fn invalidate_cache(&self) {
        *self.lock() = None;
        tracing::debug!("event phase cache invalidated");
    }

    fn cached(&self, now: DateTime<Utc>) -> Option<EventPhase> {
        if self.ttl.is_zero() {
            return None;
        }
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        let cache = self.lock();
        let entry = cache.as_ref()?;
        let age = now - entry.cached_at;
        (age >= chrono::Duration::zero() && age < ttl).then_some(entry.phase)
    }

    fn remember(&self, phase: EventPhase, now: DateTime<Utc>) {
        if self.ttl.is_zero() {
            return;
        }
        *self.lock() = Some(CachedPhase { phase, cached_at: now });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<CachedPhase>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
