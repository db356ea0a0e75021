use std::time::Duration;

use crate::errors::AppError;

const DEFAULT_PHASE_CACHE_TTL_SECONDS: u64 = 60;
const DEFAULT_TEMPORARY_ACCESS_HOURS: i64 = 48;

/// Process-level knobs for the access-control engine.
#[derive(Debug, Clone)]
pub struct AccessConfig {
    /// How long a resolved event phase is reused before the dates are read again.
    /// Zero disables the cache.
    pub phase_cache_ttl: Duration,
    /// Grant duration used when the system config record does not set
    /// `temporary_editing_access_hours`.
    pub default_temporary_access_hours: i64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            phase_cache_ttl: Duration::from_secs(DEFAULT_PHASE_CACHE_TTL_SECONDS),
            default_temporary_access_hours: DEFAULT_TEMPORARY_ACCESS_HOURS,
        }
    }
}

impl AccessConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let ttl_seconds = std::env::var("PHASE_CACHE_TTL_SECONDS")
            .map(|val| val.parse::<u64>())
            .unwrap_or(Ok(DEFAULT_PHASE_CACHE_TTL_SECONDS))
            .map_err(|_| AppError::configuration("PHASE_CACHE_TTL_SECONDS must be a non-negative integer"))?;

        let hours = std::env::var("TEMPORARY_ACCESS_DEFAULT_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(DEFAULT_TEMPORARY_ACCESS_HOURS))
            .map_err(|_| AppError::configuration("TEMPORARY_ACCESS_DEFAULT_HOURS must be a valid integer"))?;

        if hours <= 0 {
            return Err(AppError::configuration("TEMPORARY_ACCESS_DEFAULT_HOURS must be positive"));
        }

        Ok(Self {
            phase_cache_ttl: Duration::from_secs(ttl_seconds),
            default_temporary_access_hours: hours,
        })
    }

    pub fn with_phase_cache_ttl(mut self, ttl: Duration) -> Self {
        self.phase_cache_ttl = ttl;
        self
    }
}
