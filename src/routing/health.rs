//! Per-provider health cache with TTL-based revalidation.
//!
//! # State Model
//!
//! ```text
//!  Unknown ──probe──► Healthy / Degraded / Unavailable
//!  request success ─► Healthy   (consecutive errors reset)
//!  request failure ─► Unavailable once `failure_threshold` is reached,
//!                     Degraded before that
//! ```
//!
//! A cached verdict is served until the provider's
//! `health_check_interval` elapses; only then is the backend probed again.
//! Writes are last-writer-wins: this is a monitoring signal, not a ledger.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::provider::ProviderHandle;
use super::types::RequestContext;
use crate::error::KestrelError;

/// Default number of consecutive failures that mark a provider Unavailable.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 1;

/// Cached verdict on whether a provider is serviceable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Never probed.
    #[default]
    Unknown,
    Healthy,
    /// Serviceable but impaired.
    Degraded,
    Unavailable,
}

impl HealthState {
    /// Whether requests may be sent to a provider in this state.
    pub fn is_serviceable(self) -> bool {
        matches!(self, Self::Healthy | Self::Degraded)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// Health history for one provider.
#[derive(Debug, Clone, Default)]
pub struct HealthRecord {
    pub state: HealthState,
    /// When the state was last set by a probe or a request outcome.
    pub last_checked: Option<Instant>,
    /// Failures since the last success.
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl HealthRecord {
    fn is_fresh(&self, ttl: std::time::Duration) -> bool {
        self.state != HealthState::Unknown
            && self.last_checked.is_some_and(|t| t.elapsed() < ttl)
    }
}

/// Shared health cache consulted by the router.
#[derive(Debug)]
pub struct HealthTracker {
    records: RwLock<HashMap<String, HealthRecord>>,
    failure_threshold: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    /// Tracker where a single failure marks a provider Unavailable.
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    /// Tracker that tolerates `threshold - 1` consecutive failures (as
    /// Degraded) before marking a provider Unavailable. Zero is treated as 1.
    pub fn with_failure_threshold(threshold: u32) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            failure_threshold: threshold.max(1),
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Cached state without probing.
    pub fn state(&self, provider_id: &str) -> HealthState {
        self.record(provider_id).map(|r| r.state).unwrap_or_default()
    }

    /// Copy of the record for `provider_id`, if any.
    pub fn record(&self, provider_id: &str) -> Option<HealthRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(provider_id)
            .cloned()
    }

    /// Current state, probing the backend only when the cache is Unknown or
    /// older than the provider's health check interval.
    ///
    /// Probe errors and timeouts map to `Unavailable` and never propagate.
    pub async fn check_health(&self, handle: &ProviderHandle) -> HealthState {
        let descriptor = handle.descriptor();
        if let Some(record) = self.record(handle.id())
            && record.is_fresh(descriptor.health_check_interval)
        {
            return record.state;
        }

        let probed = tokio::time::timeout(descriptor.timeout, handle.provider().health_check()).await;
        let (state, error) = match probed {
            // A backend that cannot say is treated as impaired, not down.
            Ok(Ok(HealthState::Unknown)) => (HealthState::Degraded, None),
            Ok(Ok(state)) => (state, None),
            Ok(Err(e)) => {
                warn!(provider = handle.id(), error = %e, "health probe failed");
                (HealthState::Unavailable, Some(e.to_string()))
            }
            Err(_) => {
                warn!(
                    provider = handle.id(),
                    timeout_ms = descriptor.timeout.as_millis() as u64,
                    "health probe timed out"
                );
                (HealthState::Unavailable, Some("health probe timed out".to_string()))
            }
        };
        debug!(provider = handle.id(), state = %state, "health probed");

        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(handle.id().to_string()).or_default();
        record.state = state;
        record.last_checked = Some(Instant::now());
        match error {
            Some(e) => {
                record.consecutive_errors += 1;
                record.last_error = Some(e);
            }
            None if state == HealthState::Healthy => {
                record.consecutive_errors = 0;
                record.last_error = None;
            }
            None => {}
        }
        state
    }

    /// Why `handle` must not serve `context`, or `None` if it may.
    ///
    /// Disabled and Unavailable providers are refused, as are non-local
    /// providers when the request's network snapshot is offline.
    pub async fn skip_reason(&self, handle: &ProviderHandle, context: &RequestContext) -> Option<String> {
        if !handle.is_enabled() {
            return Some("provider disabled".to_string());
        }
        if !context.network.connected && !handle.descriptor().kind.is_local() {
            return Some("network offline".to_string());
        }
        let state = self.check_health(handle).await;
        if state.is_serviceable() {
            None
        } else {
            Some(format!("health state {state}"))
        }
    }

    /// Whether `handle` may serve `context`.
    pub async fn can_handle(&self, handle: &ProviderHandle, context: &RequestContext) -> bool {
        self.skip_reason(handle, context).await.is_none()
    }

    /// A request to `provider_id` succeeded.
    pub fn record_success(&self, provider_id: &str) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(provider_id.to_string()).or_default();
        record.state = HealthState::Healthy;
        record.consecutive_errors = 0;
        record.last_error = None;
        record.last_checked = Some(Instant::now());
    }

    /// A request to `provider_id` failed. Returns the new state.
    pub fn record_failure(&self, provider_id: &str, error: &KestrelError) -> HealthState {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(provider_id.to_string()).or_default();
        record.consecutive_errors += 1;
        record.last_error = Some(error.to_string());
        record.last_checked = Some(Instant::now());
        record.state = if record.consecutive_errors >= self.failure_threshold {
            HealthState::Unavailable
        } else {
            HealthState::Degraded
        };
        record.state
    }

    /// Force a state, e.g. from an operator or a test.
    pub fn set_state(&self, provider_id: &str, state: HealthState) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records.entry(provider_id.to_string()).or_default();
        record.state = state;
        record.last_checked = Some(Instant::now());
    }

    /// `(provider, state, consecutive_errors)` for every tracked provider,
    /// sorted by id.
    pub fn report(&self) -> Vec<(String, HealthState, u32)> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut report: Vec<_> = records
            .iter()
            .map(|(id, r)| (id.clone(), r.state, r.consecutive_errors))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Forget all cached health.
    pub fn reset(&self) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
