//! Health-aware fallback router.
//!
//! [`FallbackRouter`] tries providers one after another until one succeeds:
//!
//! 1. The preferred provider goes first, if it is part of the chain.
//! 2. The rest follow in the chain's declared order.
//! 3. A candidate the health gate refuses is skipped without being invoked.
//! 4. A candidate that errors, times out, or reports `success == false` is
//!    marked Unavailable and the next candidate is tried.
//! 5. The first success is returned as-is; outputs are never merged.
//!
//! When nothing succeeds the caller receives a failure envelope with
//! provider id [`RECOVERY_PROVIDER_ID`] and the full attempt list.
//!
//! Attempt order involves no randomness, and `route` holds no lock across
//! provider calls, so many routes may run concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{Instrument, debug, info, warn};

use super::health::HealthTracker;
use super::provider::{CapabilityProvider, ProviderHandle};
use super::providers::build_provider;
use super::types::{
    ProviderAttempt, ProviderDescriptor, QueryOptions, RECOVERY_PROVIDER_ID, RequestContext,
    ResponseEnvelope,
};
use crate::config::KestrelConfig;
use crate::error::{FailureKind, KestrelError, Result};

/// Span name for a whole route.
pub const SPAN_ROUTE: &str = "kestrel.route";

/// Span name for a single provider query.
pub const SPAN_PROVIDER_QUERY: &str = "kestrel.provider.query";

/// Ordered set of providers plus the shared health cache.
pub struct FallbackRouter {
    /// Sorted by (priority, registration order).
    providers: Vec<Arc<ProviderHandle>>,
    health: Arc<HealthTracker>,
}

impl std::fmt::Debug for FallbackRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackRouter")
            .field("providers", &self.declared_order())
            .finish()
    }
}

impl FallbackRouter {
    /// Empty router sharing `health`.
    pub fn new(health: Arc<HealthTracker>) -> Self {
        Self {
            providers: Vec::new(),
            health,
        }
    }

    /// Build a router from configuration.
    ///
    /// Malformed provider entries are logged and skipped; they do not
    /// prevent the remaining providers from registering.
    pub fn from_config(config: &KestrelConfig) -> Self {
        let health = Arc::new(HealthTracker::with_failure_threshold(
            config.router.failure_threshold,
        ));
        let mut router = Self::new(health);
        for entry in &config.providers {
            let registered = entry
                .to_descriptor()
                .and_then(|descriptor| {
                    let provider = build_provider(&descriptor)?;
                    router.register(descriptor, provider)
                });
            if let Err(e) = registered {
                warn!(provider = %entry.id, error = %e, "skipping provider registration");
            }
        }
        router
    }

    /// Add a provider. Ids must be unique.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] for an invalid descriptor or a
    /// duplicate id.
    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn CapabilityProvider>,
    ) -> Result<()> {
        descriptor.validate()?;
        if self.handle(&descriptor.id).is_some() {
            return Err(KestrelError::Configuration(format!(
                "provider '{}' is already registered",
                descriptor.id
            )));
        }
        info!(
            provider = %descriptor.id,
            kind = descriptor.kind.as_str(),
            priority = descriptor.priority,
            "registered provider"
        );
        self.providers
            .push(Arc::new(ProviderHandle::new(descriptor, provider)));
        // Stable sort keeps registration order among equal priorities.
        self.providers.sort_by_key(|h| h.descriptor().priority);
        Ok(())
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    pub fn handle(&self, id: &str) -> Option<&Arc<ProviderHandle>> {
        self.providers.iter().find(|h| h.id() == id)
    }

    /// Provider ids by priority ascending, then registration order.
    pub fn declared_order(&self) -> Vec<String> {
        self.providers.iter().map(|h| h.id().to_string()).collect()
    }

    /// Enable or disable a provider.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] if the id is unknown.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let handle = self
            .handle(id)
            .ok_or_else(|| KestrelError::Configuration(format!("unknown provider '{id}'")))?;
        handle.set_enabled(enabled);
        info!(provider = id, enabled, "provider toggled");
        Ok(())
    }

    /// Enabled providers whose cached health is not Unavailable, in declared
    /// order. Does not probe.
    pub fn available_providers(&self) -> Vec<String> {
        self.providers
            .iter()
            .filter(|h| h.is_enabled())
            .filter(|h| self.health.state(h.id()) != super::health::HealthState::Unavailable)
            .map(|h| h.id().to_string())
            .collect()
    }

    /// Candidates in attempt order: `preferred` first when it is a member of
    /// `chain`, then the rest of `chain` in order. Duplicates and unknown ids
    /// are dropped.
    pub fn attempt_order(&self, chain: &[String], preferred: Option<&str>) -> Vec<Arc<ProviderHandle>> {
        let mut ordered: Vec<&str> = Vec::with_capacity(chain.len());
        if let Some(p) = preferred
            && chain.iter().any(|id| id == p)
        {
            ordered.push(p);
        }
        for id in chain {
            if !ordered.contains(&id.as_str()) {
                ordered.push(id);
            }
        }
        ordered
            .into_iter()
            .filter_map(|id| {
                let handle = self.handle(id);
                if handle.is_none() {
                    debug!(provider = id, "chain references unregistered provider");
                }
                handle.cloned()
            })
            .collect()
    }

    /// Route over every registered provider in declared order, honouring
    /// `request.preferred_provider`.
    pub async fn route_default(&self, request: &RequestContext) -> ResponseEnvelope {
        let chain = self.declared_order();
        self.route(request, &chain, request.preferred_provider.as_deref())
            .await
    }

    /// Try `chain` until one provider succeeds.
    pub async fn route(
        &self,
        request: &RequestContext,
        chain: &[String],
        preferred: Option<&str>,
    ) -> ResponseEnvelope {
        let span = tracing::info_span!(
            SPAN_ROUTE,
            request_id = %request.request_id,
            preferred = preferred.unwrap_or(""),
        );
        self.route_inner(request, chain, preferred)
            .instrument(span)
            .await
    }

    async fn route_inner(
        &self,
        request: &RequestContext,
        chain: &[String],
        preferred: Option<&str>,
    ) -> ResponseEnvelope {
        let candidates = self.attempt_order(chain, preferred);
        let mut attempts: Vec<ProviderAttempt> = Vec::with_capacity(candidates.len());
        let mut last_error: Option<String> = None;

        for handle in candidates {
            let id = handle.id();
            if let Some(reason) = self.health.skip_reason(&handle, request).await {
                let skip = KestrelError::ProviderUnavailable {
                    provider: id.to_string(),
                    reason,
                };
                debug!(provider = id, error = %skip, "skipping provider");
                attempts.push(ProviderAttempt::skipped(id, skip.to_string()));
                continue;
            }

            match self.query_with_retries(&handle, request).await {
                Ok(mut envelope) => {
                    self.health.record_success(id);
                    attempts.push(ProviderAttempt::succeeded(id));
                    envelope.provider_id = id.to_string();
                    envelope.attempts = attempts;
                    info!(
                        provider = id,
                        duration_ms = envelope.duration_ms,
                        "request served"
                    );
                    return envelope;
                }
                Err(e) => {
                    let kind = e.failure_kind().unwrap_or(FailureKind::Other);
                    let state = self.health.record_failure(id, &e);
                    warn!(
                        provider = id,
                        kind = kind.as_str(),
                        state = %state,
                        error = %e,
                        "provider failed, falling back"
                    );
                    attempts.push(ProviderAttempt::failed(id, kind, e.to_string()));
                    last_error = Some(e.to_string());
                }
            }
        }

        warn!(
            attempted = attempts.len(),
            provider = RECOVERY_PROVIDER_ID,
            "all providers failed"
        );
        ResponseEnvelope::exhausted(attempts, last_error)
    }

    /// Query one provider, retrying retryable failures up to
    /// `max_retries` extra times.
    async fn query_with_retries(
        &self,
        handle: &ProviderHandle,
        request: &RequestContext,
    ) -> Result<ResponseEnvelope> {
        let descriptor = handle.descriptor();
        let options = QueryOptions::for_request(request, descriptor);
        let max_attempts = descriptor.max_retries.saturating_add(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let span = tracing::debug_span!(SPAN_PROVIDER_QUERY, provider = handle.id(), attempt);
            let result = self
                .query_once(handle, request, &options)
                .instrument(span)
                .await;
            match result {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(provider = handle.id(), attempt, error = %e, "retrying provider");
                }
                other => return other,
            }
        }
    }

    async fn query_once(
        &self,
        handle: &ProviderHandle,
        request: &RequestContext,
        options: &QueryOptions,
    ) -> Result<ResponseEnvelope> {
        let id = handle.id();
        let timeout = handle.descriptor().timeout;
        let start = Instant::now();
        let result = tokio::time::timeout(
            timeout,
            handle.provider().query(&request.prompt, request, options),
        )
        .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(mut envelope)) if envelope.success => {
                envelope.duration_ms = elapsed_ms;
                Ok(envelope)
            }
            Ok(Ok(envelope)) => Err(KestrelError::provider(
                id,
                FailureKind::Other,
                envelope
                    .error
                    .unwrap_or_else(|| "provider reported an unsuccessful response".into()),
            )),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(KestrelError::provider(
                id,
                FailureKind::Timeout,
                format!("timed out after {}ms", timeout.as_millis()),
            )),
        }
    }

    /// Current health verdicts keyed by provider id, probing where stale.
    pub async fn health_snapshot(&self) -> HashMap<String, super::health::HealthState> {
        let mut snapshot = HashMap::with_capacity(self.providers.len());
        for handle in &self.providers {
            let state = self.health.check_health(handle).await;
            snapshot.insert(handle.id().to_string(), state);
        }
        snapshot
    }
}
