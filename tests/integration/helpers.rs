//! Shared helpers for integration tests.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kestrel::routing::QueryOptions;
use kestrel::{
    CapabilityProvider, FailureKind, FallbackRouter, HealthState, HealthTracker, KestrelError,
    ProviderDescriptor, ProviderKind, RequestContext, ResponseEnvelope, Result,
};

/// Order in which providers were invoked across a test.
pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) fn call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// What a scripted provider does when queried.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    /// Answer with the provider id as content.
    Succeed,
    /// Return a provider failure of this kind.
    Fail(FailureKind),
    /// Return `Ok` with `success == false`.
    Unsuccessful,
    /// Never answer within any reasonable timeout.
    Hang,
}

pub(crate) struct ScriptedProvider {
    id: String,
    script: Script,
    health: HealthState,
    log: CallLog,
    pub(crate) queries: AtomicU32,
    pub(crate) probes: AtomicU32,
}

impl ScriptedProvider {
    pub(crate) fn new(id: &str, script: Script, health: HealthState, log: &CallLog) -> Self {
        Self {
            id: id.to_string(),
            script,
            health,
            log: Arc::clone(log),
            queries: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        }
    }

    pub(crate) fn queries(&self) -> u32 {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CapabilityProvider for ScriptedProvider {
    async fn query(
        &self,
        _prompt: &str,
        _context: &RequestContext,
        _options: &QueryOptions,
    ) -> Result<ResponseEnvelope> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.log.lock().unwrap().push(self.id.clone());
        match self.script {
            Script::Succeed => Ok(ResponseEnvelope::success(&self.id, &self.id)),
            Script::Fail(kind) => Err(KestrelError::provider(&self.id, kind, "scripted failure")),
            Script::Unsuccessful => Ok(ResponseEnvelope::failure(&self.id, "model refused")),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ResponseEnvelope::success(&self.id, "too late"))
            }
        }
    }

    async fn health_check(&self) -> Result<HealthState> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        Ok(self.health)
    }
}

/// One provider in a test chain.
pub(crate) struct Backend {
    pub id: &'static str,
    pub kind: ProviderKind,
    pub script: Script,
    pub health: HealthState,
    pub priority: u32,
}

impl Backend {
    pub(crate) fn new(id: &'static str, script: Script) -> Self {
        Self {
            id,
            kind: ProviderKind::RemoteApi,
            script,
            health: HealthState::Healthy,
            priority: 100,
        }
    }

    pub(crate) fn health(mut self, health: HealthState) -> Self {
        self.health = health;
        self
    }

    pub(crate) fn kind(mut self, kind: ProviderKind) -> Self {
        self.kind = kind;
        self
    }

    pub(crate) fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }
}

/// Build a router from backends, returning the providers for call counting.
pub(crate) fn scripted_router(
    backends: Vec<Backend>,
    health: Arc<HealthTracker>,
    log: &CallLog,
) -> (FallbackRouter, Vec<Arc<ScriptedProvider>>) {
    let mut router = FallbackRouter::new(health);
    let mut providers = Vec::new();
    for backend in backends {
        let provider = Arc::new(ScriptedProvider::new(backend.id, backend.script, backend.health, log));
        let descriptor = ProviderDescriptor::new(backend.id, backend.kind)
            .with_timeout(Duration::from_secs(2))
            .with_priority(backend.priority);
        router.register(descriptor, provider.clone()).unwrap();
        providers.push(provider);
    }
    (router, providers)
}
