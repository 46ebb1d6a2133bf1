//! Capability provider trait for routing backends.
//!
//! Every backend (hosted APIs, a credential proxy, local or remote
//! inference daemons) implements [`CapabilityProvider`]. The router only
//! sees this contract; wire formats stay inside each implementation.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;

use super::health::HealthState;
use super::types::{ProviderDescriptor, QueryOptions, RequestContext, ResponseEnvelope};
use crate::error::Result;

/// Trait for routing backends.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Answer `prompt`.
    ///
    /// Returning `Ok` with `success == false` is treated the same as an
    /// error by the router.
    ///
    /// # Errors
    /// Returns [`KestrelError::ProviderFailure`](crate::KestrelError::ProviderFailure)
    /// classified by [`FailureKind`](crate::FailureKind).
    async fn query(
        &self,
        prompt: &str,
        context: &RequestContext,
        options: &QueryOptions,
    ) -> Result<ResponseEnvelope>;

    /// Probe the backend. Errors are mapped to `Unavailable` by the caller.
    async fn health_check(&self) -> Result<HealthState>;
}

/// A registered provider: its descriptor, live enabled flag, and backend.
pub struct ProviderHandle {
    descriptor: ProviderDescriptor,
    enabled: AtomicBool,
    provider: Arc<dyn CapabilityProvider>,
}

impl ProviderHandle {
    pub fn new(descriptor: ProviderDescriptor, provider: Arc<dyn CapabilityProvider>) -> Self {
        let enabled = AtomicBool::new(descriptor.enabled);
        Self {
            descriptor,
            enabled,
            provider,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    pub fn provider(&self) -> &Arc<dyn CapabilityProvider> {
        &self.provider
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Operator toggle.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

impl fmt::Debug for ProviderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderHandle")
            .field("id", &self.descriptor.id)
            .field("kind", &self.descriptor.kind)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
