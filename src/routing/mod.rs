//! Health-aware provider routing.
//!
//! # Submodules
//!
//! - [`types`]: Descriptors, request context, response envelope
//! - [`provider`]: [`CapabilityProvider`] trait and the registered handle
//! - [`health`]: Cached per-provider health with TTL revalidation
//! - [`router`]: [`FallbackRouter`]
//! - [`providers`]: HTTP backends

pub mod health;
pub mod provider;
pub mod providers;
pub mod router;
pub mod types;

pub use health::{HealthRecord, HealthState, HealthTracker};
pub use provider::{CapabilityProvider, ProviderHandle};
pub use providers::{OpenAiCompatProvider, build_provider};
pub use router::FallbackRouter;
pub use types::{
    AttemptOutcome, ProviderAttempt, ProviderDescriptor, ProviderId, ProviderKind, QueryOptions,
    RECOVERY_PROVIDER_ID, RequestContext, ResourceLimits, ResponseEnvelope,
};
