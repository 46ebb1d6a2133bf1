//! Kestrel: health-aware capability routing with mode-gated tool execution.
//!
//! A request is routed across interchangeable providers (remote APIs, a
//! credential proxy, local or remote inference daemons) until one succeeds,
//! while a tool registry decides which operations may run under the current
//! operational mode and local safety signals.
//!
//! # Architecture
//!
//! - **Routing**: [`FallbackRouter`] tries providers preferred-first, then in
//!   declared order, consulting a TTL-cached [`HealthTracker`]
//! - **Modes**: [`ModeController`] moves between Full, Degraded, Autonomous,
//!   and Recovery on failure signals and periodic probe re-evaluation
//! - **Tools**: [`ToolCapabilityRegistry`] gates each call on availability
//!   class, declared prerequisites, and a time budget
//! - **Dispatcher**: [`Dispatcher`] ties the three together for callers

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod mode;
pub mod routing;
pub mod tools;

pub use config::KestrelConfig;
pub use dispatcher::Dispatcher;
pub use error::{FailureKind, KestrelError, Result};
pub use mode::{FailureSignal, ModeController, ModeTransition, OperationalMode};
pub use routing::{
    CapabilityProvider, FallbackRouter, HealthState, HealthTracker, ProviderDescriptor,
    ProviderKind, RequestContext, ResponseEnvelope,
};
pub use tools::{
    AvailabilityClass, RegistryStats, Tool, ToolCapabilityRegistry, ToolContext, ToolDescriptor,
    ToolResult,
};
