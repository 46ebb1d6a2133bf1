//! Core routing types: provider descriptors, request context, and the
//! response envelope returned by every route.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FailureKind, KestrelError};
use crate::mode::probes::{NetworkSnapshot, ThermalSnapshot};

/// Unique provider identifier.
pub type ProviderId = String;

/// Provider id reported when no provider served a request.
pub const RECOVERY_PROVIDER_ID: &str = "RECOVERY";

/// Default per-call timeout for providers.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Default health revalidation interval.
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Backend family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Hosted inference API reached directly.
    RemoteApi,
    /// Proxy service that holds the credentials on our behalf.
    CredentialProxy,
    /// Inference daemon on this machine.
    LocalDaemon,
    /// Inference daemon on another machine.
    RemoteDaemon,
}

impl ProviderKind {
    /// Whether the provider runs on this machine.
    pub fn is_local(self) -> bool {
        matches!(self, Self::LocalDaemon)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemoteApi => "remote_api",
            Self::CredentialProxy => "credential_proxy",
            Self::LocalDaemon => "local_daemon",
            Self::RemoteDaemon => "remote_daemon",
        }
    }
}

/// Static description of a provider, created from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub id: String,
    pub kind: ProviderKind,
    /// Initial enabled flag; the router owns the live toggle.
    pub enabled: bool,
    /// Deadline for a single query or health probe.
    pub timeout: Duration,
    /// Extra attempts on retryable failures before moving on.
    pub max_retries: u32,
    /// Cached health is revalidated after this interval.
    pub health_check_interval: Duration,
    /// Lower sorts first in the declared order.
    pub priority: u32,
    /// Whether the request's thermal snapshot is passed to this provider.
    pub supports_thermal_integration: bool,
    /// Backend-specific options, opaque to the router.
    pub config: HashMap<String, String>,
}

impl ProviderDescriptor {
    /// Descriptor with default timeout, retries, and health interval.
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            enabled: true,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            max_retries: 0,
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            priority: 100,
            supports_thermal_integration: kind.is_local(),
            config: HashMap::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_thermal_integration(mut self, enabled: bool) -> Self {
        self.supports_thermal_integration = enabled;
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Reject descriptors the router cannot operate.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] naming the offending field.
    pub fn validate(&self) -> crate::Result<()> {
        if self.id.trim().is_empty() {
            return Err(KestrelError::Configuration(
                "provider id must not be empty".into(),
            ));
        }
        if self.id == RECOVERY_PROVIDER_ID {
            return Err(KestrelError::Configuration(format!(
                "provider id '{RECOVERY_PROVIDER_ID}' is reserved"
            )));
        }
        if self.timeout.is_zero() {
            return Err(KestrelError::Configuration(format!(
                "provider '{}': timeout must be greater than zero",
                self.id
            )));
        }
        if self.health_check_interval.is_zero() {
            return Err(KestrelError::Configuration(format!(
                "provider '{}': health_check_interval must be greater than zero",
                self.id
            )));
        }
        Ok(())
    }
}

/// Per-request resource ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
}

/// Everything a provider needs to serve one request. Discarded afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub prompt: String,
    /// Opaque attachment references.
    #[serde(default)]
    pub attachments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
    #[serde(default)]
    pub limits: ResourceLimits,
    pub thermal: ThermalSnapshot,
    pub network: NetworkSnapshot,
}

impl RequestContext {
    /// New request with a fresh id, online network, and safe thermals.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            attachments: Vec::new(),
            session_id: None,
            preferred_provider: None,
            limits: ResourceLimits::default(),
            thermal: ThermalSnapshot::safe(),
            network: NetworkSnapshot::online(),
        }
    }

    pub fn with_preferred(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_snapshots(mut self, network: NetworkSnapshot, thermal: ThermalSnapshot) -> Self {
        self.network = network;
        self.thermal = thermal;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// Per-call options handed to a provider alongside the prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
    /// Present only for providers that declare thermal integration.
    pub thermal: Option<ThermalSnapshot>,
}

impl QueryOptions {
    /// Options for `descriptor` serving `request`.
    pub fn for_request(request: &RequestContext, descriptor: &ProviderDescriptor) -> Self {
        Self {
            max_tokens: request.limits.max_tokens,
            timeout: descriptor.timeout,
            thermal: descriptor
                .supports_thermal_integration
                .then_some(request.thermal),
        }
    }
}

/// How one candidate in the chain was handled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Not invoked; the health or mode gate turned it away.
    Skipped { reason: String },
    /// Invoked and failed.
    Failed { kind: String, error: String },
    /// Invoked and served the request.
    Succeeded,
}

/// Diagnostic record of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

impl ProviderAttempt {
    pub fn skipped(provider_id: &str, reason: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            outcome: AttemptOutcome::Skipped {
                reason: reason.into(),
            },
        }
    }

    pub fn failed(provider_id: &str, kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            outcome: AttemptOutcome::Failed {
                kind: kind.as_str().to_string(),
                error: error.into(),
            },
        }
    }

    pub fn succeeded(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            outcome: AttemptOutcome::Succeeded,
        }
    }

    /// Whether the provider was actually invoked.
    pub fn was_invoked(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Skipped { .. })
    }
}

/// Result of a query or a whole route.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub success: bool,
    pub content: String,
    pub provider_id: String,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Every candidate considered, in order.
    #[serde(default)]
    pub attempts: Vec<ProviderAttempt>,
}

impl ResponseEnvelope {
    /// Successful response carrying `content`.
    pub fn success(provider_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            provider_id: provider_id.into(),
            ..Self::default()
        }
    }

    /// Unsuccessful response from a provider.
    pub fn failure(provider_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            provider_id: provider_id.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Terminal envelope when every candidate was skipped or failed.
    pub fn exhausted(attempts: Vec<ProviderAttempt>, last_error: Option<String>) -> Self {
        let attempted: Vec<String> = attempts.iter().map(|a| a.provider_id.clone()).collect();
        let err = KestrelError::AllProvidersExhausted {
            attempted: attempted.clone(),
            last_error: last_error.unwrap_or_else(|| "no provider could handle the request".into()),
        };

        let mut metadata = HashMap::new();
        metadata.insert("error_code".into(), serde_json::json!(err.code()));
        metadata.insert("attempted_providers".into(), serde_json::json!(attempted));
        metadata.insert("remediation".into(), serde_json::json!(err.remediation_hint()));

        Self {
            success: false,
            provider_id: RECOVERY_PROVIDER_ID.to_string(),
            error: Some(err.to_string()),
            metadata,
            attempts,
            ..Self::default()
        }
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Ids of providers that were actually invoked, in order.
    pub fn invoked_providers(&self) -> Vec<&str> {
        self.attempts
            .iter()
            .filter(|a| a.was_invoked())
            .map(|a| a.provider_id.as_str())
            .collect()
    }
}
