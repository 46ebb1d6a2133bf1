//! Error types for kestrel.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`KestrelError::code()`].
//! Codes are part of the public API contract and will not change.
//!
//! Router and registry failures are converted into structured results at
//! their boundaries; these errors only reach callers as values, never as
//! panics.

use std::fmt;

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Malformed provider or tool descriptor.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// Provider skipped by the health gate.
    pub const PROVIDER_UNAVAILABLE: &str = "PROVIDER_UNAVAILABLE";

    /// A provider call failed (timeout, auth, rate limit, network).
    pub const PROVIDER_FAILED: &str = "PROVIDER_FAILED";

    /// Every provider in the chain was skipped or failed.
    pub const ALL_PROVIDERS_EXHAUSTED: &str = "ALL_PROVIDERS_EXHAUSTED";

    /// No tool registered under the requested name.
    pub const TOOL_NOT_FOUND: &str = "TOOL_NOT_FOUND";

    /// Tool availability class does not permit the current mode.
    pub const MODE_GATE_REJECTED: &str = "MODE_GATE_REJECTED";

    /// A declared tool prerequisite (filesystem, network, thermal) failed.
    pub const CONTEXT_INVALID: &str = "CONTEXT_INVALID";

    /// Tool invocation returned an error or panicked.
    pub const TOOL_FAILED: &str = "TOOL_FAILED";

    /// Corrupted internal invariant (e.g. poisoned lock).
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Classification of a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The call exceeded its deadline.
    Timeout,
    /// Credentials missing or rejected (401/403).
    Auth,
    /// Provider rate limited the request (429).
    RateLimit,
    /// Connection refused, DNS failure, reset.
    Network,
    /// Provider returned a 5xx status.
    Server,
    /// Provider answered with something we could not interpret.
    InvalidResponse,
    /// Anything else.
    Other,
}

impl FailureKind {
    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimit | Self::Network | Self::Server
        )
    }

    /// Short snake_case label used in logs and metadata.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::RateLimit => "rate_limit",
            Self::Network => "network",
            Self::Server => "server",
            Self::InvalidResponse => "invalid_response",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by kestrel.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KestrelError {
    /// Invalid descriptor or configuration entry.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Configuration(String),

    /// Provider skipped because it is disabled or marked unavailable.
    #[error("[{}] provider '{provider}': {reason}", error_codes::PROVIDER_UNAVAILABLE)]
    ProviderUnavailable { provider: String, reason: String },

    /// A provider call failed.
    #[error("[{}] provider '{provider}' ({kind}): {message}", error_codes::PROVIDER_FAILED)]
    ProviderFailure {
        provider: String,
        kind: FailureKind,
        message: String,
    },

    /// Every candidate in the fallback chain was skipped or failed.
    #[error(
        "[{}] All providers failed (attempted: {}): {last_error}",
        error_codes::ALL_PROVIDERS_EXHAUSTED,
        attempted.join(", ")
    )]
    AllProvidersExhausted {
        attempted: Vec<String>,
        last_error: String,
    },

    /// No tool with this name is registered.
    #[error("[{}] tool '{}' is not registered", error_codes::TOOL_NOT_FOUND, .0)]
    ToolNotFound(String),

    /// The tool's availability class does not include the active mode.
    #[error(
        "[{}] tool '{tool}' ({class}) is not available in {mode} mode",
        error_codes::MODE_GATE_REJECTED
    )]
    ModeGateRejection {
        tool: String,
        mode: String,
        class: String,
    },

    /// A declared prerequisite of the tool is not met.
    #[error("[{}] tool '{tool}': {reason}", error_codes::CONTEXT_INVALID)]
    ContextValidationFailure { tool: String, reason: String },

    /// The tool ran and failed.
    #[error("[{}] tool '{tool}': {message}", error_codes::TOOL_FAILED)]
    ToolFailure { tool: String, message: String },

    /// Corrupted internal state.
    #[error("[{}] {}", error_codes::INTERNAL_ERROR, .0)]
    Internal(String),
}

impl KestrelError {
    /// Build a provider failure.
    pub fn provider(provider: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self::ProviderFailure {
            provider: provider.into(),
            kind,
            message: message.into(),
        }
    }

    /// Build a tool failure.
    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolFailure {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => error_codes::CONFIG_INVALID,
            Self::ProviderUnavailable { .. } => error_codes::PROVIDER_UNAVAILABLE,
            Self::ProviderFailure { .. } => error_codes::PROVIDER_FAILED,
            Self::AllProvidersExhausted { .. } => error_codes::ALL_PROVIDERS_EXHAUSTED,
            Self::ToolNotFound(_) => error_codes::TOOL_NOT_FOUND,
            Self::ModeGateRejection { .. } => error_codes::MODE_GATE_REJECTED,
            Self::ContextValidationFailure { .. } => error_codes::CONTEXT_INVALID,
            Self::ToolFailure { .. } => error_codes::TOOL_FAILED,
            Self::Internal(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Returns the message without the code prefix.
    pub fn message(&self) -> String {
        let display = self.to_string();
        let prefix_len = self.code().len() + 3;
        display.get(prefix_len..).unwrap_or(&display).to_string()
    }

    /// Failure classification for provider errors, `None` otherwise.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::ProviderFailure { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true if retrying against the same provider may help.
    pub fn is_retryable(&self) -> bool {
        self.failure_kind().is_some_and(FailureKind::is_retryable)
    }

    /// Human-readable suggestion shown alongside user-visible failures.
    pub fn remediation_hint(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "check the provider and tool entries in the config file",
            Self::ProviderUnavailable { .. } => {
                "wait for the next health check or re-enable the provider"
            }
            Self::ProviderFailure { kind, .. } => match kind {
                FailureKind::Auth => "verify the API key or proxy credentials",
                FailureKind::RateLimit => "retry later or add another provider to the chain",
                FailureKind::Timeout => "raise the provider timeout or check its load",
                FailureKind::Network => "check network connectivity to the provider",
                _ => "inspect provider logs for details",
            },
            Self::AllProvidersExhausted { .. } => {
                "check connectivity and credentials, or start a local inference daemon"
            }
            Self::ToolNotFound(_) => "list available tools and check the name",
            Self::ModeGateRejection { .. } => {
                "wait for the system to return to a higher operational mode"
            }
            Self::ContextValidationFailure { .. } => {
                "fix the working directory, network, or let the device cool down"
            }
            Self::ToolFailure { .. } => "inspect the tool error and arguments",
            Self::Internal(_) => "restart the process; internal state is inconsistent",
        }
    }
}

/// Convenience alias for kestrel results.
pub type Result<T> = std::result::Result<T, KestrelError>;
