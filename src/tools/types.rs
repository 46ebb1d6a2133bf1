//! Core tool types: descriptors, availability classes, execution context,
//! and the [`Tool`] trait.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mode::OperationalMode;
use crate::mode::probes::{NetworkSnapshot, ThermalSnapshot};

/// Default maximum output size (64 KB).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024;

/// Set of operational modes in which a tool may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityClass {
    /// Every mode.
    Always,
    /// Full only.
    FullOnly,
    /// Full and Degraded.
    DegradedPlus,
    /// Full, Degraded, and Autonomous.
    AutonomousPlus,
    /// Autonomous and Recovery.
    LocalOnly,
    /// Recovery only.
    RecoveryOnly,
}

impl AvailabilityClass {
    /// Whether a tool of this class may run in `mode`.
    pub fn permits(self, mode: OperationalMode) -> bool {
        use OperationalMode::*;
        match self {
            Self::Always => true,
            Self::FullOnly => mode == Full,
            Self::DegradedPlus => matches!(mode, Full | Degraded),
            Self::AutonomousPlus => matches!(mode, Full | Degraded | Autonomous),
            Self::LocalOnly => matches!(mode, Autonomous | Recovery),
            Self::RecoveryOnly => mode == Recovery,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::FullOnly => "full_only",
            Self::DegradedPlus => "degraded_plus",
            Self::AutonomousPlus => "autonomous_plus",
            Self::LocalOnly => "local_only",
            Self::RecoveryOnly => "recovery_only",
        }
    }
}

impl fmt::Display for AvailabilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping used for per-category statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Filesystem,
    Command,
    Network,
    Diagnostics,
    Custom,
}

impl ToolCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Command => "command",
            Self::Network => "network",
            Self::Diagnostics => "diagnostics",
            Self::Custom => "custom",
        }
    }
}

/// Prerequisites checked before a tool is invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolCapabilities {
    /// The context's network snapshot must report connected.
    pub requires_network: bool,
    /// The context's working directory must exist.
    pub requires_filesystem: bool,
    /// The context's thermal snapshot must report safe.
    pub requires_thermal_safe: bool,
    /// Soft time budget; the registry default applies when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_exec_ms: Option<u64>,
}

/// Static description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub category: ToolCategory,
    pub availability: AvailabilityClass,
    /// Lower runs first when a caller has to choose between tools.
    pub priority: u32,
    pub capabilities: ToolCapabilities,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        category: ToolCategory,
        availability: AvailabilityClass,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            category,
            availability,
            priority: 100,
            capabilities: ToolCapabilities::default(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    pub fn requires_network(mut self) -> Self {
        self.capabilities.requires_network = true;
        self
    }

    pub fn requires_filesystem(mut self) -> Self {
        self.capabilities.requires_filesystem = true;
        self
    }

    pub fn requires_thermal_safe(mut self) -> Self {
        self.capabilities.requires_thermal_safe = true;
        self
    }

    pub fn with_max_exec(mut self, budget: Duration) -> Self {
        self.capabilities.max_exec_ms = Some(budget.as_millis() as u64);
        self
    }
}

/// Execution context supplied by the caller of
/// [`ToolCapabilityRegistry::execute`](super::ToolCapabilityRegistry::execute).
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub mode: OperationalMode,
    pub working_directory: PathBuf,
    pub network: NetworkSnapshot,
    pub thermal: ThermalSnapshot,
    pub session_id: Option<String>,
}

impl ToolContext {
    /// Context with online network and safe thermals.
    pub fn new(mode: OperationalMode, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            mode,
            working_directory: working_directory.into(),
            network: NetworkSnapshot::online(),
            thermal: ThermalSnapshot::safe(),
            session_id: None,
        }
    }

    pub fn with_snapshots(mut self, network: NetworkSnapshot, thermal: ThermalSnapshot) -> Self {
        self.network = network;
        self.thermal = thermal;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    /// Output content (bounded).
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether the output was truncated to fit within the byte budget.
    pub truncated: bool,
    /// Wall time measured by the registry.
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// Successful result with `content` cut to `max_bytes`.
    pub fn bounded(content: &str, max_bytes: usize) -> Self {
        let (content, truncated) = truncate_output(content, max_bytes);
        Self {
            success: true,
            content,
            truncated,
            ..Self::default()
        }
    }
}

/// Truncate a string to at most `max_bytes`, respecting UTF-8 boundaries.
///
/// Returns `(truncated_string, was_truncated)`.
pub fn truncate_output(s: &str, max_bytes: usize) -> (String, bool) {
    if s.len() <= max_bytes {
        return (s.to_string(), false);
    }

    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    (
        format!("{}\n\n[output truncated at {max_bytes} bytes]", &s[..end]),
        true,
    )
}

/// A named operation the registry can dispatch.
///
/// Implementations must be `Send + Sync`; the registry runs each call on
/// its own task.
#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool.
    ///
    /// # Errors
    /// Returns [`KestrelError::ToolFailure`](crate::KestrelError::ToolFailure)
    /// for bad arguments or failed I/O. The registry converts it into a
    /// failed [`ToolResult`].
    async fn execute(&self, context: &ToolContext, args: serde_json::Value) -> Result<ToolResult>;
}
