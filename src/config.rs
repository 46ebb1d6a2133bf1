//! Configuration schema for providers, routing, modes, tools, and logging.
//!
//! Loaded from TOML. Every section has defaults, so an empty file is a valid
//! configuration with no providers.
//!
//! ```toml
//! [[providers]]
//! id = "ollama"
//! kind = "local_daemon"
//! priority = 10
//! options = { base_url = "http://localhost:11434/v1", model = "llama3:8b" }
//!
//! [mode]
//! initial_mode = "full"
//! evaluate_interval_secs = 30
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{KestrelError, Result};
use crate::mode::OperationalMode;
use crate::mode::probes::{
    DEFAULT_THERMAL_LIMIT_C, DEFAULT_THERMAL_ROOT, SysfsThermalProbe, TcpNetworkProbe,
};
use crate::routing::health::DEFAULT_FAILURE_THRESHOLD;
use crate::routing::types::{ProviderDescriptor, ProviderKind};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KestrelConfig {
    /// Providers in declared order.
    pub providers: Vec<ProviderConfig>,
    pub router: RouterSettings,
    pub mode: ModeSettings,
    pub tools: ToolSettings,
    pub logging: LoggingConfig,
}

/// One `[[providers]]` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_health_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Defaults to true for local daemons.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supports_thermal_integration: Option<bool>,
    /// Backend options such as `base_url` and `model`.
    #[serde(default)]
    pub options: HashMap<String, String>,
}

fn default_true() -> bool {
    true
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_health_interval_secs() -> u64 {
    60
}

fn default_priority() -> u32 {
    100
}

impl ProviderConfig {
    /// Convert into a validated descriptor.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] for an empty or reserved id,
    /// zero timeout, or zero health interval.
    pub fn to_descriptor(&self) -> Result<ProviderDescriptor> {
        let mut descriptor = ProviderDescriptor::new(self.id.trim(), self.kind)
            .with_enabled(self.enabled)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_max_retries(self.max_retries)
            .with_health_check_interval(Duration::from_secs(self.health_check_interval_secs))
            .with_priority(self.priority);
        if let Some(thermal) = self.supports_thermal_integration {
            descriptor = descriptor.with_thermal_integration(thermal);
        }
        for (key, value) in &self.options {
            descriptor = descriptor.with_option(key, value);
        }
        descriptor.validate()?;
        Ok(descriptor)
    }
}

/// Fallback router settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterSettings {
    /// Consecutive failures before a provider is marked Unavailable.
    pub failure_threshold: u32,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

/// Operational mode controller settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModeSettings {
    pub initial_mode: OperationalMode,
    /// Seconds between safety re-evaluations.
    pub evaluate_interval_secs: u64,
    /// `host:port` the network probe connects to.
    pub network_probe_addr: String,
    pub network_probe_timeout_ms: u64,
    /// Directory containing `thermal_zone*` entries.
    pub thermal_root: PathBuf,
    /// Temperature in Celsius above which work is unsafe.
    pub thermal_limit_c: f32,
}

impl Default for ModeSettings {
    fn default() -> Self {
        Self {
            initial_mode: OperationalMode::Full,
            evaluate_interval_secs: 30,
            network_probe_addr: "1.1.1.1:443".into(),
            network_probe_timeout_ms: 2_000,
            thermal_root: PathBuf::from(DEFAULT_THERMAL_ROOT),
            thermal_limit_c: DEFAULT_THERMAL_LIMIT_C,
        }
    }
}

impl ModeSettings {
    pub fn evaluate_interval(&self) -> Duration {
        Duration::from_secs(self.evaluate_interval_secs)
    }

    /// TCP probe against the configured address.
    pub fn network_probe(&self) -> TcpNetworkProbe {
        TcpNetworkProbe::new(
            self.network_probe_addr.clone(),
            Duration::from_millis(self.network_probe_timeout_ms),
        )
    }

    /// Sysfs probe against the configured thermal root.
    pub fn thermal_probe(&self) -> SysfsThermalProbe {
        SysfsThermalProbe::new(self.thermal_root.clone(), self.thermal_limit_c)
    }
}

/// Tool registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    /// Time budget for tools that do not declare their own.
    pub default_max_exec_ms: u64,
    /// Working directory handed to tools; defaults to the process cwd.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Upper bound on tool output kept in a result.
    pub max_output_bytes: usize,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            default_max_exec_ms: 10_000,
            working_directory: None,
            max_output_bytes: 64 * 1024,
        }
    }
}

impl ToolSettings {
    pub fn default_max_exec(&self) -> Duration {
        Duration::from_millis(self.default_max_exec_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `kestrel=debug,reqwest=warn`.
    pub level: String,
    /// Directory for daily-rolling log files. Stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "kestrel=info".into(),
            log_dir: None,
        }
    }
}

impl KestrelConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] if the text is not valid TOML
    /// for this schema or fails [`validate`](Self::validate).
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| KestrelError::Configuration(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] if the file cannot be read or
    /// parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            KestrelError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration as TOML, creating parent directories as needed.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] if serialization or the write
    /// fails.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                KestrelError::Configuration(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| KestrelError::Configuration(format!("cannot serialize config: {e}")))?;
        std::fs::write(path, content).map_err(|e| {
            KestrelError::Configuration(format!("cannot write {}: {e}", path.display()))
        })
    }

    /// Returns the default config file path: `<config dir>/kestrel/config.toml`.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("kestrel")
            .join("config.toml")
    }

    /// Check section-level settings.
    ///
    /// Individual provider entries are validated when they are registered,
    /// so one malformed entry does not reject the whole file.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.router.failure_threshold == 0 {
            return Err(KestrelError::Configuration(
                "router.failure_threshold must be at least 1".into(),
            ));
        }
        if self.mode.evaluate_interval_secs == 0 {
            return Err(KestrelError::Configuration(
                "mode.evaluate_interval_secs must be greater than zero".into(),
            ));
        }
        if self.mode.network_probe_timeout_ms == 0 {
            return Err(KestrelError::Configuration(
                "mode.network_probe_timeout_ms must be greater than zero".into(),
            ));
        }
        if !(self.mode.thermal_limit_c.is_finite() && self.mode.thermal_limit_c > 0.0) {
            return Err(KestrelError::Configuration(format!(
                "mode.thermal_limit_c must be a positive temperature, got {}",
                self.mode.thermal_limit_c
            )));
        }
        if self.tools.default_max_exec_ms == 0 {
            return Err(KestrelError::Configuration(
                "tools.default_max_exec_ms must be greater than zero".into(),
            ));
        }
        if self.tools.max_output_bytes == 0 {
            return Err(KestrelError::Configuration(
                "tools.max_output_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
