//! Mode-gated tool registry.
//!
//! [`ToolCapabilityRegistry::execute`] applies three gates before a tool
//! runs, in order:
//!
//! 1. **Lookup**: unknown names yield [`KestrelError::ToolNotFound`].
//! 2. **Mode**: the tool's [`AvailabilityClass`](super::AvailabilityClass) must permit `context.mode`,
//!    otherwise [`KestrelError::ModeGateRejection`].
//! 3. **Prerequisites**: declared filesystem, network, and thermal
//!    requirements must hold, otherwise
//!    [`KestrelError::ContextValidationFailure`].
//!
//! Gate rejections leave counters untouched. Once a tool is invoked, every
//! outcome (success, error, panic, budget overrun) is returned as a
//! [`ToolResult`] and counted exactly once.
//!
//! Counters are monitoring signals updated with relaxed atomics; concurrent
//! executions may interleave their updates.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;
use tracing::{Instrument, debug, info, warn};

use super::lifecycle::{LifecycleEvent, ListenerSet, ToolLifecycleListener};
use super::types::{Tool, ToolCategory, ToolContext, ToolDescriptor, ToolResult};
use crate::error::{KestrelError, Result};
use crate::mode::OperationalMode;

/// Span name for a single tool execution.
pub const SPAN_TOOL_EXECUTE: &str = "kestrel.tool.execute";

/// Budget for tools that do not declare `max_exec_ms`.
pub const DEFAULT_MAX_EXEC: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
struct Counters {
    executions: AtomicU64,
    errors: AtomicU64,
    total_time_ms: AtomicU64,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl Counters {
    fn record(&self, success: bool, elapsed_ms: u64) {
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_time_ms.fetch_add(elapsed_ms, Ordering::Relaxed);
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Utc::now());
    }
}

struct Entry {
    descriptor: ToolDescriptor,
    tool: Arc<dyn Tool>,
    counters: Counters,
}

/// Per-tool counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub category: ToolCategory,
    pub executions: u64,
    pub errors: u64,
    pub total_time_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
}

/// Per-category totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CategoryStats {
    pub tools: usize,
    pub executions: u64,
    pub errors: u64,
}

/// Aggregate statistics returned by [`ToolCapabilityRegistry::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RegistryStats {
    pub total_tools: usize,
    pub total_executions: u64,
    pub total_errors: u64,
    /// `(executions - errors) / max(executions, 1)`.
    pub success_rate: f64,
    pub by_category: BTreeMap<ToolCategory, CategoryStats>,
    /// Sorted by tool name.
    pub tools: Vec<ToolStats>,
}

/// Registry of tools with mode gating, prerequisite checks, and metrics.
pub struct ToolCapabilityRegistry {
    tools: RwLock<HashMap<String, Arc<Entry>>>,
    listeners: ListenerSet,
    default_budget: Duration,
}

impl std::fmt::Debug for ToolCapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolCapabilityRegistry")
            .field("tools", &self.len())
            .field("listeners", &self.listeners.len())
            .field("default_budget", &self.default_budget)
            .finish()
    }
}

impl Default for ToolCapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolCapabilityRegistry {
    pub fn new() -> Self {
        Self::with_default_budget(DEFAULT_MAX_EXEC)
    }

    /// Registry whose tools without `max_exec_ms` get `budget`.
    pub fn with_default_budget(budget: Duration) -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            listeners: ListenerSet::new(),
            default_budget: budget,
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Arc<Entry>>>> {
        self.tools
            .read()
            .map_err(|_| KestrelError::Internal("tool registry lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<Entry>>>> {
        self.tools
            .write()
            .map_err(|_| KestrelError::Internal("tool registry lock poisoned".into()))
    }

    /// Register a tool under its own descriptor.
    ///
    /// # Errors
    /// See [`register_as`](Self::register_as).
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let descriptor = tool.descriptor().clone();
        self.register_as(descriptor, tool)
    }

    /// Register `tool` under `descriptor`. A previous entry with the same
    /// name is replaced and its counters are discarded.
    ///
    /// # Errors
    /// Returns [`KestrelError::Configuration`] for an empty name, or
    /// [`KestrelError::Internal`] if the registry lock is poisoned.
    pub fn register_as(&self, descriptor: ToolDescriptor, tool: Arc<dyn Tool>) -> Result<()> {
        if descriptor.name.trim().is_empty() {
            return Err(KestrelError::Configuration(
                "tool name must not be empty".into(),
            ));
        }
        let name = descriptor.name.clone();
        let entry = Arc::new(Entry {
            descriptor,
            tool,
            counters: Counters::default(),
        });
        if self.write()?.insert(name.clone(), entry).is_some() {
            warn!(tool_name = %name, "tool re-registered, replacing previous entry");
        } else {
            debug!(tool_name = %name, "tool registered");
        }
        Ok(())
    }

    /// Remove a tool. Returns whether it was registered.
    ///
    /// # Errors
    /// Returns [`KestrelError::Internal`] if the registry lock is poisoned.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        Ok(self.write()?.remove(name).is_some())
    }

    pub fn add_listener(&self, listener: Arc<dyn ToolLifecycleListener>) {
        self.listeners.add(listener);
    }

    pub fn len(&self) -> usize {
        self.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor of a registered tool.
    pub fn descriptor(&self, name: &str) -> Option<ToolDescriptor> {
        self.read()
            .ok()
            .and_then(|t| t.get(name).map(|e| e.descriptor.clone()))
    }

    /// Names of tools whose availability class permits `mode`, sorted.
    pub fn list_available(&self, mode: OperationalMode) -> Vec<String> {
        let Ok(tools) = self.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = tools
            .values()
            .filter(|e| e.descriptor.availability.permits(mode))
            .map(|e| e.descriptor.name.clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Run a tool after the mode and prerequisite gates pass.
    ///
    /// # Errors
    /// Returns [`KestrelError::ToolNotFound`],
    /// [`KestrelError::ModeGateRejection`], or
    /// [`KestrelError::ContextValidationFailure`] when a gate rejects the
    /// call, and [`KestrelError::Internal`] if the registry lock is
    /// poisoned. Failures inside the tool are returned as `Ok` with
    /// `success == false`.
    pub async fn execute(
        &self,
        name: &str,
        context: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult> {
        let span = tracing::info_span!(SPAN_TOOL_EXECUTE, tool_name = name, mode = %context.mode);
        self.execute_inner(name, context, args).instrument(span).await
    }

    async fn execute_inner(
        &self,
        name: &str,
        context: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult> {
        let entry = self
            .read()?
            .get(name)
            .cloned()
            .ok_or_else(|| KestrelError::ToolNotFound(name.to_string()))?;

        let class = entry.descriptor.availability;
        if !class.permits(context.mode) {
            debug!(tool_name = name, class = class.as_str(), "rejected by mode gate");
            return Err(KestrelError::ModeGateRejection {
                tool: name.to_string(),
                mode: context.mode.to_string(),
                class: class.to_string(),
            });
        }

        if let Some(reason) = check_prerequisites(&entry.descriptor, context).await {
            debug!(tool_name = name, reason = %reason, "rejected by context validation");
            return Err(KestrelError::ContextValidationFailure {
                tool: name.to_string(),
                reason,
            });
        }

        self.listeners.notify(&LifecycleEvent::Pre {
            tool: name.to_string(),
            mode: context.mode,
        });

        let budget = entry
            .descriptor
            .capabilities
            .max_exec_ms
            .map_or(self.default_budget, Duration::from_millis);
        let start = Instant::now();
        let mut result = self.invoke(&entry, context, args, budget).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        result.duration_ms = elapsed_ms;

        entry.counters.record(result.success, elapsed_ms);

        if result.success {
            info!(tool_name = name, duration_ms = elapsed_ms, "tool execution completed");
        } else {
            let error = result.error.clone().unwrap_or_default();
            warn!(tool_name = name, duration_ms = elapsed_ms, error = %error, "tool execution failed");
            self.listeners.notify(&LifecycleEvent::Error {
                tool: name.to_string(),
                error,
            });
        }
        self.listeners.notify(&LifecycleEvent::Post {
            tool: name.to_string(),
            success: result.success,
            duration_ms: elapsed_ms,
        });

        Ok(result)
    }

    /// Run the tool on its own task under `budget`. Every failure mode is
    /// folded into an unsuccessful [`ToolResult`].
    ///
    /// The task is aborted if the caller drops this future, so a cancelled
    /// call never leaves the tool running past its budget.
    async fn invoke(
        &self,
        entry: &Arc<Entry>,
        context: &ToolContext,
        args: serde_json::Value,
        budget: Duration,
    ) -> ToolResult {
        let name = entry.descriptor.name.clone();
        let tool = Arc::clone(&entry.tool);
        let ctx = context.clone();
        let mut handle =
            AbortOnDropHandle::new(tokio::spawn(async move { tool.execute(&ctx, args).await }));

        match tokio::time::timeout(budget, &mut handle).await {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => ToolResult::failure(e.to_string()),
            Ok(Err(join_err)) => {
                ToolResult::failure(KestrelError::tool(&name, format!("execution panicked: {join_err}")).to_string())
            }
            Err(_) => {
                handle.abort();
                ToolResult::failure(
                    KestrelError::tool(
                        &name,
                        format!("exceeded time budget of {}ms", budget.as_millis()),
                    )
                    .to_string(),
                )
            }
        }
    }

    /// Counters for one tool.
    pub fn tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.read().ok()?.get(name).map(|e| snapshot(e))
    }

    /// Aggregate counters across all tools.
    pub fn stats(&self) -> RegistryStats {
        let Ok(tools) = self.read() else {
            return RegistryStats::default();
        };

        let mut stats = RegistryStats {
            total_tools: tools.len(),
            ..RegistryStats::default()
        };
        for entry in tools.values() {
            let tool = snapshot(entry);
            stats.total_executions += tool.executions;
            stats.total_errors += tool.errors;
            let category = stats.by_category.entry(tool.category).or_default();
            category.tools += 1;
            category.executions += tool.executions;
            category.errors += tool.errors;
            stats.tools.push(tool);
        }
        stats.tools.sort_by(|a, b| a.name.cmp(&b.name));
        stats.success_rate = success_rate(stats.total_executions, stats.total_errors);
        stats
    }
}

fn snapshot(entry: &Entry) -> ToolStats {
    ToolStats {
        name: entry.descriptor.name.clone(),
        category: entry.descriptor.category,
        executions: entry.counters.executions.load(Ordering::Relaxed),
        errors: entry.counters.errors.load(Ordering::Relaxed),
        total_time_ms: entry.counters.total_time_ms.load(Ordering::Relaxed),
        last_run: *entry
            .counters
            .last_run
            .lock()
            .unwrap_or_else(|e| e.into_inner()),
    }
}

fn success_rate(executions: u64, errors: u64) -> f64 {
    executions.saturating_sub(errors) as f64 / executions.max(1) as f64
}

/// First unmet prerequisite, if any.
async fn check_prerequisites(descriptor: &ToolDescriptor, context: &ToolContext) -> Option<String> {
    let caps = &descriptor.capabilities;
    if caps.requires_filesystem {
        let is_dir = tokio::fs::metadata(&context.working_directory)
            .await
            .is_ok_and(|m| m.is_dir());
        if !is_dir {
            return Some(format!(
                "working directory {} does not exist",
                context.working_directory.display()
            ));
        }
    }
    if caps.requires_network && !context.network.connected {
        return Some("network is not connected".into());
    }
    if caps.requires_thermal_safe && !context.thermal.safe {
        return Some(match context.thermal.temperature_c {
            Some(t) => format!("thermal state unsafe ({t:.1}°C)"),
            None => "thermal state unsafe".into(),
        });
    }
    None
}
