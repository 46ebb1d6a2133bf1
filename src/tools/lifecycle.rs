//! Lifecycle notifications fired around each tool invocation.
//!
//! Listeners observe; they cannot veto or alter a result. A listener that
//! returns an error or panics is logged and skipped.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::warn;

use crate::mode::OperationalMode;

/// Event delivered to listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Gating passed; the tool is about to run.
    Pre { tool: String, mode: OperationalMode },
    /// The invocation finished, successfully or not.
    Post {
        tool: String,
        success: bool,
        duration_ms: u64,
    },
    /// The invocation failed.
    Error { tool: String, error: String },
}

impl LifecycleEvent {
    pub fn tool(&self) -> &str {
        match self {
            Self::Pre { tool, .. } | Self::Post { tool, .. } | Self::Error { tool, .. } => tool,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pre { .. } => "pre",
            Self::Post { .. } => "post",
            Self::Error { .. } => "error",
        }
    }
}

/// Observer of tool lifecycle events.
pub trait ToolLifecycleListener: Send + Sync {
    /// # Errors
    /// Errors are logged by the registry and otherwise ignored.
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()>;
}

impl<F> ToolLifecycleListener for F
where
    F: Fn(&LifecycleEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) -> anyhow::Result<()> {
        self(event)
    }
}

/// Ordered list of listeners.
#[derive(Default)]
pub struct ListenerSet {
    listeners: RwLock<Vec<Arc<dyn ToolLifecycleListener>>>,
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("len", &self.len())
            .finish()
    }
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn ToolLifecycleListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every listener in registration order.
    pub fn notify(&self, event: &LifecycleEvent) {
        // Clone the list so a listener that registers another listener does
        // not deadlock.
        let listeners: Vec<Arc<dyn ToolLifecycleListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener.on_event(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(tool_name = event.tool(), event = event.kind(), error = %e, "lifecycle listener failed");
                }
                Err(_) => {
                    warn!(tool_name = event.tool(), event = event.kind(), "lifecycle listener panicked");
                }
            }
        }
    }
}
