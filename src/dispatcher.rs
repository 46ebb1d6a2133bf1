//! Top-level entry point combining the operational mode with routing and
//! tool execution.
//!
//! Build one [`Dispatcher`] at startup and share it. It holds no global
//! state, so tests can construct isolated instances.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::KestrelConfig;
use crate::error::{KestrelError, Result};
use crate::mode::probes::{NetworkProbe, ThermalProbe};
use crate::mode::{Evaluation, FailureSignal, ModeController, OperationalMode};
use crate::routing::{FallbackRouter, ProviderId, RequestContext, ResponseEnvelope};
use crate::tools::{RegistryStats, ToolCapabilityRegistry, ToolContext, ToolResult, register_builtins};

/// Mode-aware facade over the router, tool registry, and mode controller.
pub struct Dispatcher {
    router: Arc<FallbackRouter>,
    registry: Arc<ToolCapabilityRegistry>,
    mode: Arc<ModeController>,
    working_directory: PathBuf,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode.current())
            .field("router", &self.router)
            .field("registry", &self.registry)
            .field("working_directory", &self.working_directory)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        router: Arc<FallbackRouter>,
        registry: Arc<ToolCapabilityRegistry>,
        mode: Arc<ModeController>,
        working_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            router,
            registry,
            mode,
            working_directory: working_directory.into(),
        }
    }

    /// Wire everything from configuration: providers, built-in tools, and
    /// the TCP/sysfs safety probes.
    ///
    /// # Errors
    /// Returns [`KestrelError::Internal`] if built-in tools cannot be
    /// registered. Malformed provider entries are skipped, not fatal.
    pub fn from_config(config: &KestrelConfig) -> Result<Self> {
        let router = Arc::new(FallbackRouter::from_config(config));

        let registry = Arc::new(ToolCapabilityRegistry::with_default_budget(
            config.tools.default_max_exec(),
        ));
        register_builtins(&registry, &config.tools)?;

        let network: Arc<dyn NetworkProbe> = Arc::new(config.mode.network_probe());
        let thermal: Arc<dyn ThermalProbe> = Arc::new(config.mode.thermal_probe());
        let mode = Arc::new(ModeController::new(
            config.mode.initial_mode,
            network,
            thermal,
        ));

        let working_directory = config.tools.working_directory.clone().unwrap_or_else(|| {
            std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
        });

        info!(
            providers = router.declared_order().len(),
            tools = registry.len(),
            mode = %mode.current(),
            "dispatcher ready"
        );
        Ok(Self::new(router, registry, mode, working_directory))
    }

    pub fn router(&self) -> &Arc<FallbackRouter> {
        &self.router
    }

    pub fn registry(&self) -> &Arc<ToolCapabilityRegistry> {
        &self.registry
    }

    pub fn mode_controller(&self) -> &Arc<ModeController> {
        &self.mode
    }

    pub fn mode(&self) -> OperationalMode {
        self.mode.current()
    }

    /// Provider chain the current mode allows, in declared order.
    fn permitted_chain(&self, mode: OperationalMode) -> Vec<ProviderId> {
        self.router
            .declared_order()
            .into_iter()
            .filter(|id| {
                self.router
                    .handle(id)
                    .is_some_and(|h| mode.permits_provider(h.descriptor().kind))
            })
            .collect()
    }

    /// Route `request` across the providers the current mode allows.
    ///
    /// The request's snapshots are replaced with the controller's latest.
    /// An exhausted chain is reported to the mode controller as a failure.
    pub async fn route(&self, request: RequestContext) -> ResponseEnvelope {
        let mode = self.mode.current();
        let (network, thermal) = self.mode.last_snapshots();
        let request = request.with_snapshots(network, thermal);
        let chain = self.permitted_chain(mode);
        debug!(mode = %mode, chain = ?chain, "routing request");

        let envelope = self
            .router
            .route(&request, &chain, request.preferred_provider.as_deref())
            .await
            .with_metadata("mode", serde_json::json!(mode));

        if !envelope.success {
            let detail = envelope.error.as_deref().unwrap_or_default();
            self.mode
                .report_failure(FailureSignal::ProvidersExhausted, detail);
        }
        envelope
    }

    /// Execute a tool with a context built from the current mode, the latest
    /// snapshots, and the configured working directory.
    ///
    /// # Errors
    /// See [`execute_with`](Self::execute_with).
    pub async fn execute(&self, name: &str, args: serde_json::Value) -> Result<ToolResult> {
        let (network, thermal) = self.mode.last_snapshots();
        let context = ToolContext::new(self.mode.current(), self.working_directory.clone())
            .with_snapshots(network, thermal);
        self.execute_with(name, &context, args).await
    }

    /// Execute a tool with an explicit context.
    ///
    /// # Errors
    /// Returns the registry's gating errors unchanged. An
    /// [`KestrelError::Internal`] error also steps the mode down.
    pub async fn execute_with(
        &self,
        name: &str,
        context: &ToolContext,
        args: serde_json::Value,
    ) -> Result<ToolResult> {
        let result = self.registry.execute(name, context, args).await;
        if let Err(e @ KestrelError::Internal(_)) = &result {
            error!(tool_name = name, error = %e, "tool registry invariant broken");
            self.mode
                .report_failure(FailureSignal::Internal, &e.to_string());
        }
        result
    }

    /// Providers that are enabled, not Unavailable, and allowed by the
    /// current mode.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        let mode = self.mode.current();
        self.router
            .available_providers()
            .into_iter()
            .filter(|id| {
                self.router
                    .handle(id)
                    .is_some_and(|h| mode.permits_provider(h.descriptor().kind))
            })
            .collect()
    }

    /// Tool names the current mode allows.
    pub fn available_tools(&self) -> Vec<String> {
        self.registry.list_available(self.mode.current())
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    pub fn force_mode(&self, mode: OperationalMode, reason: &str) -> OperationalMode {
        self.mode.force_mode(mode, reason)
    }

    pub async fn evaluate_and_adapt(&self) -> Evaluation {
        self.mode.evaluate_and_adapt().await
    }

    /// Spawn the periodic mode evaluation loop.
    pub fn spawn_mode_monitor(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(&self.mode).run(interval, cancel))
    }
}
