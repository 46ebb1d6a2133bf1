//! Operational mode state machine.
//!
//! Exactly one [`OperationalMode`] is active for a [`ModeController`] at any
//! instant. Modes are ordered by capability:
//!
//! ```text
//!   Full ──fail──► Degraded ──fail──► Autonomous ──fail──► Recovery
//!    ▲                                                        │
//!    └──────────── evaluate_and_adapt (all probes pass) ──────┘
//! ```
//!
//! - Failure signals step down exactly one level and never skip.
//! - Only [`ModeController::evaluate_and_adapt`] raises the mode, and it may
//!   jump straight to the level the current probes justify.
//! - [`ModeController::force_mode`] sets any mode for operator overrides.
//!
//! Transitions are logged and broadcast; requests already in flight keep
//! running under the mode they started with.

pub mod probes;

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::FailureKind;
use crate::routing::types::ProviderKind;
use probes::{NetworkProbe, NetworkSnapshot, ThermalProbe, ThermalSnapshot};

/// Span name for mode transitions.
pub const SPAN_MODE_TRANSITION: &str = "kestrel.mode.transition";

/// Number of transitions retained by [`ModeController::history`].
const HISTORY_LIMIT: usize = 32;

/// Broadcast channel capacity for transition notifications.
const CHANNEL_CAPACITY: usize = 64;

/// Process-wide operating level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationalMode {
    /// All providers and tools permitted.
    #[default]
    Full,
    /// Remote providers may be skipped by health gating; core tools remain.
    Degraded,
    /// Local-only providers and tools.
    Autonomous,
    /// Filesystem-only, no network, minimal tool set.
    Recovery,
}

impl OperationalMode {
    /// All modes from most to least capable.
    pub const ALL: [OperationalMode; 4] = [
        OperationalMode::Full,
        OperationalMode::Degraded,
        OperationalMode::Autonomous,
        OperationalMode::Recovery,
    ];

    /// Capability level: Full = 3 down to Recovery = 0.
    pub fn level(self) -> u8 {
        match self {
            Self::Full => 3,
            Self::Degraded => 2,
            Self::Autonomous => 1,
            Self::Recovery => 0,
        }
    }

    /// The next less capable mode. Recovery is the floor.
    pub fn step_down(self) -> Self {
        match self {
            Self::Full => Self::Degraded,
            Self::Degraded => Self::Autonomous,
            Self::Autonomous | Self::Recovery => Self::Recovery,
        }
    }

    /// Whether outbound network use is allowed in this mode.
    pub fn allows_network(self) -> bool {
        matches!(self, Self::Full | Self::Degraded)
    }

    /// Whether a provider of `kind` may be routed to in this mode.
    pub fn permits_provider(self, kind: ProviderKind) -> bool {
        match self {
            Self::Full | Self::Degraded => true,
            Self::Autonomous => kind.is_local(),
            Self::Recovery => false,
        }
    }

    /// The most capable mode the given probe results justify.
    pub fn supported_by(network: &NetworkSnapshot, thermal: &ThermalSnapshot) -> Self {
        match (network.connected, thermal.safe) {
            (true, true) => Self::Full,
            (true, false) => Self::Degraded,
            (false, true) => Self::Autonomous,
            (false, false) => Self::Recovery,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Degraded => "degraded",
            Self::Autonomous => "autonomous",
            Self::Recovery => "recovery",
        }
    }
}

impl fmt::Display for OperationalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure signal reported by a caller, classified by cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureSignal {
    /// A provider failed with the given kind.
    Provider(FailureKind),
    /// The whole fallback chain failed.
    ProvidersExhausted,
    /// A network-dependent operation found no connectivity.
    Network,
    /// Thermal limits were exceeded.
    Thermal,
    /// An internal invariant was found broken.
    Internal,
}

impl fmt::Display for FailureSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Provider(kind) => write!(f, "provider failure ({kind})"),
            Self::ProvidersExhausted => f.write_str("all providers exhausted"),
            Self::Network => f.write_str("network unavailable"),
            Self::Thermal => f.write_str("thermal limit"),
            Self::Internal => f.write_str("internal error"),
        }
    }
}

/// What caused a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionTrigger {
    Failure(FailureSignal),
    Evaluation,
    Manual,
}

/// A recorded mode change.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeTransition {
    pub from: OperationalMode,
    pub to: OperationalMode,
    pub reason: String,
    pub trigger: TransitionTrigger,
    pub at: DateTime<Utc>,
}

/// Result of one [`ModeController::evaluate_and_adapt`] pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    /// Mode after the pass.
    pub mode: OperationalMode,
    pub network: NetworkSnapshot,
    pub thermal: ThermalSnapshot,
    /// Whether the pass changed the mode.
    pub changed: bool,
}

#[derive(Debug)]
struct ModeState {
    mode: OperationalMode,
    network: NetworkSnapshot,
    thermal: ThermalSnapshot,
}

/// Owns the active [`OperationalMode`] and the safety probes that drive it.
pub struct ModeController {
    state: RwLock<ModeState>,
    history: Mutex<VecDeque<ModeTransition>>,
    tx: broadcast::Sender<ModeTransition>,
    network: Arc<dyn NetworkProbe>,
    thermal: Arc<dyn ThermalProbe>,
}

impl fmt::Debug for ModeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeController")
            .field("mode", &self.current())
            .finish_non_exhaustive()
    }
}

impl ModeController {
    /// Create a controller starting in `initial`.
    ///
    /// Until the first evaluation the cached snapshots read online and safe.
    pub fn new(
        initial: OperationalMode,
        network: Arc<dyn NetworkProbe>,
        thermal: Arc<dyn ThermalProbe>,
    ) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(ModeState {
                mode: initial,
                network: NetworkSnapshot::online(),
                thermal: ThermalSnapshot::safe(),
            }),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            tx,
            network,
            thermal,
        }
    }

    /// The active mode.
    pub fn current(&self) -> OperationalMode {
        self.state.read().unwrap_or_else(|e| e.into_inner()).mode
    }

    /// Snapshots recorded by the most recent evaluation.
    pub fn last_snapshots(&self) -> (NetworkSnapshot, ThermalSnapshot) {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        (state.network, state.thermal)
    }

    /// Subscribe to transition notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ModeTransition> {
        self.tx.subscribe()
    }

    /// Recent transitions, oldest first.
    pub fn history(&self) -> Vec<ModeTransition> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Step down one level in response to a failure.
    ///
    /// Returns the mode after the step. Recovery stays Recovery.
    pub fn report_failure(&self, signal: FailureSignal, detail: &str) -> OperationalMode {
        let reason = if detail.is_empty() {
            signal.to_string()
        } else {
            format!("{signal}: {detail}")
        };
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let from = state.mode;
        let to = from.step_down();
        if to != from {
            state.mode = to;
            drop(state);
            self.record(from, to, reason, TransitionTrigger::Failure(signal));
        }
        to
    }

    /// Manual override to any mode.
    pub fn force_mode(&self, mode: OperationalMode, reason: &str) -> OperationalMode {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let from = state.mode;
        if from != mode {
            state.mode = mode;
            drop(state);
            self.record(from, mode, reason.to_string(), TransitionTrigger::Manual);
        }
        mode
    }

    /// Re-run the safety probes and adapt the mode.
    ///
    /// Promotion jumps directly to the level the probes support. Demotion
    /// moves one level toward it, matching the failure path.
    pub async fn evaluate_and_adapt(&self) -> Evaluation {
        let network = self.network.probe().await;
        let thermal = self.thermal.probe().await;
        let supported = OperationalMode::supported_by(&network, &thermal);

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.network = network;
        state.thermal = thermal;
        let from = state.mode;
        let to = if supported.level() > from.level() {
            supported
        } else if supported.level() < from.level() {
            from.step_down()
        } else {
            from
        };
        let changed = to != from;
        if changed {
            state.mode = to;
            drop(state);
            let reason = format!(
                "safety probes: network {}, thermal {}",
                if network.connected { "up" } else { "down" },
                if thermal.safe { "safe" } else { "unsafe" },
            );
            self.record(from, to, reason, TransitionTrigger::Evaluation);
        }

        Evaluation {
            mode: to,
            network,
            thermal,
            changed,
        }
    }

    /// Evaluate on a fixed interval until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(interval_ms = interval.as_millis() as u64, "mode evaluation loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("mode evaluation loop stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.evaluate_and_adapt().await;
                }
            }
        }
    }

    fn record(
        &self,
        from: OperationalMode,
        to: OperationalMode,
        reason: String,
        trigger: TransitionTrigger,
    ) {
        let span = tracing::info_span!(SPAN_MODE_TRANSITION, from = %from, to = %to);
        let _enter = span.enter();
        if to.level() < from.level() {
            warn!(from = %from, to = %to, reason = %reason, "operational mode degraded");
        } else {
            info!(from = %from, to = %to, reason = %reason, "operational mode changed");
        }

        let transition = ModeTransition {
            from,
            to,
            reason,
            trigger,
            at: Utc::now(),
        };
        {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(transition.clone());
        }
        // No subscribers is not an error.
        let _ = self.tx.send(transition);
    }
}
