//! Safety probes consulted by the mode controller and the tool registry.
//!
//! A probe returns a small snapshot of one local safety signal:
//!
//! - [`NetworkSnapshot`]: whether upstream services are reachable
//! - [`ThermalSnapshot`]: whether resource-intensive work is currently safe
//!
//! Probes never fail: an error while probing is folded into the snapshot
//! (network probes report disconnected, thermal probes report safe with
//! no temperature reading).

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default root of the Linux thermal sysfs tree.
pub const DEFAULT_THERMAL_ROOT: &str = "/sys/class/thermal";

/// Default temperature above which heavy work is vetoed (°C).
pub const DEFAULT_THERMAL_LIMIT_C: f32 = 85.0;

/// Network reachability at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    /// Whether the probe target answered.
    pub connected: bool,
    /// Round-trip latency of the probe, when connected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl NetworkSnapshot {
    /// A connected snapshot with no latency measurement.
    pub fn online() -> Self {
        Self {
            connected: true,
            latency_ms: None,
        }
    }

    /// A disconnected snapshot.
    pub fn offline() -> Self {
        Self {
            connected: false,
            latency_ms: None,
        }
    }
}

/// Thermal safety at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalSnapshot {
    /// Whether heavy work is currently allowed.
    pub safe: bool,
    /// Hottest observed zone in degrees Celsius, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature_c: Option<f32>,
}

impl ThermalSnapshot {
    /// A safe snapshot without a temperature reading.
    pub fn safe() -> Self {
        Self {
            safe: true,
            temperature_c: None,
        }
    }

    /// An unsafe snapshot at the given temperature.
    pub fn hot(temperature_c: f32) -> Self {
        Self {
            safe: false,
            temperature_c: Some(temperature_c),
        }
    }
}

/// Source of [`NetworkSnapshot`]s.
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    /// Take a fresh snapshot.
    async fn probe(&self) -> NetworkSnapshot;
}

/// Source of [`ThermalSnapshot`]s.
#[async_trait]
pub trait ThermalProbe: Send + Sync {
    /// Take a fresh snapshot.
    async fn probe(&self) -> ThermalSnapshot;
}

// ── TCP network probe ─────────────────────────────────────────

/// Checks reachability by opening a TCP connection to a known address.
#[derive(Debug, Clone)]
pub struct TcpNetworkProbe {
    target: String,
    timeout: Duration,
}

impl TcpNetworkProbe {
    /// Probe `target` (a `host:port` string) with the given connect timeout.
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for TcpNetworkProbe {
    async fn probe(&self) -> NetworkSnapshot {
        let start = tokio::time::Instant::now();
        match tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.target)).await
        {
            Ok(Ok(_stream)) => NetworkSnapshot {
                connected: true,
                latency_ms: Some(start.elapsed().as_millis() as u64),
            },
            Ok(Err(e)) => {
                debug!(target_addr = %self.target, error = %e, "network probe failed");
                NetworkSnapshot::offline()
            }
            Err(_) => {
                debug!(target_addr = %self.target, "network probe timed out");
                NetworkSnapshot::offline()
            }
        }
    }
}

// ── sysfs thermal probe ───────────────────────────────────────

/// Reads `thermal_zone*/temp` files (millidegrees Celsius) and reports the
/// hottest zone.
///
/// When no zone can be read the snapshot is safe with no temperature, so
/// hosts without thermal telemetry are not vetoed.
#[derive(Debug, Clone)]
pub struct SysfsThermalProbe {
    root: PathBuf,
    limit_c: f32,
}

impl SysfsThermalProbe {
    /// Probe zones under `root`, vetoing work at or above `limit_c`.
    pub fn new(root: impl Into<PathBuf>, limit_c: f32) -> Self {
        Self {
            root: root.into(),
            limit_c,
        }
    }

    async fn hottest_zone_c(&self) -> Option<f32> {
        let mut entries = tokio::fs::read_dir(&self.root).await.ok()?;
        let mut hottest: Option<f32> = None;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with("thermal_zone") {
                continue;
            }
            if let Some(c) = read_zone_celsius(&entry.path().join("temp")).await {
                hottest = Some(hottest.map_or(c, |h| h.max(c)));
            }
        }
        hottest
    }
}

impl Default for SysfsThermalProbe {
    fn default() -> Self {
        Self::new(DEFAULT_THERMAL_ROOT, DEFAULT_THERMAL_LIMIT_C)
    }
}

async fn read_zone_celsius(path: &Path) -> Option<f32> {
    let raw = tokio::fs::read_to_string(path).await.ok()?;
    let millis: i64 = raw.trim().parse().ok()?;
    Some(millis as f32 / 1000.0)
}

#[async_trait]
impl ThermalProbe for SysfsThermalProbe {
    async fn probe(&self) -> ThermalSnapshot {
        match self.hottest_zone_c().await {
            Some(c) => ThermalSnapshot {
                safe: c < self.limit_c,
                temperature_c: Some(c),
            },
            None => ThermalSnapshot::safe(),
        }
    }
}

// ── Static probes ─────────────────────────────────────────────

/// Network probe returning a settable snapshot.
#[derive(Debug)]
pub struct StaticNetworkProbe {
    snapshot: std::sync::RwLock<NetworkSnapshot>,
}

impl StaticNetworkProbe {
    pub fn new(snapshot: NetworkSnapshot) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot returned by subsequent probes.
    pub fn set(&self, snapshot: NetworkSnapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

#[async_trait]
impl NetworkProbe for StaticNetworkProbe {
    async fn probe(&self) -> NetworkSnapshot {
        *self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Thermal probe returning a settable snapshot.
#[derive(Debug)]
pub struct StaticThermalProbe {
    snapshot: std::sync::RwLock<ThermalSnapshot>,
}

impl StaticThermalProbe {
    pub fn new(snapshot: ThermalSnapshot) -> Self {
        Self {
            snapshot: std::sync::RwLock::new(snapshot),
        }
    }

    /// Replace the snapshot returned by subsequent probes.
    pub fn set(&self, snapshot: ThermalSnapshot) {
        *self.snapshot.write().unwrap_or_else(|e| e.into_inner()) = snapshot;
    }
}

#[async_trait]
impl ThermalProbe for StaticThermalProbe {
    async fn probe(&self) -> ThermalSnapshot {
        *self.snapshot.read().unwrap_or_else(|e| e.into_inner())
    }
}
