//! The reachability engine.
//!
//! [`NetworkMonitor`] wires the signal layer (interfaces, DNS, endpoint
//! probes) to the [`StateReconciler`] and drives it from the [`Scheduler`].
//!
//! ```text
//!  Scheduler ──► interfaces ─┐
//!            ──► DNS ────────┼──► QualityReport ──► Proposal ──► StateReconciler ──► subscribers
//!            ──► endpoints ──┘          ▲
//!                 (fallback on ambiguity)┘
//! ```

mod history;
mod reconciler;
mod scheduler;

pub use history::*;
pub use reconciler::*;
pub use scheduler::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::metrics::QualityReport;
use crate::probe::{probe_all, DnsMultiplexer, EndpointProbe, EndpointTarget, ProbeConfig, TcpProber};
use crate::types::{
    DiagnosticsUpdate, EndpointProbeResult, InterfaceInfo, NetworkState, ProbeErrorCode,
    StateChange, StateUpdate,
};
use crate::util::{
    connection_type_of, primary_interface, vpn_active, InterfacePoll, InterfaceProvider,
    InterfaceWatcher, SystemInterfaces, VpnDetector,
};

/// VPN detector configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnConfig {
    /// Disconnect signals are ignored for this long after start.
    #[serde(default = "default_vpn_startup_grace", with = "humantime_serde")]
    pub startup_grace: Duration,
}

fn default_vpn_startup_grace() -> Duration {
    Duration::from_secs(5)
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            startup_grace: default_vpn_startup_grace(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub reconciler: ReconcilerConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub probe: ProbeConfig,

    #[serde(default)]
    pub vpn: VpnConfig,
}

/// Connectivity monitor service.
///
/// Construct once at the composition root, [`start`](Self::start) it, and
/// hand out the `Arc` to consumers. All reads return snapshots.
pub struct NetworkMonitor {
    config: MonitorConfig,
    reconciler: StateReconciler,
    scheduler: Scheduler,
    watcher: Arc<InterfaceWatcher>,
    vpn: VpnDetector,
    dns: DnsMultiplexer,
    prober: Arc<dyn EndpointProbe>,
    gate: CheckGate,
    quick_votes: Mutex<DisagreementCounter>,
    started: AtomicBool,
}

impl NetworkMonitor {
    /// Create a monitor using the operating system's interfaces, resolvers
    /// and sockets.
    pub fn new(config: MonitorConfig) -> Self {
        let dns = DnsMultiplexer::for_current_platform(config.probe.dns_timeout);
        let prober = Arc::new(TcpProber::new(config.probe.probe_grace));
        Self::with_components(config, Arc::new(SystemInterfaces), dns, prober)
    }

    /// Create a monitor over explicit signal sources.
    pub fn with_components(
        config: MonitorConfig,
        interfaces: Arc<dyn InterfaceProvider>,
        dns: DnsMultiplexer,
        prober: Arc<dyn EndpointProbe>,
    ) -> Self {
        Self {
            reconciler: StateReconciler::new(config.reconciler.clone()),
            scheduler: Scheduler::new(config.schedule.clone()),
            watcher: Arc::new(InterfaceWatcher::new(interfaces)),
            vpn: VpnDetector::new(config.vpn.startup_grace),
            dns,
            prober,
            gate: CheckGate::new(config.schedule.quick_check_skip_window),
            quick_votes: Mutex::new(DisagreementCounter::new(
                config.reconciler.consensus_threshold,
            )),
            started: AtomicBool::new(false),
            config,
        }
    }

    /// Start the background timers.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        if self.reconciler.is_destroyed() {
            return Err(Error::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Network monitor already started");
            return Ok(());
        }

        info!(
            "Starting network monitor ({} endpoints, {} DNS hosts, DNS strategies: {})",
            self.config.probe.endpoints.len(),
            self.config.probe.dns_hosts.len(),
            self.dns.strategy_names().join(", ")
        );
        self.scheduler.start(Arc::clone(self));
        Ok(())
    }

    /// Stop the timers. Checks still in flight finish but their results are
    /// discarded.
    pub fn stop(&self) {
        self.scheduler.stop();
        self.reconciler.destroy();
        info!("Network monitor stopped");
    }

    /// Wait for the timer tasks to exit after [`stop`](Self::stop).
    pub async fn join(&self) {
        self.scheduler.join().await;
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.scheduler.is_stopped()
    }

    /// Current state. Never performs I/O.
    pub fn state(&self) -> NetworkState {
        self.reconciler.state()
    }

    /// Subscribe to confirmed transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.reconciler.subscribe()
    }

    /// Run one comprehensive check now and return the resulting state.
    ///
    /// Skips consensus but still honours startup grace, hysteresis and
    /// flip-flop suppression. Meant for explicit user requests, not timers.
    pub async fn force_check(&self) -> NetworkState {
        if self.reconciler.is_destroyed() {
            return self.state();
        }
        self.run_comprehensive(CheckSource::Forced, true).await;
        self.state()
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Interface snapshot under the configured timeout. `None` when the
    /// provider hung or panicked.
    async fn bounded_poll(&self) -> Option<InterfacePoll> {
        let watcher = Arc::clone(&self.watcher);
        let task = tokio::task::spawn_blocking(move || watcher.poll());

        match tokio::time::timeout(self.config.probe.interface_timeout, task).await {
            Ok(Ok(poll)) => Some(poll),
            Ok(Err(e)) => {
                warn!("Interface enumeration failed: {}", e);
                None
            }
            Err(_) => {
                warn!(
                    "Interface enumeration timed out after {:?}",
                    self.config.probe.interface_timeout
                );
                None
            }
        }
    }

    /// Probe `targets` with an outer bound in case the prober overruns its
    /// own timeouts.
    async fn bounded_probe(&self, targets: &[EndpointTarget]) -> Vec<EndpointProbeResult> {
        let budget = targets
            .iter()
            .map(|t| t.timeout)
            .max()
            .unwrap_or_default()
            + self.config.probe.probe_grace * 2;

        match tokio::time::timeout(budget, probe_all(self.prober.as_ref(), targets)).await {
            Ok(results) => results,
            Err(_) => {
                warn!("Endpoint probes overran {:?}", budget);
                targets
                    .iter()
                    .map(|t| EndpointProbeResult::failed(&t.id, ProbeErrorCode::Timeout))
                    .collect()
            }
        }
    }

    /// VPN flag derived from a full snapshot. An absent VPN is not trusted
    /// during the detector's startup grace.
    fn vpn_from_snapshot(&self, snapshot: &[InterfaceInfo]) -> Option<bool> {
        let active = vpn_active(snapshot);
        if !active && self.vpn.in_startup_grace() {
            None
        } else {
            Some(active)
        }
    }

    async fn run_comprehensive(&self, source: CheckSource, immediate: bool) -> Decision {
        let guard = self.gate.begin_comprehensive();
        self.quick_votes.lock().reset();
        let probe = &self.config.probe;
        let started = Instant::now();

        let (poll, dns, endpoints) = tokio::join!(
            self.bounded_poll(),
            self.dns.probe_all(&probe.dns_hosts),
            self.bounded_probe(&probe.endpoints),
        );

        let mut weighted: Vec<(f64, EndpointProbeResult)> = probe
            .endpoints
            .iter()
            .map(|t| t.weight)
            .zip(endpoints)
            .collect();
        let mut report = QualityReport::from_results(&weighted, &dns);

        if report.ambiguous && !report.is_online {
            debug!("Ambiguous probe failures, trying fallback endpoints");
            let fallback = self.bounded_probe(&probe.fallback_endpoints).await;
            weighted.extend(
                probe
                    .fallback_endpoints
                    .iter()
                    .map(|t| t.weight)
                    .zip(fallback),
            );
            report = QualityReport::from_results(&weighted, &dns);
        }
        drop(guard);

        debug!(
            "Comprehensive check ({}) in {:?}: {}",
            source.as_str(),
            started.elapsed(),
            report.summary()
        );

        let mut update = StateUpdate::verdict(report.is_online, report.quality);
        update.diagnostics = Some(DiagnosticsUpdate {
            dns_resolvable: Some(report.dns_ok),
            internet_reachable: Some(report.endpoint_ok),
            captive_portal: Some(detect_captive_portal()),
            latency_ms: Some(report.latency_ms()),
        });
        if let Some(poll) = poll {
            if !self.apply_vpn_signal(&poll, &mut update) {
                update.vpn_active = self.vpn_from_snapshot(&poll.snapshot);
            }
            fill_interfaces(&mut update, poll.snapshot);
        }

        self.reconciler.mark_initialized();

        let mut proposal = Proposal::new(update, source);
        proposal.immediate = immediate;
        self.reconciler.submit(proposal).await
    }

    /// Apply a VPN connect/disconnect signal. Returns whether one was seen.
    fn apply_vpn_signal(&self, poll: &InterfacePoll, update: &mut StateUpdate) -> bool {
        let Some(signal) = self.vpn.observe(&poll.changes) else {
            return false;
        };
        // Another tunnel may still be up after one goes away.
        update.vpn_active = Some(signal.is_connected() || vpn_active(&poll.snapshot));
        true
    }

    /// Second opinion when the quick target fails with an ambiguous error.
    async fn fallback_reachable(&self) -> bool {
        let results = self.bounded_probe(&self.config.probe.fallback_endpoints).await;
        results.iter().any(|r| r.success)
    }
}

#[async_trait]
impl CheckRunner for NetworkMonitor {
    async fn poll_interfaces(&self) {
        let Some(poll) = self.bounded_poll().await else {
            return;
        };
        if poll.changes.is_empty() {
            return;
        }

        if poll.has_significant_changes() {
            self.scheduler.wake_comprehensive();
        }

        let mut update = StateUpdate::default();
        let source = if self.apply_vpn_signal(&poll, &mut update) {
            CheckSource::Vpn
        } else {
            CheckSource::Interface
        };
        fill_interfaces(&mut update, poll.snapshot);

        self.reconciler.submit(Proposal::new(update, source)).await;
    }

    async fn quick_check(&self) {
        let Some(epoch) = self.gate.begin_quick() else {
            debug!("Skipping quick check: comprehensive check running or just started");
            return;
        };
        let Some(target) = self.config.probe.quick_target() else {
            return;
        };

        let mut result = self.prober.probe(target).await;
        if !result.success && result.is_ambiguous() && self.fallback_reachable().await {
            debug!("Quick target {} ambiguous, fallback reachable", target.id);
            result = EndpointProbeResult {
                success: true,
                error_code: None,
                ..result
            };
        }

        if !self.gate.is_current(epoch) {
            debug!("Discarding quick check superseded by comprehensive check");
            return;
        }

        let current = self.reconciler.state();
        let fire = self.quick_votes.lock().observe(result.success == current.is_online);
        if !fire {
            return;
        }

        let report = QualityReport::from_results(&[(target.weight, result)], &[]);
        let mut update = StateUpdate::verdict(report.is_online, report.quality);
        update.diagnostics = Some(DiagnosticsUpdate {
            internet_reachable: Some(report.endpoint_ok),
            latency_ms: Some(report.latency_ms()),
            ..Default::default()
        });

        info!(
            "Quick checks disagree with current state, proposing {}",
            report.summary()
        );
        self.reconciler
            .submit(Proposal::new(update, CheckSource::Quick).immediate())
            .await;
    }

    async fn comprehensive_check(&self) {
        self.run_comprehensive(CheckSource::Comprehensive, false)
            .await;
    }

    fn last_transition(&self) -> Option<Instant> {
        self.reconciler.last_transition()
    }
}

fn fill_interfaces(update: &mut StateUpdate, snapshot: Vec<InterfaceInfo>) {
    update.primary_interface = Some(primary_interface(&snapshot).map(|i| i.name.clone()));
    update.connection_type = Some(connection_type_of(&snapshot));
    update.interfaces = Some(snapshot);
}

/// Captive portal detection is not implemented; never reports a portal.
fn detect_captive_portal() -> bool {
    false
}
