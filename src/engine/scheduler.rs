//! Adaptive scheduling of interface polls, quick checks and comprehensive
//! checks.
//!
//! Each timer runs in its own task and is re-armed only after its work has
//! finished, so slow I/O stretches the period instead of stacking checks.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_interface_poll", with = "humantime_serde")]
    pub interface_poll: Duration,

    #[serde(default = "default_quick_check", with = "humantime_serde")]
    pub quick_check: Duration,

    #[serde(default = "default_comprehensive_check", with = "humantime_serde")]
    pub comprehensive_check: Duration,

    /// Quick check period once the connection has been stable for a while.
    #[serde(default = "default_stable_quick_check", with = "humantime_serde")]
    pub stable_quick_check: Duration,

    #[serde(default = "default_stable_comprehensive_check", with = "humantime_serde")]
    pub stable_comprehensive_check: Duration,

    /// Time without a reachability flip before the stable cadence is used.
    #[serde(default = "default_stable_after", with = "humantime_serde")]
    pub stable_after: Duration,

    /// Quick checks are skipped this soon after a comprehensive check starts.
    #[serde(default = "default_quick_check_skip_window", with = "humantime_serde")]
    pub quick_check_skip_window: Duration,
}

fn default_interface_poll() -> Duration {
    Duration::from_secs(1)
}
fn default_quick_check() -> Duration {
    Duration::from_secs(15)
}
fn default_comprehensive_check() -> Duration {
    Duration::from_secs(30)
}
fn default_stable_quick_check() -> Duration {
    Duration::from_secs(30)
}
fn default_stable_comprehensive_check() -> Duration {
    Duration::from_secs(60)
}
fn default_stable_after() -> Duration {
    Duration::from_secs(300)
}
fn default_quick_check_skip_window() -> Duration {
    Duration::from_secs(2)
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interface_poll: default_interface_poll(),
            quick_check: default_quick_check(),
            comprehensive_check: default_comprehensive_check(),
            stable_quick_check: default_stable_quick_check(),
            stable_comprehensive_check: default_stable_comprehensive_check(),
            stable_after: default_stable_after(),
            quick_check_skip_window: default_quick_check_skip_window(),
        }
    }
}

/// Picks the normal or stable period for each timer.
#[derive(Debug, Clone)]
pub struct Cadence {
    config: ScheduleConfig,
    started: Instant,
}

impl Cadence {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
        }
    }

    /// Stable once `stable_after` has passed since the last flip (or since
    /// start if there never was one).
    pub fn is_stable(&self, last_transition: Option<Instant>, now: Instant) -> bool {
        let since = last_transition.unwrap_or(self.started);
        now.saturating_duration_since(since) >= self.config.stable_after
    }

    pub fn quick_interval(&self, last_transition: Option<Instant>) -> Duration {
        if self.is_stable(last_transition, Instant::now()) {
            self.config.stable_quick_check
        } else {
            self.config.quick_check
        }
    }

    pub fn comprehensive_interval(&self, last_transition: Option<Instant>) -> Duration {
        if self.is_stable(last_transition, Instant::now()) {
            self.config.stable_comprehensive_check
        } else {
            self.config.comprehensive_check
        }
    }

    pub fn interface_interval(&self) -> Duration {
        self.config.interface_poll
    }
}

/// Counts consecutive quick checks that disagree with the current state.
#[derive(Debug, Clone)]
pub struct DisagreementCounter {
    threshold: u32,
    count: u32,
}

impl DisagreementCounter {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            count: 0,
        }
    }

    /// Feed one check. Returns `true` exactly when the run of disagreements
    /// reaches the threshold; the count then starts over.
    pub fn observe(&mut self, agrees: bool) -> bool {
        if agrees {
            self.count = 0;
            return false;
        }

        self.count += 1;
        if self.count >= self.threshold {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[derive(Debug, Default)]
struct GateState {
    running: bool,
    last_start: Option<Instant>,
    epoch: u64,
}

/// Keeps quick checks out of the way of comprehensive checks.
#[derive(Debug)]
pub struct CheckGate {
    skip_window: Duration,
    state: Mutex<GateState>,
}

/// Marks a comprehensive check as running until dropped.
#[derive(Debug)]
pub struct ComprehensiveGuard<'a> {
    gate: &'a CheckGate,
}

impl Drop for ComprehensiveGuard<'_> {
    fn drop(&mut self) {
        self.gate.state.lock().running = false;
    }
}

impl CheckGate {
    pub fn new(skip_window: Duration) -> Self {
        Self {
            skip_window,
            state: Mutex::new(GateState::default()),
        }
    }

    /// Start a comprehensive check. Bumps the epoch so quick checks already
    /// in flight are superseded.
    pub fn begin_comprehensive(&self) -> ComprehensiveGuard<'_> {
        let mut state = self.state.lock();
        state.running = true;
        state.last_start = Some(Instant::now());
        state.epoch += 1;
        ComprehensiveGuard { gate: self }
    }

    /// Start a quick check, returning its epoch, or `None` when it should be
    /// skipped.
    pub fn begin_quick(&self) -> Option<u64> {
        let state = self.state.lock();
        if state.running {
            return None;
        }
        if let Some(start) = state.last_start {
            if start.elapsed() < self.skip_window {
                return None;
            }
        }
        Some(state.epoch)
    }

    /// Whether a quick check started at `epoch` may still report.
    pub fn is_current(&self, epoch: u64) -> bool {
        self.state.lock().epoch == epoch
    }
}

/// Work driven by the [`Scheduler`].
#[async_trait]
pub trait CheckRunner: Send + Sync + 'static {
    async fn poll_interfaces(&self);

    async fn quick_check(&self);

    async fn comprehensive_check(&self);

    /// Time of the last applied reachability flip.
    fn last_transition(&self) -> Option<Instant>;
}

/// Owns the three timer tasks.
pub struct Scheduler {
    config: ScheduleConfig,
    token: CancellationToken,
    wake: Arc<Notify>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(config: ScheduleConfig) -> Self {
        Self {
            config,
            token: CancellationToken::new(),
            wake: Arc::new(Notify::new()),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    /// Spawn the timer tasks. The interface poll and comprehensive check run
    /// once immediately; the quick check waits for its first period.
    pub fn start<R: CheckRunner>(&self, runner: Arc<R>) {
        let cadence = Cadence::new(self.config.clone());
        let mut handles = self.handles.lock();

        handles.push(tokio::spawn(interface_loop(
            Arc::clone(&runner),
            cadence.clone(),
            self.token.clone(),
        )));
        handles.push(tokio::spawn(quick_loop(
            Arc::clone(&runner),
            cadence.clone(),
            self.token.clone(),
        )));
        handles.push(tokio::spawn(comprehensive_loop(
            runner,
            cadence,
            self.token.clone(),
            Arc::clone(&self.wake),
        )));

        debug!("Scheduler started");
    }

    /// Run the comprehensive check now instead of waiting for its timer.
    pub fn wake_comprehensive(&self) {
        self.wake.notify_one();
    }

    /// Stop re-arming timers. Work already in progress runs to completion.
    pub fn stop(&self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
            debug!("Scheduler stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for every timer task to exit.
    pub async fn join(&self) {
        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn interface_loop<R: CheckRunner>(runner: Arc<R>, cadence: Cadence, token: CancellationToken) {
    loop {
        runner.poll_interfaces().await;

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(cadence.interface_interval()) => {}
        }
    }
    trace!("Interface poll loop exited");
}

async fn quick_loop<R: CheckRunner>(runner: Arc<R>, cadence: Cadence, token: CancellationToken) {
    loop {
        let period = cadence.quick_interval(runner.last_transition());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
        }

        runner.quick_check().await;
    }
    trace!("Quick check loop exited");
}

async fn comprehensive_loop<R: CheckRunner>(
    runner: Arc<R>,
    cadence: Cadence,
    token: CancellationToken,
    wake: Arc<Notify>,
) {
    loop {
        runner.comprehensive_check().await;

        let period = cadence.comprehensive_interval(runner.last_transition());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(period) => {}
            _ = wake.notified() => debug!("Comprehensive check woken early"),
        }
    }
    trace!("Comprehensive check loop exited");
}
