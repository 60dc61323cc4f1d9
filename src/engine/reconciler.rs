//! The state reconciler: sole owner of [`NetworkState`].
//!
//! Every proposed change passes through the same pipeline:
//!
//! ```text
//! Proposed ─► startup grace ─► hysteresis ─► flip-flop ─► consensus ─► Applied
//!                 │                │             │            │
//!                 └────────────────┴─────────────┴────────────┴──► Rejected / Pending
//! ```
//!
//! Gates only apply to reachability flips. Interface and VPN fields carried
//! by a blocked proposal are still applied on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::history::ChangeHistory;
use crate::error::{Error, MutationContext, Result};
use crate::types::{NetworkState, StateChange, StateUpdate};

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Offline verdicts are suppressed for this long after start (and until
    /// the first comprehensive check has completed).
    #[serde(default = "default_startup_grace", with = "humantime_serde")]
    pub startup_grace: Duration,

    /// Minimum time between two applied reachability flips.
    #[serde(default = "default_hysteresis", with = "humantime_serde")]
    pub hysteresis: Duration,

    /// Consecutive agreeing checks required before a flip is applied.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: u32,

    /// First backoff step while the mutation lock is held.
    #[serde(default = "default_lock_retry_base", with = "humantime_serde")]
    pub lock_retry_base: Duration,

    /// Backoff ceiling.
    #[serde(default = "default_lock_retry_cap", with = "humantime_serde")]
    pub lock_retry_cap: Duration,

    /// Retries before a proposal is dropped.
    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: u32,
}

fn default_startup_grace() -> Duration {
    Duration::from_secs(10)
}
fn default_hysteresis() -> Duration {
    Duration::from_secs(2)
}
fn default_consensus_threshold() -> u32 {
    2
}
fn default_lock_retry_base() -> Duration {
    Duration::from_millis(25)
}
fn default_lock_retry_cap() -> Duration {
    Duration::from_secs(1)
}
fn default_max_lock_retries() -> u32 {
    8
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            startup_grace: default_startup_grace(),
            hysteresis: default_hysteresis(),
            consensus_threshold: default_consensus_threshold(),
            lock_retry_base: default_lock_retry_base(),
            lock_retry_cap: default_lock_retry_cap(),
            max_lock_retries: default_max_lock_retries(),
        }
    }
}

/// Where a proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckSource {
    Comprehensive,
    Quick,
    Interface,
    Vpn,
    Forced,
}

impl CheckSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::Quick => "quick",
            Self::Interface => "interface",
            Self::Vpn => "vpn",
            Self::Forced => "forced",
        }
    }
}

/// A proposed change to the network state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub update: StateUpdate,
    pub source: CheckSource,
    /// Skip the consensus gate (the caller already counted agreement).
    pub immediate: bool,
}

impl Proposal {
    pub fn new(update: StateUpdate, source: CheckSource) -> Self {
        Self {
            update,
            source,
            immediate: false,
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Why a reachability flip was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    StartupGrace,
    Hysteresis,
    FlipFlop,
    Destroyed,
}

/// Outcome of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A new state version was published.
    Applied { version: u64 },
    /// Nothing material would change.
    Unchanged,
    /// Flip recorded but still short of consensus.
    Pending { votes: u32, required: u32 },
    /// Flip refused by a gate. Non-reachability fields may still have been
    /// applied, in which case the result is `Applied` instead.
    Rejected(RejectReason),
    /// The mutation lock stayed busy through every retry.
    Dropped,
    /// The version check failed; the mutation was discarded.
    Corrupted,
}

impl Decision {
    pub fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

#[derive(Debug)]
pub(crate) struct Pipeline {
    history: ChangeHistory,
    online_votes: u32,
    offline_votes: u32,
    last_flip: Option<Instant>,
    initialized: bool,
}

impl Pipeline {
    fn votes_mut(&mut self, online: bool) -> &mut u32 {
        if online {
            &mut self.online_votes
        } else {
            &mut self.offline_votes
        }
    }

    fn reset_votes(&mut self) {
        self.online_votes = 0;
        self.offline_votes = 0;
    }
}

/// Owner of the authoritative [`NetworkState`].
pub struct StateReconciler {
    config: ReconcilerConfig,
    started: Instant,
    state: RwLock<NetworkState>,
    /// The mutation lock; also guards the gating bookkeeping.
    pub(crate) pipeline: Mutex<Pipeline>,
    event_tx: broadcast::Sender<StateChange>,
    destroyed: AtomicBool,
}

impl StateReconciler {
    /// Create a reconciler holding [`NetworkState::initial`].
    pub fn new(config: ReconcilerConfig) -> Self {
        Self::with_state(config, NetworkState::initial())
    }

    /// Create a reconciler with an explicit starting state.
    pub fn with_state(config: ReconcilerConfig, initial: NetworkState) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            config,
            started: Instant::now(),
            state: RwLock::new(initial),
            pipeline: Mutex::new(Pipeline {
                history: ChangeHistory::new(),
                online_votes: 0,
                offline_votes: 0,
                last_flip: None,
                initialized: false,
            }),
            event_tx,
            destroyed: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> NetworkState {
        self.state.read().clone()
    }

    /// Current version without cloning the state.
    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Subscribe to confirmed transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.event_tx.subscribe()
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Record that the first comprehensive check has completed.
    pub fn mark_initialized(&self) {
        let mut pipeline = self.pipeline.lock();
        if !pipeline.initialized {
            debug!("First comprehensive check complete");
            pipeline.initialized = true;
        }
    }

    /// Whether offline verdicts are still being suppressed.
    pub fn in_startup_grace(&self) -> bool {
        let pipeline = self.pipeline.lock();
        self.startup_grace_active(&pipeline, Instant::now())
    }

    /// Time of the last applied reachability flip.
    pub fn last_transition(&self) -> Option<Instant> {
        self.pipeline.lock().last_flip
    }

    /// Refuse all further proposals.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Submit a proposal, waiting for the mutation lock with bounded
    /// exponential backoff.
    pub async fn submit(&self, proposal: Proposal) -> Decision {
        let mut delay = self.config.lock_retry_base;

        for attempt in 0..=self.config.max_lock_retries {
            if self.is_destroyed() {
                return Decision::Rejected(RejectReason::Destroyed);
            }

            if let Some(mut pipeline) = self.pipeline.try_lock() {
                return self.process(&mut pipeline, &proposal);
            }

            if attempt == self.config.max_lock_retries {
                break;
            }

            let jitter = rand::thread_rng().gen_range(0.9..1.1);
            let wait = delay.mul_f64(jitter).min(self.config.lock_retry_cap);
            debug!(
                "Mutation in flight, {} proposal retry {} in {:?}",
                proposal.source.as_str(),
                attempt + 1,
                wait
            );
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(self.config.lock_retry_cap);
        }

        error!(
            "Dropping {} proposal after {} retries: mutation lock stayed busy",
            proposal.source.as_str(),
            self.config.max_lock_retries
        );
        Decision::Dropped
    }

    fn process(&self, pipeline: &mut Pipeline, proposal: &Proposal) -> Decision {
        let now = Instant::now();
        let current = self.state.read().clone();
        let mut update = proposal.update.clone();
        let mut blocked = None;

        if let Some(verdict) = update.is_online {
            // A check for one direction breaks any streak for the other.
            *pipeline.votes_mut(!verdict) = 0;

            if verdict != current.is_online {
                blocked = self.gate_flip(pipeline, verdict, proposal, now);
            }
            pipeline.history.record(verdict, current.is_online);

            if blocked.is_some() {
                update = update.without_verdict();
            }
        }

        let next = current.merged(&update);
        if next.materially_eq(&current) {
            return blocked.unwrap_or(Decision::Unchanged);
        }

        let flipped = next.is_online != current.is_online;
        let decision = self.apply(current, next, proposal.source);
        if flipped && decision.is_applied() {
            pipeline.last_flip = Some(now);
            pipeline.reset_votes();
        }
        decision
    }

    /// Run a reachability flip through the gates. `None` means it may pass.
    fn gate_flip(
        &self,
        pipeline: &mut Pipeline,
        verdict: bool,
        proposal: &Proposal,
        now: Instant,
    ) -> Option<Decision> {
        let source = proposal.source.as_str();

        if !verdict && self.startup_grace_active(pipeline, now) {
            debug!("Suppressing offline verdict from {} during startup grace", source);
            return Some(Decision::Rejected(RejectReason::StartupGrace));
        }

        if let Some(last) = pipeline.last_flip {
            if now.duration_since(last) < self.config.hysteresis {
                debug!(
                    "Suppressing {} flip from {} within hysteresis window",
                    direction(verdict),
                    source
                );
                return Some(Decision::Rejected(RejectReason::Hysteresis));
            }
        }

        if pipeline.history.is_flip_flopping() {
            info!(
                "Suppressing {} flip from {}: connectivity is flip-flopping",
                direction(verdict),
                source
            );
            return Some(Decision::Rejected(RejectReason::FlipFlop));
        }

        if !proposal.immediate {
            let required = self.config.consensus_threshold.max(1);
            let votes = pipeline.votes_mut(verdict);
            *votes += 1;
            if *votes < required {
                debug!(
                    "{} flip from {} pending consensus ({}/{})",
                    direction(verdict),
                    source,
                    votes,
                    required
                );
                return Some(Decision::Pending {
                    votes: *votes,
                    required,
                });
            }
        }

        None
    }

    fn startup_grace_active(&self, pipeline: &Pipeline, now: Instant) -> bool {
        !pipeline.initialized || now.duration_since(self.started) < self.config.startup_grace
    }

    /// Version, commit and publish. Caller holds the mutation lock.
    fn apply(&self, current: NetworkState, mut next: NetworkState, source: CheckSource) -> Decision {
        let prior = current.version;
        next.version = prior + 1;
        next.last_update = SystemTime::now();

        if let Err(e) = self.commit(prior, &next) {
            let ctx = MutationContext {
                source: source.as_str(),
                expected_version: prior + 1,
                proposed_online: Some(next.is_online),
            };
            error!("Discarding mutation ({}): {}", ctx, e);
            return Decision::Corrupted;
        }

        if next.is_online != current.is_online {
            info!(
                "Network went {} (quality={}, version={}, source={})",
                direction(next.is_online),
                next.quality,
                next.version,
                source.as_str()
            );
        } else {
            debug!("State updated to version {} by {}", next.version, source.as_str());
        }

        let version = next.version;
        let _ = self.event_tx.send(StateChange {
            new_state: next,
            old_state: current,
            version,
        });
        Decision::Applied { version }
    }

    /// Install `next` if the stored version is still `prior` and `next`
    /// carries exactly `prior + 1`.
    pub(crate) fn commit(&self, prior: u64, next: &NetworkState) -> Result<()> {
        let mut state = self.state.write();
        if state.version != prior {
            return Err(Error::StateCorruption {
                expected: prior,
                found: state.version,
            });
        }
        if next.version != prior + 1 {
            warn!("Refusing non-sequential version {} after {}", next.version, prior);
            return Err(Error::StateCorruption {
                expected: prior + 1,
                found: next.version,
            });
        }
        *state = next.clone();
        Ok(())
    }
}

fn direction(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}
