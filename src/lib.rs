//! # netsentry
//!
//! Network reachability and stability engine.
//!
//! netsentry decides whether the host has usable internet connectivity, how
//! good that connectivity is and whether a VPN tunnel is up, and publishes
//! the answer as a single debounced, versioned [`NetworkState`]. Consumers
//! never need their own debouncing: transitions are only emitted once they
//! have survived startup grace, hysteresis, flip-flop suppression and
//! consensus.
//!
//! ## Architecture
//!
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Consumers (UI, refresh schedulers)              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │          NetworkMonitor: state() / force_check() / subscribe()  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │   StateReconciler: grace → hysteresis → flip-flop → consensus   │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Quality Classifier            VPN Heuristic Detector     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────────┐   ┌─────────────────────┐  │
//! │  │ Interfaces │   │ DNS multiplexer│   │  Endpoint prober    │  │
//! │  │ (1s poll)  │   │ native/nslookup│   │  (TCP / HTTP HEAD)  │  │
//! │  └────────────┘   └────────────────┘   └─────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │     Adaptive Scheduler (interface / quick / comprehensive)      │
//! └─────────────────────────────────────────────────────────────────┘
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use netsentry::prelude::*;
//!
//! # async fn run() -> netsentry::Result<()> {
//! let monitor = Arc::new(NetworkMonitor::new(MonitorConfig::default()));
//! monitor.start()?;
//!
//! let mut changes = monitor.subscribe();
//! while let Ok(change) = changes.recv().await {
//!     println!("online={} quality={}", change.new_state.is_online, change.new_state.quality);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow stylistic lints that don't affect correctness
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_const_for_fn)]      // Many functions can't be const due to trait bounds
#![allow(clippy::doc_markdown)]              // ASCII diagrams in docs
#![allow(clippy::cast_possible_truncation)]  // Millisecond latencies fit in u64
#![allow(clippy::cast_sign_loss)]            // Latencies are always positive
#![allow(clippy::cast_precision_loss)]       // Acceptable for averages
#![allow(clippy::significant_drop_tightening)] // Lock scope is intentional
#![allow(clippy::option_if_let_else)]        // More readable in context
#![allow(clippy::use_self)]                  // Explicit type names in matches
#![allow(clippy::redundant_pub_crate)]       // Explicit visibility
#![allow(clippy::cognitive_complexity)]      // Gating pipeline
#![allow(clippy::too_many_lines)]            // Complete implementations
#![allow(clippy::future_not_send)]           // Async internals
#![allow(clippy::match_same_arms)]           // Explicit arm per variant is clearer
#![allow(clippy::return_self_not_must_use)]  // Builder methods don't need must_use
#![allow(clippy::ignored_unit_patterns)]     // Ok(_) vs Ok(()) is stylistic

pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod probe;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;

pub use config::Config;
pub use engine::NetworkMonitor;
pub use error::{Error, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{
        CheckSource, Decision, MonitorConfig, NetworkMonitor, Proposal, StateReconciler,
    };
    pub use crate::error::{Error, Result};
    pub use crate::metrics::QualityReport;
    pub use crate::probe::{DnsMultiplexer, DnsStrategy, EndpointProbe, EndpointTarget};
    pub use crate::types::*;
    pub use crate::util::InterfaceProvider;
}
