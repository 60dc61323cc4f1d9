//! Reachability signals: endpoint probes and DNS resolution.

mod dns;
mod endpoint;

pub use dns::*;
pub use endpoint::*;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Probe configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Hostnames resolved on every comprehensive check.
    #[serde(default = "default_dns_hosts")]
    pub dns_hosts: Vec<String>,

    /// Hard limit for one DNS resolution across all strategies.
    #[serde(default = "default_dns_timeout", with = "humantime_serde")]
    pub dns_timeout: Duration,

    /// Slack added to endpoint timeouts before a probe is abandoned.
    #[serde(default = "default_probe_grace", with = "humantime_serde")]
    pub probe_grace: Duration,

    /// Limit for one interface enumeration.
    #[serde(default = "default_interface_timeout", with = "humantime_serde")]
    pub interface_timeout: Duration,

    /// Weighted targets for comprehensive checks. The heaviest one is also
    /// used by the quick check.
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<EndpointTarget>,

    /// Raw-IP targets probed when results are ambiguous
    /// (address not available).
    #[serde(default = "default_fallback_endpoints")]
    pub fallback_endpoints: Vec<EndpointTarget>,
}

fn default_endpoints() -> Vec<EndpointTarget> {
    vec![
        EndpointTarget::tcp("cloudflare", "1.1.1.1", 443, 1.0),
        EndpointTarget::tcp("google-dns", "8.8.8.8", 443, 0.8),
        EndpointTarget::tcp("google", "www.google.com", 443, 0.8),
        EndpointTarget::http("gstatic", "connectivitycheck.gstatic.com", 80, "/generate_204", 0.6),
    ]
}
fn default_fallback_endpoints() -> Vec<EndpointTarget> {
    vec![
        EndpointTarget::tcp("quad9", "9.9.9.9", 53, 1.0),
        EndpointTarget::tcp("opendns", "208.67.222.222", 53, 1.0),
    ]
}
fn default_dns_hosts() -> Vec<String> {
    vec![
        "www.google.com".to_string(),
        "one.one.one.one".to_string(),
        "www.apple.com".to_string(),
    ]
}
fn default_dns_timeout() -> Duration {
    Duration::from_secs(4)
}
fn default_probe_grace() -> Duration {
    Duration::from_millis(500)
}
fn default_interface_timeout() -> Duration {
    Duration::from_secs(2)
}

impl ProbeConfig {
    /// Target used by quick checks.
    pub fn quick_target(&self) -> Option<&EndpointTarget> {
        self.endpoints
            .iter()
            .fold(None, |best: Option<&EndpointTarget>, t| match best {
                Some(b) if b.weight >= t.weight => Some(b),
                _ => Some(t),
            })
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            endpoints: default_endpoints(),
            fallback_endpoints: default_fallback_endpoints(),
            dns_hosts: default_dns_hosts(),
            dns_timeout: default_dns_timeout(),
            probe_grace: default_probe_grace(),
            interface_timeout: default_interface_timeout(),
        }
    }
}
