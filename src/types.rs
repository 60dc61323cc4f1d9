//! Core types used throughout netsentry.

use std::fmt;
use std::net::IpAddr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Network interface type classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    /// Wired Ethernet connection
    Ethernet,
    /// WiFi connection
    Wifi,
    /// Cellular data (4G/5G/LTE)
    Cellular,
    /// USB tethering
    Tethering,
    /// VPN or tunnel interface
    Tunnel,
    /// Loopback interface
    Loopback,
    /// Unknown interface type
    #[default]
    Unknown,
}

impl InterfaceType {
    /// Base priority score (higher = preferred as primary interface).
    pub fn base_priority(self) -> u32 {
        match self {
            Self::Ethernet => 100,
            Self::Wifi => 80,
            Self::Cellular => 60,
            Self::Tethering => 50,
            Self::Tunnel => 40,
            Self::Loopback => 10,
            Self::Unknown => 30,
        }
    }

    /// Coarse connection type reported in [`NetworkState`].
    pub fn connection_type(self) -> ConnectionType {
        match self {
            Self::Ethernet => ConnectionType::Ethernet,
            Self::Wifi => ConnectionType::Wifi,
            Self::Loopback => ConnectionType::Loopback,
            Self::Cellular | Self::Tethering | Self::Tunnel => ConnectionType::Other,
            Self::Unknown => ConnectionType::Unknown,
        }
    }
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Cellular => write!(f, "cellular"),
            Self::Tethering => write!(f, "tethering"),
            Self::Tunnel => write!(f, "tunnel"),
            Self::Loopback => write!(f, "loopback"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Connection type of the primary interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Ethernet,
    Wifi,
    Loopback,
    Other,
    /// No usable interface.
    None,
    /// Not yet enumerated.
    #[default]
    Unknown,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ethernet => write!(f, "ethernet"),
            Self::Wifi => write!(f, "wifi"),
            Self::Loopback => write!(f, "loopback"),
            Self::Other => write!(f, "other"),
            Self::None => write!(f, "none"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Discrete connection quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Offline,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Excellent => write!(f, "excellent"),
            Self::Good => write!(f, "good"),
            Self::Fair => write!(f, "fair"),
            Self::Poor => write!(f, "poor"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

/// A single address bound to an interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InterfaceAddress {
    pub address: IpAddr,
    /// Loopback or link-local; never evidence of connectivity.
    pub internal: bool,
}

impl InterfaceAddress {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            internal: is_internal_address(address),
        }
    }

    /// Routable IPv4 address.
    pub fn is_external_v4(&self) -> bool {
        self.address.is_ipv4() && !self.internal
    }
}

/// Whether an address can never carry internet traffic.
pub fn is_internal_address(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

/// Interface snapshot entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    pub name: String,
    pub addresses: Vec<InterfaceAddress>,
    #[serde(rename = "type")]
    pub interface_type: InterfaceType,
}

impl InterfaceInfo {
    pub fn has_external_ipv4(&self) -> bool {
        self.addresses.iter().any(InterfaceAddress::is_external_v4)
    }

    pub fn has_ipv6(&self) -> bool {
        self.addresses.iter().any(|a| a.address.is_ipv6() && !a.internal)
    }

    /// Routable IPv4 addresses, in snapshot order.
    pub fn external_ipv4(&self) -> impl Iterator<Item = IpAddr> + '_ {
        self.addresses
            .iter()
            .filter(|a| a.is_external_v4())
            .map(|a| a.address)
    }
}

/// Low-level signal diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub dns_resolvable: bool,
    pub internet_reachable: bool,
    /// Detection is stubbed; always `false` for now.
    pub captive_portal: bool,
    pub latency_ms: Option<u64>,
}

/// Partial diagnostics update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsUpdate {
    pub dns_resolvable: Option<bool>,
    pub internet_reachable: Option<bool>,
    pub captive_portal: Option<bool>,
    pub latency_ms: Option<Option<u64>>,
}

impl DiagnosticsUpdate {
    fn merge_into(&self, target: &mut Diagnostics) {
        if let Some(v) = self.dns_resolvable {
            target.dns_resolvable = v;
        }
        if let Some(v) = self.internet_reachable {
            target.internet_reachable = v;
        }
        if let Some(v) = self.captive_portal {
            target.captive_portal = v;
        }
        if let Some(v) = self.latency_ms {
            target.latency_ms = v;
        }
    }
}

/// The authoritative connectivity state.
///
/// Only the reconciler produces new values; everyone else gets clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    pub is_online: bool,
    pub quality: Quality,
    pub vpn_active: bool,
    pub interfaces: Vec<InterfaceInfo>,
    pub primary_interface: Option<String>,
    pub connection_type: ConnectionType,
    pub diagnostics: Diagnostics,
    pub version: u64,
    pub last_update: SystemTime,
}

impl NetworkState {
    /// Optimistic startup state: online until the first comprehensive check
    /// (and the startup grace period) say otherwise.
    pub fn initial() -> Self {
        Self {
            is_online: true,
            quality: Quality::Good,
            vpn_active: false,
            interfaces: Vec::new(),
            primary_interface: None,
            connection_type: ConnectionType::Unknown,
            diagnostics: Diagnostics::default(),
            version: 0,
            last_update: SystemTime::now(),
        }
    }

    /// Clone with `update` deep-merged in. The version is left untouched.
    pub fn merged(&self, update: &StateUpdate) -> Self {
        let mut next = self.clone();
        if let Some(v) = update.is_online {
            next.is_online = v;
        }
        if let Some(v) = update.quality {
            next.quality = v;
        }
        if let Some(v) = update.vpn_active {
            next.vpn_active = v;
        }
        if let Some(ref v) = update.interfaces {
            next.interfaces.clone_from(v);
        }
        if let Some(ref v) = update.primary_interface {
            next.primary_interface.clone_from(v);
        }
        if let Some(v) = update.connection_type {
            next.connection_type = v;
        }
        if let Some(ref d) = update.diagnostics {
            d.merge_into(&mut next.diagnostics);
        }
        next
    }

    /// Equality ignoring version, timestamp and latency drift.
    pub fn materially_eq(&self, other: &Self) -> bool {
        self.is_online == other.is_online
            && self.quality == other.quality
            && self.vpn_active == other.vpn_active
            && self.interfaces == other.interfaces
            && self.primary_interface == other.primary_interface
            && self.connection_type == other.connection_type
            && self.diagnostics.dns_resolvable == other.diagnostics.dns_resolvable
            && self.diagnostics.internet_reachable == other.diagnostics.internet_reachable
            && self.diagnostics.captive_portal == other.diagnostics.captive_portal
    }
}

impl Default for NetworkState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Proposed partial change to [`NetworkState`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    pub is_online: Option<bool>,
    pub quality: Option<Quality>,
    pub vpn_active: Option<bool>,
    pub interfaces: Option<Vec<InterfaceInfo>>,
    pub primary_interface: Option<Option<String>>,
    pub connection_type: Option<ConnectionType>,
    pub diagnostics: Option<DiagnosticsUpdate>,
}

impl StateUpdate {
    /// Update carrying only a reachability verdict and quality tier.
    pub fn verdict(is_online: bool, quality: Quality) -> Self {
        Self {
            is_online: Some(is_online),
            quality: Some(quality),
            ..Default::default()
        }
    }

    pub fn vpn(active: bool) -> Self {
        Self {
            vpn_active: Some(active),
            ..Default::default()
        }
    }

    /// Remove the reachability-linked fields, keeping interface/VPN data.
    pub fn without_verdict(mut self) -> Self {
        self.is_online = None;
        self.quality = None;
        self.diagnostics = None;
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Event published on every confirmed transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub new_state: NetworkState,
    pub old_state: NetworkState,
    pub version: u64,
}

/// Kind of a history record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Same verdict as the previous observation.
    Stable,
    /// Verdict differs from the previous observation.
    Change,
}

/// One reachability observation kept for flip-flop analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChangeRecord {
    pub was_online: bool,
    pub is_online: bool,
    pub timestamp: SystemTime,
    pub kind: RecordKind,
}

/// Classified probe failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorCode {
    Timeout,
    Refused,
    /// Ambiguous: typically VPN routing restrictions.
    AddressNotAvailable,
    DnsFailure,
    Unreachable,
    Other,
}

impl fmt::Display for ProbeErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::Refused => write!(f, "refused"),
            Self::AddressNotAvailable => write!(f, "address_not_available"),
            Self::DnsFailure => write!(f, "dns_failure"),
            Self::Unreachable => write!(f, "unreachable"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Outcome of a single endpoint probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointProbeResult {
    pub endpoint_id: String,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub error_code: Option<ProbeErrorCode>,
}

impl EndpointProbeResult {
    pub fn ok(endpoint_id: impl Into<String>, latency_ms: u64) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            success: true,
            latency_ms: Some(latency_ms),
            error_code: None,
        }
    }

    pub fn failed(endpoint_id: impl Into<String>, code: ProbeErrorCode) -> Self {
        Self {
            endpoint_id: endpoint_id.into(),
            success: false,
            latency_ms: None,
            error_code: Some(code),
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        self.error_code == Some(ProbeErrorCode::AddressNotAvailable)
    }
}

/// Outcome of resolving one test hostname.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsProbeResult {
    pub host: String,
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub resolved_addresses: Option<Vec<IpAddr>>,
    pub error: Option<String>,
}

/// Kind of an interface change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added => write!(f, "added"),
            Self::Removed => write!(f, "removed"),
            Self::Modified => write!(f, "modified"),
        }
    }
}

/// Difference between two interface snapshots for one interface name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceChange {
    pub kind: ChangeKind,
    pub interface_name: String,
    /// Routable IPv4 present (after the change; before it for removals).
    pub has_ipv4: bool,
    pub has_ipv6: bool,
    pub previous_addresses: Option<Vec<IpAddr>>,
    /// A routable IPv4 address appeared or disappeared.
    pub significant: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn iface(name: &str, addr: [u8; 4]) -> InterfaceInfo {
        InterfaceInfo {
            name: name.into(),
            addresses: vec![InterfaceAddress::new(IpAddr::V4(Ipv4Addr::from(addr)))],
            interface_type: InterfaceType::Ethernet,
        }
    }

    #[test]
    fn test_internal_addresses() {
        assert!(is_internal_address("127.0.0.1".parse().unwrap()));
        assert!(is_internal_address("169.254.10.2".parse().unwrap()));
        assert!(is_internal_address("fe80::1".parse().unwrap()));
        assert!(!is_internal_address("192.168.1.20".parse().unwrap()));
        assert!(!is_internal_address("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn test_merge_deep_merges_diagnostics() {
        let mut state = NetworkState::initial();
        state.diagnostics.dns_resolvable = true;
        state.diagnostics.latency_ms = Some(40);

        let update = StateUpdate {
            diagnostics: Some(DiagnosticsUpdate {
                internet_reachable: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = state.merged(&update);

        assert!(merged.diagnostics.dns_resolvable);
        assert!(merged.diagnostics.internet_reachable);
        assert_eq!(merged.diagnostics.latency_ms, Some(40));
        assert_eq!(merged.version, state.version);
    }

    #[test]
    fn test_latency_drift_is_not_material() {
        let state = NetworkState::initial();
        let update = StateUpdate {
            diagnostics: Some(DiagnosticsUpdate {
                latency_ms: Some(Some(250)),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(state.materially_eq(&state.merged(&update)));

        let update = StateUpdate {
            interfaces: Some(vec![iface("eth0", [10, 0, 0, 5])]),
            ..Default::default()
        };
        assert!(!state.materially_eq(&state.merged(&update)));
    }

    #[test]
    fn test_without_verdict() {
        let mut update = StateUpdate::verdict(false, Quality::Offline);
        update.vpn_active = Some(true);
        let stripped = update.without_verdict();
        assert_eq!(stripped.is_online, None);
        assert_eq!(stripped.quality, None);
        assert_eq!(stripped.vpn_active, Some(true));
        assert!(StateUpdate::default().without_verdict().is_empty());
    }

    #[test]
    fn test_quality_ordering() {
        assert!(Quality::Excellent > Quality::Good);
        assert!(Quality::Poor > Quality::Offline);
        assert_eq!(Quality::Fair.to_string(), "fair");
    }
}
