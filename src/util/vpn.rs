//! VPN detection from interface naming conventions.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info};

use crate::types::{ChangeKind, InterfaceChange, InterfaceInfo};

/// Name fragments used by tunnel, tap, point-to-point and IPsec drivers.
pub const VPN_NAME_PATTERNS: &[&str] = &["tun", "tap", "ppp", "ipsec", "utun", "wg", "vpn"];

/// Whether an interface name looks like a VPN tunnel.
pub fn is_vpn_interface(name: &str) -> bool {
    let name = name.to_lowercase();
    VPN_NAME_PATTERNS.iter().any(|p| name.contains(p))
}

/// Whether any VPN-like interface currently has a routable IPv4 address.
pub fn vpn_active(interfaces: &[InterfaceInfo]) -> bool {
    interfaces
        .iter()
        .any(|i| is_vpn_interface(&i.name) && i.has_external_ipv4())
}

/// VPN transition signal, distinct from general connectivity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VpnSignal {
    Connected { interface: String },
    Disconnected { interface: String },
}

impl VpnSignal {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Turns significant interface changes into VPN signals.
#[derive(Debug)]
pub struct VpnDetector {
    started: Instant,
    startup_grace: Duration,
}

impl VpnDetector {
    pub fn new(startup_grace: Duration) -> Self {
        Self {
            started: Instant::now(),
            startup_grace,
        }
    }

    /// Inspect a batch of changes. The last matching change wins.
    ///
    /// Disconnects seen during the startup grace window are dropped:
    /// enumeration is unreliable while the OS stack settles.
    pub fn observe(&self, changes: &[InterfaceChange]) -> Option<VpnSignal> {
        let mut signal = None;

        for change in changes
            .iter()
            .filter(|c| c.significant && is_vpn_interface(&c.interface_name))
        {
            match change.kind {
                ChangeKind::Added => {
                    signal = Some(VpnSignal::Connected {
                        interface: change.interface_name.clone(),
                    });
                }
                ChangeKind::Removed => {
                    if self.in_startup_grace() {
                        debug!(
                            "Ignoring VPN disconnect of {} during startup grace",
                            change.interface_name
                        );
                        continue;
                    }
                    signal = Some(VpnSignal::Disconnected {
                        interface: change.interface_name.clone(),
                    });
                }
                // Address churn on a tunnel that stays up
                ChangeKind::Modified => {
                    if change.has_ipv4 {
                        signal = Some(VpnSignal::Connected {
                            interface: change.interface_name.clone(),
                        });
                    } else if !self.in_startup_grace() {
                        signal = Some(VpnSignal::Disconnected {
                            interface: change.interface_name.clone(),
                        });
                    }
                }
            }
        }

        if let Some(ref s) = signal {
            info!("VPN signal: {:?}", s);
        }
        signal
    }

    /// Whether disconnects are still being suppressed.
    pub fn in_startup_grace(&self) -> bool {
        self.started.elapsed() < self.startup_grace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(kind: ChangeKind, name: &str, has_ipv4: bool) -> InterfaceChange {
        InterfaceChange {
            kind,
            interface_name: name.into(),
            has_ipv4,
            has_ipv6: false,
            previous_addresses: None,
            significant: true,
        }
    }

    #[test]
    fn test_vpn_name_patterns() {
        for name in ["tun0", "tap1", "ppp0", "ipsec0", "utun3", "wg0", "NordVPN", "proton-vpn"] {
            assert!(is_vpn_interface(name), "{name} should be VPN-like");
        }
        for name in ["eth0", "wlan0", "en0", "lo", "docker0"] {
            assert!(!is_vpn_interface(name), "{name} should not be VPN-like");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_suppressed_during_grace() {
        let detector = VpnDetector::new(Duration::from_secs(5));

        let removed = [change(ChangeKind::Removed, "utun3", true)];
        assert_eq!(detector.observe(&removed), None);

        // Connects are never suppressed
        let added = [change(ChangeKind::Added, "utun3", true)];
        assert!(detector.observe(&added).unwrap().is_connected());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            detector.observe(&removed),
            Some(VpnSignal::Disconnected {
                interface: "utun3".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_non_vpn_and_insignificant() {
        let detector = VpnDetector::new(Duration::ZERO);

        let mut insignificant = change(ChangeKind::Added, "wg0", false);
        insignificant.significant = false;
        assert_eq!(detector.observe(&[insignificant]), None);
        assert_eq!(detector.observe(&[change(ChangeKind::Removed, "eth0", true)]), None);
    }
}
