//! Network interface discovery.
//!
//! Platform-specific enumeration behind the [`InterfaceProvider`] trait so
//! the engine can be driven by fakes in tests.

use std::collections::BTreeMap;
use std::net::IpAddr;

use super::guess_interface_type;
use crate::types::{ConnectionType, InterfaceAddress, InterfaceInfo, InterfaceType};

/// Source of interface snapshots.
///
/// Implementations may block; the engine calls them from a blocking task
/// under a timeout.
pub trait InterfaceProvider: Send + Sync {
    /// Current interfaces that are up, sorted by name.
    fn snapshot(&self) -> Vec<InterfaceInfo>;
}

/// Interfaces reported by the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl InterfaceProvider for SystemInterfaces {
    fn snapshot(&self) -> Vec<InterfaceInfo> {
        group_interfaces(get_raw_addresses())
    }
}

/// A single (interface, address) pair as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAddress {
    pub name: String,
    pub address: IpAddr,
    pub is_up: bool,
    pub is_loopback: bool,
}

/// Collapse raw address entries into one [`InterfaceInfo`] per name.
///
/// Interfaces that are down are dropped. Addresses keep OS order with
/// duplicates removed.
pub fn group_interfaces(raw: Vec<RawAddress>) -> Vec<InterfaceInfo> {
    let mut by_name: BTreeMap<String, InterfaceInfo> = BTreeMap::new();

    for entry in raw.into_iter().filter(|r| r.is_up) {
        let info = by_name.entry(entry.name.clone()).or_insert_with(|| InterfaceInfo {
            interface_type: if entry.is_loopback {
                InterfaceType::Loopback
            } else {
                guess_interface_type(&entry.name)
            },
            name: entry.name.clone(),
            addresses: Vec::new(),
        });

        let mut address = InterfaceAddress::new(entry.address);
        address.internal |= entry.is_loopback;
        if !info.addresses.contains(&address) {
            info.addresses.push(address);
        }
    }

    by_name.into_values().collect()
}

/// Pick the interface most likely carrying default traffic.
///
/// Tunnels are skipped so the physical uplink is reported even while a VPN
/// is up. Ties on priority go to the alphabetically first name.
pub fn primary_interface(interfaces: &[InterfaceInfo]) -> Option<&InterfaceInfo> {
    interfaces
        .iter()
        .filter(|i| {
            i.has_external_ipv4()
                && !matches!(i.interface_type, InterfaceType::Tunnel | InterfaceType::Loopback)
        })
        .fold(None, |best: Option<&InterfaceInfo>, candidate| match best {
            Some(b) if b.interface_type.base_priority() >= candidate.interface_type.base_priority() => {
                Some(b)
            }
            _ => Some(candidate),
        })
}

/// Connection type implied by a snapshot.
pub fn connection_type_of(interfaces: &[InterfaceInfo]) -> ConnectionType {
    primary_interface(interfaces).map_or(ConnectionType::None, |i| {
        i.interface_type.connection_type()
    })
}

// ============================================================================
// Unix implementation via getifaddrs
// ============================================================================

#[cfg(unix)]
fn get_raw_addresses() -> Vec<RawAddress> {
    use std::ffi::CStr;

    let mut addresses = Vec::new();

    // SAFETY: getifaddrs hands back a linked list we only read and then free
    // with freeifaddrs; every pointer is null-checked before dereferencing.
    unsafe {
        let mut ifaddrs: *mut libc::ifaddrs = std::ptr::null_mut();
        if libc::getifaddrs(std::ptr::addr_of_mut!(ifaddrs)) != 0 {
            return addresses;
        }

        let mut current = ifaddrs;
        while !current.is_null() {
            let ifa = &*current;

            if !ifa.ifa_name.is_null() && !ifa.ifa_addr.is_null() {
                let name = CStr::from_ptr(ifa.ifa_name).to_string_lossy().into_owned();
                let family = i32::from((*ifa.ifa_addr).sa_family);

                #[allow(clippy::cast_ptr_alignment)]
                let address = match family {
                    libc::AF_INET => {
                        let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in>();
                        Some(IpAddr::V4(std::net::Ipv4Addr::from(u32::from_be(
                            (*sockaddr).sin_addr.s_addr,
                        ))))
                    }
                    libc::AF_INET6 => {
                        let sockaddr = ifa.ifa_addr.cast::<libc::sockaddr_in6>();
                        Some(IpAddr::V6(std::net::Ipv6Addr::from(
                            (*sockaddr).sin6_addr.s6_addr,
                        )))
                    }
                    _ => None,
                };

                if let Some(address) = address {
                    let flags = ifa.ifa_flags as i32;
                    addresses.push(RawAddress {
                        name,
                        address,
                        is_up: (flags & libc::IFF_UP) != 0,
                        is_loopback: (flags & libc::IFF_LOOPBACK) != 0,
                    });
                }
            }

            current = ifa.ifa_next;
        }

        libc::freeifaddrs(ifaddrs);
    }

    addresses
}

#[cfg(not(unix))]
fn get_raw_addresses() -> Vec<RawAddress> {
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(name: &str, addr: &str, is_up: bool) -> RawAddress {
        RawAddress {
            name: name.into(),
            address: addr.parse().unwrap(),
            is_up,
            is_loopback: name == "lo",
        }
    }

    #[test]
    fn test_group_interfaces() {
        let grouped = group_interfaces(vec![
            raw("wlan0", "192.168.1.20", true),
            raw("lo", "127.0.0.1", true),
            raw("wlan0", "fe80::1", true),
            raw("wlan0", "192.168.1.20", true),
            raw("eth1", "10.0.0.2", false),
        ]);

        let names: Vec<_> = grouped.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["lo", "wlan0"]);

        let wlan = &grouped[1];
        assert_eq!(wlan.addresses.len(), 2);
        assert!(wlan.has_external_ipv4());
        assert!(!wlan.has_ipv6());
        assert_eq!(wlan.interface_type, InterfaceType::Wifi);

        let lo = &grouped[0];
        assert!(lo.addresses.iter().all(|a| a.internal));
        assert_eq!(lo.interface_type, InterfaceType::Loopback);
    }

    #[test]
    fn test_primary_interface_prefers_physical() {
        let grouped = group_interfaces(vec![
            raw("utun4", "10.8.0.2", true),
            raw("wlan0", "192.168.1.20", true),
            raw("eth0", "10.0.0.7", true),
            raw("lo", "127.0.0.1", true),
        ]);

        assert_eq!(primary_interface(&grouped).map(|i| i.name.as_str()), Some("eth0"));
        assert_eq!(connection_type_of(&grouped), ConnectionType::Ethernet);
    }

    #[test]
    fn test_no_usable_interface() {
        let grouped = group_interfaces(vec![
            raw("lo", "127.0.0.1", true),
            raw("eth0", "169.254.3.4", true),
        ]);
        assert!(primary_interface(&grouped).is_none());
        assert_eq!(connection_type_of(&grouped), ConnectionType::None);
    }

    #[cfg(unix)]
    #[test]
    fn test_system_snapshot_has_loopback() {
        let interfaces = SystemInterfaces.snapshot();
        assert!(interfaces.iter().any(|i| i.interface_type == InterfaceType::Loopback));
    }
}
