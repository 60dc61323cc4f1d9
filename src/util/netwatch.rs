//! Network interface monitoring for hotplug detection.
//!
//! Keeps the previous snapshot and reports per-interface differences. Only
//! changes that make a routable IPv4 address appear or disappear are marked
//! significant; everything else (IPv6 churn, link-local renumbering) is
//! noise for reachability purposes.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::InterfaceProvider;
use crate::types::{ChangeKind, InterfaceChange, InterfaceInfo};

/// Network watcher that diffs successive interface snapshots.
pub struct InterfaceWatcher {
    provider: Arc<dyn InterfaceProvider>,
    /// Last snapshot, `None` before the first poll.
    last: Mutex<Option<Vec<InterfaceInfo>>>,
}

/// Result of one poll.
#[derive(Debug, Clone)]
pub struct InterfacePoll {
    pub snapshot: Vec<InterfaceInfo>,
    pub changes: Vec<InterfaceChange>,
}

impl InterfacePoll {
    pub fn has_significant_changes(&self) -> bool {
        self.changes.iter().any(|c| c.significant)
    }
}

impl InterfaceWatcher {
    /// Create a new watcher over `provider`.
    pub fn new(provider: Arc<dyn InterfaceProvider>) -> Self {
        Self {
            provider,
            last: Mutex::new(None),
        }
    }

    /// Take a fresh snapshot without touching the baseline.
    pub fn snapshot(&self) -> Vec<InterfaceInfo> {
        self.provider.snapshot()
    }

    /// Last recorded snapshot.
    pub fn last_snapshot(&self) -> Option<Vec<InterfaceInfo>> {
        self.last.lock().clone()
    }

    /// Snapshot and diff against the previous poll.
    ///
    /// The first poll only establishes the baseline and reports no changes.
    pub fn poll(&self) -> InterfacePoll {
        let snapshot = self.provider.snapshot();
        let previous = self.last.lock().replace(snapshot.clone());

        let changes = match previous {
            Some(ref old) => diff_snapshots(old, &snapshot),
            None => {
                debug!("Interface baseline: {} interfaces", snapshot.len());
                Vec::new()
            }
        };

        for change in changes.iter().filter(|c| c.significant) {
            info!(
                "Significant interface change: {} {} (ipv4={}, ipv6={})",
                change.interface_name, change.kind, change.has_ipv4, change.has_ipv6
            );
        }

        InterfacePoll { snapshot, changes }
    }
}

/// Compare two snapshots by interface name.
pub fn diff_snapshots(old: &[InterfaceInfo], new: &[InterfaceInfo]) -> Vec<InterfaceChange> {
    let old_by_name: BTreeMap<&str, &InterfaceInfo> =
        old.iter().map(|i| (i.name.as_str(), i)).collect();
    let new_by_name: BTreeMap<&str, &InterfaceInfo> =
        new.iter().map(|i| (i.name.as_str(), i)).collect();

    let mut changes = Vec::new();

    // Check for removed interfaces
    for (name, old_iface) in &old_by_name {
        if !new_by_name.contains_key(name) {
            changes.push(InterfaceChange {
                kind: ChangeKind::Removed,
                interface_name: (*name).to_string(),
                has_ipv4: old_iface.has_external_ipv4(),
                has_ipv6: old_iface.has_ipv6(),
                previous_addresses: Some(addresses_of(old_iface)),
                significant: old_iface.has_external_ipv4(),
            });
        }
    }

    // Check for added interfaces and address changes
    for (name, new_iface) in &new_by_name {
        match old_by_name.get(name) {
            None => changes.push(InterfaceChange {
                kind: ChangeKind::Added,
                interface_name: (*name).to_string(),
                has_ipv4: new_iface.has_external_ipv4(),
                has_ipv6: new_iface.has_ipv6(),
                previous_addresses: None,
                significant: new_iface.has_external_ipv4(),
            }),
            Some(old_iface) if old_iface.addresses != new_iface.addresses => {
                let old_v4: HashSet<IpAddr> = old_iface.external_ipv4().collect();
                let new_v4: HashSet<IpAddr> = new_iface.external_ipv4().collect();

                changes.push(InterfaceChange {
                    kind: ChangeKind::Modified,
                    interface_name: (*name).to_string(),
                    has_ipv4: new_iface.has_external_ipv4(),
                    has_ipv6: new_iface.has_ipv6(),
                    previous_addresses: Some(addresses_of(old_iface)),
                    significant: old_v4 != new_v4,
                });
            }
            Some(_) => {}
        }
    }

    changes
}

fn addresses_of(iface: &InterfaceInfo) -> Vec<IpAddr> {
    iface.addresses.iter().map(|a| a.address).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InterfaceAddress, InterfaceType};

    fn iface(name: &str, addrs: &[&str]) -> InterfaceInfo {
        InterfaceInfo {
            name: name.into(),
            addresses: addrs
                .iter()
                .map(|a| InterfaceAddress::new(a.parse().unwrap()))
                .collect(),
            interface_type: InterfaceType::Unknown,
        }
    }

    struct Scripted(Mutex<Vec<Vec<InterfaceInfo>>>);

    impl InterfaceProvider for Scripted {
        fn snapshot(&self) -> Vec<InterfaceInfo> {
            let mut script = self.0.lock();
            if script.len() > 1 {
                script.remove(0)
            } else {
                script[0].clone()
            }
        }
    }

    #[test]
    fn test_added_and_removed() {
        let old = vec![iface("eth0", &["10.0.0.2"]), iface("tun0", &["10.8.0.2"])];
        let new = vec![iface("eth0", &["10.0.0.2"]), iface("wlan0", &["fe80::1"])];

        let changes = diff_snapshots(&old, &new);
        assert_eq!(changes.len(), 2);

        let removed = changes.iter().find(|c| c.kind == ChangeKind::Removed).unwrap();
        assert_eq!(removed.interface_name, "tun0");
        assert!(removed.significant);
        assert_eq!(removed.previous_addresses, Some(vec!["10.8.0.2".parse().unwrap()]));

        let added = changes.iter().find(|c| c.kind == ChangeKind::Added).unwrap();
        assert_eq!(added.interface_name, "wlan0");
        assert!(!added.significant, "link-local only interface is not significant");
    }

    #[test]
    fn test_modified_significance() {
        let old = vec![iface("eth0", &["10.0.0.2"])];

        // IPv6 address added: modified, not significant
        let new = vec![iface("eth0", &["10.0.0.2", "2001:db8::2"])];
        let changes = diff_snapshots(&old, &new);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Modified);
        assert!(!changes[0].significant);
        assert!(changes[0].has_ipv6);

        // IPv4 lost: significant
        let new = vec![iface("eth0", &["169.254.1.1"])];
        let changes = diff_snapshots(&old, &new);
        assert!(changes[0].significant);
        assert!(!changes[0].has_ipv4);
    }

    #[test]
    fn test_unchanged_snapshot() {
        let snap = vec![iface("eth0", &["10.0.0.2"])];
        assert!(diff_snapshots(&snap, &snap).is_empty());
    }

    #[test]
    fn test_watcher_baseline_then_diff() {
        let provider = Arc::new(Scripted(Mutex::new(vec![
            vec![iface("eth0", &["10.0.0.2"])],
            vec![iface("eth0", &["10.0.0.2"]), iface("utun3", &["10.8.0.2"])],
        ])));
        let watcher = InterfaceWatcher::new(provider);

        let first = watcher.poll();
        assert!(first.changes.is_empty());

        let second = watcher.poll();
        assert!(second.has_significant_changes());
        assert_eq!(second.changes[0].interface_name, "utun3");
        assert_eq!(watcher.last_snapshot().unwrap().len(), 2);
    }
}
