//! Utility functions and helpers.
//!
//! Interface enumeration, snapshot diffing, VPN heuristics and the
//! subprocess helper used by the DNS lookup strategy.

use crate::types::InterfaceType;

// Re-export submodules
mod command;
mod interface;
mod netwatch;
mod vpn;

pub use command::*;
pub use interface::*;
pub use netwatch::*;
pub use vpn::*;

/// Guess interface type from name.
pub fn guess_interface_type(name: &str) -> InterfaceType {
    let name = name.to_lowercase();

    if name.starts_with("lo") {
        InterfaceType::Loopback
    } else if name.starts_with("eth") || name.starts_with("enp") || name.starts_with("eno") {
        InterfaceType::Ethernet
    } else if name.starts_with("en") {
        // macOS: en0 is usually WiFi on laptops, Ethernet on desktops
        InterfaceType::Wifi
    } else if name.starts_with("wlan")
        || name.starts_with("wl")
        || name.starts_with("wi-fi")
        || name.starts_with("wifi")
    {
        InterfaceType::Wifi
    } else if name.starts_with("cell")
        || name.starts_with("pdp")
        || name.starts_with("rmnet")
        || name.starts_with("wwan")
    {
        InterfaceType::Cellular
    } else if name.starts_with("usb") || name.starts_with("rndis") {
        InterfaceType::Tethering
    } else if is_vpn_interface(&name) {
        InterfaceType::Tunnel
    } else if name.starts_with("bridge")
        || name.starts_with("br")
        || name.starts_with("bond")
        || name.starts_with("team")
    {
        InterfaceType::Ethernet
    } else {
        InterfaceType::Unknown
    }
}

/// Format duration as human-readable.
pub fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();
    let ms = duration.subsec_millis();

    if secs >= 3600 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{secs}.{ms:03}s")
    } else {
        format!("{ms}ms")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_guess_interface_type() {
        assert_eq!(guess_interface_type("lo"), InterfaceType::Loopback);
        assert_eq!(guess_interface_type("eth0"), InterfaceType::Ethernet);
        assert_eq!(guess_interface_type("enp0s3"), InterfaceType::Ethernet);
        assert_eq!(guess_interface_type("wlan0"), InterfaceType::Wifi);
        assert_eq!(guess_interface_type("wlp2s0"), InterfaceType::Wifi);
        assert_eq!(guess_interface_type("Wi-Fi"), InterfaceType::Wifi);
        assert_eq!(guess_interface_type("tun0"), InterfaceType::Tunnel);
        assert_eq!(guess_interface_type("utun3"), InterfaceType::Tunnel);
        assert_eq!(guess_interface_type("wg0"), InterfaceType::Tunnel);
        assert_eq!(guess_interface_type("ppp0"), InterfaceType::Tunnel);
        assert_eq!(guess_interface_type("rmnet_data0"), InterfaceType::Cellular);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.500s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(7260)), "2h 1m");
    }
}
