//! Configuration file tests.

use std::time::Duration;

use netsentry::config::Config;
use netsentry::error::Error;
use netsentry::probe::EndpointTarget;

#[test]
fn test_save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::example();
    config.monitor.reconciler.consensus_threshold = 3;
    config.monitor.schedule.quick_check = Duration::from_secs(20);
    config.monitor.probe.endpoints.push(EndpointTarget::http(
        "captive",
        "captive.apple.com",
        80,
        "/hotspot-detect.html",
        0.5,
    ));
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert_eq!(
        loaded.monitor.probe.endpoints.last().and_then(|t| t.http_path.as_deref()),
        Some("/hotspot-detect.html")
    );
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
    assert_eq!(config, Config::default());

    assert!(matches!(
        Config::load(dir.path().join("absent.toml")),
        Err(Error::Config(_))
    ));
}

#[test]
fn test_invalid_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    std::fs::write(&path, "[monitor.reconciler]\nconsensus_threshold = 0\n").unwrap();
    assert!(matches!(Config::load(&path), Err(Error::InvalidConfig(_))));

    std::fs::write(&path, "[monitor.probe]\ndns_timeout = \"forever\"\n").unwrap();
    assert!(matches!(Config::load(&path), Err(Error::Config(_))));
}

#[test]
fn test_endpoint_defaults_apply_per_entry() {
    let config: Config = toml::from_str(
        r#"
        [[monitor.probe.endpoints]]
        id = "local"
        host = "192.168.1.1"
        port = 80
        "#,
    )
    .unwrap();

    let target = &config.monitor.probe.endpoints[0];
    assert_eq!(target.timeout, Duration::from_secs(3));
    assert!((target.weight - 1.0).abs() < f64::EPSILON);
    assert!(target.http_path.is_none());
    assert_eq!(config.monitor.probe.fallback_endpoints.len(), 2);
    config.validate().unwrap();
}
