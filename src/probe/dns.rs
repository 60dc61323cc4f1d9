//! DNS resolution through a chain of platform strategies.
//!
//! The native resolver is the baseline. `nslookup` is kept as a fallback
//! because it talks to the configured servers directly and keeps working
//! when the system resolver is wedged by corporate DNS or VPN redirection.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

use crate::error::DnsError;
use crate::types::DnsProbeResult;
use crate::util::{run_hidden, DEFAULT_MAX_OUTPUT};

/// One way of turning a hostname into IPv4 addresses.
#[async_trait]
pub trait DnsStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Resolve `host` to at least one IPv4 address.
    async fn resolve(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError>;
}

/// System resolver via `getaddrinfo` (tokio's blocking pool).
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeResolver;

#[async_trait]
impl DnsStrategy for NativeResolver {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn resolve(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let addrs = tokio::net::lookup_host((host, 0))
            .await
            .map_err(|e| DnsError::Resolve(format!("{host}: {e}")))?;

        let mut v4: Vec<Ipv4Addr> = Vec::new();
        for addr in addrs {
            if let IpAddr::V4(ip) = addr.ip() {
                if !v4.contains(&ip) {
                    v4.push(ip);
                }
            }
        }

        if v4.is_empty() {
            Err(DnsError::NoAddresses(host.to_string()))
        } else {
            Ok(v4)
        }
    }
}

/// OS lookup command (`nslookup`), run hidden with a timeout.
#[derive(Debug, Clone)]
pub struct LookupCommand {
    program: String,
    timeout: Duration,
}

impl LookupCommand {
    pub fn new(timeout: Duration) -> Self {
        Self {
            program: "nslookup".to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl DnsStrategy for LookupCommand {
    fn name(&self) -> &'static str {
        "lookup-command"
    }

    async fn resolve(&self, host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
        let output = run_hidden(&self.program, &[host], self.timeout, DEFAULT_MAX_OUTPUT).await?;
        let addrs = parse_lookup_output(&output);
        if addrs.is_empty() {
            Err(DnsError::NoAddresses(host.to_string()))
        } else {
            Ok(addrs)
        }
    }
}

/// Parse `nslookup` text output into the answer-section IPv4 addresses.
///
/// Handles both the `Address: x` form (one line per record) and the
/// `Addresses:` form followed by indented continuation lines. Lines before
/// the answer section describe the resolver itself and are skipped, as is
/// any line carrying a `#port` suffix.
pub fn parse_lookup_output(output: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    let mut in_answer = false;
    let mut in_list = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            in_list = false;
            continue;
        }

        let lower = trimmed.to_ascii_lowercase();
        if lower.contains("answer") || lower.starts_with("name:") {
            in_answer = true;
            in_list = false;
            continue;
        }

        // Resolver lines such as "Address: 8.8.8.8#53"
        if trimmed.contains('#') {
            in_list = false;
            continue;
        }

        let value = if let Some(rest) = strip_label(trimmed, "addresses:") {
            in_list = true;
            rest
        } else if let Some(rest) = strip_label(trimmed, "address:") {
            in_list = false;
            rest
        } else if in_list && line.starts_with(char::is_whitespace) {
            trimmed
        } else {
            in_list = false;
            continue;
        };

        if !in_answer {
            continue;
        }

        if let Ok(ip) = value.trim().parse::<Ipv4Addr>() {
            if !addrs.contains(&ip) {
                addrs.push(ip);
            }
        }
    }

    addrs
}

fn strip_label<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    let head = line.get(..label.len())?;
    if head.eq_ignore_ascii_case(label) {
        line.get(label.len()..)
    } else {
        None
    }
}

/// Ordered chain of DNS strategies with a hard per-call timeout.
#[derive(Clone)]
pub struct DnsMultiplexer {
    strategies: Vec<Arc<dyn DnsStrategy>>,
    timeout: Duration,
}

impl DnsMultiplexer {
    /// Build from an explicit strategy list.
    pub fn with_strategies(strategies: Vec<Arc<dyn DnsStrategy>>, timeout: Duration) -> Self {
        Self { strategies, timeout }
    }

    /// The strategy chain for the operating system we are running on.
    pub fn for_current_platform(timeout: Duration) -> Self {
        let native: Arc<dyn DnsStrategy> = Arc::new(NativeResolver);
        let command: Arc<dyn DnsStrategy> = Arc::new(LookupCommand::new(timeout));

        // The Windows stub resolver is the flaky one under VPN redirection.
        let strategies = if cfg!(windows) {
            vec![command, native]
        } else {
            vec![native, command]
        };
        Self::with_strategies(strategies, timeout)
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Resolve `host`, returning the addresses and the strategy that answered.
    ///
    /// Each strategy gets an even share of what is left of the hard timeout,
    /// so a hung resolver still leaves time for the next one.
    pub async fn resolve(&self, host: &str) -> Result<(Vec<Ipv4Addr>, &'static str), DnsError> {
        let deadline = tokio::time::Instant::now() + self.timeout;
        let mut timed_out = false;

        for (i, strategy) in self.strategies.iter().enumerate() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let slice = remaining / (self.strategies.len() - i) as u32;

            match tokio::time::timeout(slice, strategy.resolve(host)).await {
                Ok(Ok(addrs)) if !addrs.is_empty() => return Ok((addrs, strategy.name())),
                Ok(Ok(_)) => debug!("DNS {} returned nothing for {}", strategy.name(), host),
                Ok(Err(e)) => debug!("DNS {} failed for {}: {}", strategy.name(), host, e),
                Err(_) => {
                    debug!("DNS {} timed out after {:?} for {}", strategy.name(), slice, host);
                    timed_out = true;
                }
            }
        }

        if timed_out {
            Err(DnsError::Timeout(self.timeout.as_millis() as u64))
        } else {
            Err(DnsError::StrategyExhausted {
                host: host.to_string(),
            })
        }
    }

    /// Resolve `host` into a probe result. Never fails.
    pub async fn probe(&self, host: &str) -> DnsProbeResult {
        let start = Instant::now();
        match self.resolve(host).await {
            Ok((addrs, _)) => DnsProbeResult {
                host: host.to_string(),
                success: true,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                resolved_addresses: Some(addrs.into_iter().map(IpAddr::V4).collect()),
                error: None,
            },
            Err(e) => DnsProbeResult {
                host: host.to_string(),
                success: false,
                latency_ms: None,
                resolved_addresses: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Probe all hosts concurrently.
    pub async fn probe_all(&self, hosts: &[String]) -> Vec<DnsProbeResult> {
        futures::future::join_all(hosts.iter().map(|h| self.probe(h))).await
    }
}

impl std::fmt::Debug for DnsMultiplexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsMultiplexer")
            .field("strategies", &self.strategy_names())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const UNIX_OUTPUT: &str = "Server:\t\t8.8.8.8
Address:\t8.8.8.8#53

Non-authoritative answer:
Name:\texample.com
Address: 93.184.216.34
Name:\texample.com
Address: 2606:2800:220:1:248:1893:25c8:1946
";

    const WINDOWS_OUTPUT: &str = "Server:  dns.google
Address:  8.8.8.8

Non-authoritative answer:
Name:    example.com
Addresses:  2606:2800:220:1:248:1893:25c8:1946
          93.184.216.34
          93.184.216.35
Aliases:  www.example.com
";

    struct Fixed {
        name: &'static str,
        result: Result<Vec<Ipv4Addr>, DnsError>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(name: &'static str, result: Result<Vec<Ipv4Addr>, DnsError>) -> Arc<Self> {
            Arc::new(Self {
                name,
                result,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DnsStrategy for Fixed {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn resolve(&self, _host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    struct Hang;

    #[async_trait]
    impl DnsStrategy for Hang {
        fn name(&self) -> &'static str {
            "hang"
        }

        async fn resolve(&self, _host: &str) -> Result<Vec<Ipv4Addr>, DnsError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(vec![])
        }
    }

    #[test]
    fn test_parse_singular_address_lines() {
        assert_eq!(
            parse_lookup_output(UNIX_OUTPUT),
            vec![Ipv4Addr::new(93, 184, 216, 34)]
        );
    }

    #[test]
    fn test_parse_plural_addresses_with_continuations() {
        assert_eq!(
            parse_lookup_output(WINDOWS_OUTPUT),
            vec![Ipv4Addr::new(93, 184, 216, 34), Ipv4Addr::new(93, 184, 216, 35)]
        );
    }

    #[test]
    fn test_parse_filters_resolver_line() {
        let output = "Address: 8.8.8.8#53\nNon-authoritative answer:\nAddresses: 93.184.216.34\n";
        assert_eq!(parse_lookup_output(output), vec![Ipv4Addr::new(93, 184, 216, 34)]);
    }

    #[test]
    fn test_parse_nxdomain() {
        let output = "Server:\t\t1.1.1.1\nAddress:\t1.1.1.1#53\n\n** server can't find nope.invalid: NXDOMAIN\n";
        assert!(parse_lookup_output(output).is_empty());
    }

    #[tokio::test]
    async fn test_first_successful_strategy_wins() {
        let failing = Fixed::new("first", Err(DnsError::Resolve("boom".into())));
        let empty = Fixed::new("second", Ok(vec![]));
        let good = Fixed::new("third", Ok(vec![Ipv4Addr::new(1, 1, 1, 1)]));
        let unused = Fixed::new("fourth", Ok(vec![Ipv4Addr::new(9, 9, 9, 9)]));

        let strategies: Vec<Arc<dyn DnsStrategy>> =
            vec![failing.clone(), empty, good, unused.clone()];
        let mux = DnsMultiplexer::with_strategies(strategies, Duration::from_secs(4));
        let (addrs, by) = mux.resolve("example.com").await.unwrap();
        assert_eq!(addrs, vec![Ipv4Addr::new(1, 1, 1, 1)]);
        assert_eq!(by, "third");
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_chain() {
        let only: Arc<dyn DnsStrategy> = Fixed::new("only", Err(DnsError::NoAddresses("x".into())));
        let mux = DnsMultiplexer::with_strategies(vec![only], Duration::from_secs(4));
        assert_eq!(
            mux.resolve("x").await,
            Err(DnsError::StrategyExhausted { host: "x".into() })
        );

        let result = mux.probe("x").await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout() {
        let hang: Arc<dyn DnsStrategy> = Arc::new(Hang);
        let mux = DnsMultiplexer::with_strategies(vec![hang], Duration::from_secs(4));
        assert_eq!(mux.resolve("slow.example").await, Err(DnsError::Timeout(4000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_strategy_falls_through() {
        let good = Fixed::new("good", Ok(vec![Ipv4Addr::new(93, 184, 216, 34)]));
        let strategies: Vec<Arc<dyn DnsStrategy>> = vec![Arc::new(Hang), good.clone()];
        let mux = DnsMultiplexer::with_strategies(strategies, Duration::from_secs(4));

        let started = tokio::time::Instant::now();
        let (addrs, by) = mux.resolve("example.com").await.unwrap();
        assert_eq!(by, "good");
        assert_eq!(addrs, vec![Ipv4Addr::new(93, 184, 216, 34)]);
        assert_eq!(good.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() <= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_then_failing_chain_times_out() {
        let failing = Fixed::new("failing", Err(DnsError::Resolve("boom".into())));
        let strategies: Vec<Arc<dyn DnsStrategy>> = vec![Arc::new(Hang), failing.clone()];
        let mux = DnsMultiplexer::with_strategies(strategies, Duration::from_secs(4));

        assert_eq!(mux.resolve("example.com").await, Err(DnsError::Timeout(4000)));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_platform_chain() {
        let mux = DnsMultiplexer::for_current_platform(Duration::from_secs(4));
        let names = mux.strategy_names();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"native"));
        assert!(names.contains(&"lookup-command"));
    }
}
