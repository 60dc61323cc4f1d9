//! Endpoint reachability probing.
//!
//! One probe is one TCP connect (optionally followed by an HTTP `HEAD`)
//! against one remote target. Probes never fail: every error is folded into
//! an [`EndpointProbeResult`] with a classified error code.

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::ProbeError;
use crate::types::EndpointProbeResult;

/// A remote reachability target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointTarget {
    /// Stable identifier used in results and logs.
    pub id: String,
    /// Hostname or IP literal.
    pub host: String,
    pub port: u16,
    /// Send `HEAD <path>` after connecting and require an HTTP status line.
    #[serde(default)]
    pub http_path: Option<String>,
    /// Per-probe timeout.
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// Contribution to the confidence score.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}
fn default_weight() -> f64 {
    1.0
}

impl EndpointTarget {
    /// Plain TCP target.
    pub fn tcp(id: &str, host: &str, port: u16, weight: f64) -> Self {
        Self {
            id: id.to_string(),
            host: host.to_string(),
            port,
            http_path: None,
            timeout: default_timeout(),
            weight,
        }
    }

    /// HTTP `HEAD` target.
    pub fn http(id: &str, host: &str, port: u16, path: &str, weight: f64) -> Self {
        Self {
            http_path: Some(path.to_string()),
            ..Self::tcp(id, host, port, weight)
        }
    }
}

/// Something that can check one endpoint.
#[async_trait]
pub trait EndpointProbe: Send + Sync {
    /// Probe `target`. Must resolve within `target.timeout` plus a small grace.
    async fn probe(&self, target: &EndpointTarget) -> EndpointProbeResult;
}

/// Probe all targets concurrently, preserving input order.
pub async fn probe_all(
    prober: &dyn EndpointProbe,
    targets: &[EndpointTarget],
) -> Vec<EndpointProbeResult> {
    futures::future::join_all(targets.iter().map(|t| prober.probe(t))).await
}

/// TCP/HTTP prober using tokio sockets.
#[derive(Debug, Clone)]
pub struct TcpProber {
    /// Extra slack on top of each target's timeout.
    grace: Duration,
}

impl TcpProber {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }
}

impl Default for TcpProber {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl EndpointProbe for TcpProber {
    async fn probe(&self, target: &EndpointTarget) -> EndpointProbeResult {
        let start = Instant::now();
        let budget = target.timeout + self.grace;

        let outcome = tokio::time::timeout(budget, attempt(target)).await;
        let error = match outcome {
            Ok(Ok(())) => {
                let latency = start.elapsed().as_millis() as u64;
                debug!("Probe {} ok in {}ms", target.id, latency);
                return EndpointProbeResult::ok(&target.id, latency);
            }
            Ok(Err(e)) => e,
            Err(_) => ProbeError::Timeout(budget.as_millis() as u64),
        };

        debug!("Probe {} ({}:{}) failed: {}", target.id, target.host, target.port, error);
        EndpointProbeResult::failed(&target.id, error.code())
    }
}

async fn attempt(target: &EndpointTarget) -> Result<(), ProbeError> {
    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((target.host.as_str(), target.port))
        .await
        .map_err(|e| ProbeError::Resolve(format!("{}: {e}", target.host)))?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeError::Resolve(target.host.clone()));
    }

    let connect = TcpStream::connect(addrs.as_slice());
    let stream = tokio::time::timeout(target.timeout, connect)
        .await
        .map_err(|_| ProbeError::Timeout(target.timeout.as_millis() as u64))?
        .map_err(|e| classify_io_error(&e, target.timeout))?;

    match target.http_path {
        Some(ref path) => http_head(stream, &target.host, path).await,
        None => Ok(()),
    }
}

async fn http_head(mut stream: TcpStream, host: &str, path: &str) -> Result<(), ProbeError> {
    let request = format!(
        "HEAD {path} HTTP/1.1\r\nHost: {host}\r\nUser-Agent: netsentry/{}\r\nConnection: close\r\n\r\n",
        crate::VERSION
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| ProbeError::Io(e.to_string()))?;

    let mut buf = [0u8; 64];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| ProbeError::Io(e.to_string()))?;

    if buf[..n].starts_with(b"HTTP/") {
        Ok(())
    } else {
        Err(ProbeError::Http(String::from_utf8_lossy(&buf[..n]).into_owned()))
    }
}

/// Map a socket error onto the probe error taxonomy.
pub fn classify_io_error(err: &io::Error, timeout: Duration) -> ProbeError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => return ProbeError::Refused,
        io::ErrorKind::AddrNotAvailable => return ProbeError::Ambiguous(err.to_string()),
        io::ErrorKind::TimedOut => return ProbeError::Timeout(timeout.as_millis() as u64),
        _ => {}
    }

    match err.raw_os_error() {
        Some(code) if is_addr_not_available(code) => ProbeError::Ambiguous(err.to_string()),
        Some(code) if is_unreachable(code) => ProbeError::Unreachable(err.to_string()),
        _ => ProbeError::Io(err.to_string()),
    }
}

#[cfg(unix)]
fn is_addr_not_available(code: i32) -> bool {
    code == libc::EADDRNOTAVAIL
}

#[cfg(windows)]
fn is_addr_not_available(code: i32) -> bool {
    // WSAEADDRNOTAVAIL
    code == 10049
}

#[cfg(not(any(unix, windows)))]
fn is_addr_not_available(_code: i32) -> bool {
    false
}

#[cfg(unix)]
fn is_unreachable(code: i32) -> bool {
    code == libc::ENETUNREACH || code == libc::EHOSTUNREACH
}

#[cfg(windows)]
fn is_unreachable(code: i32) -> bool {
    // WSAENETUNREACH, WSAEHOSTUNREACH
    code == 10051 || code == 10065
}

#[cfg(not(any(unix, windows)))]
fn is_unreachable(_code: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeErrorCode;
    use tokio::net::TcpListener;

    #[test]
    fn test_classify_io_error() {
        let timeout = Duration::from_secs(3);
        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(classify_io_error(&refused, timeout), ProbeError::Refused);

        let not_avail = io::Error::from(io::ErrorKind::AddrNotAvailable);
        assert!(classify_io_error(&not_avail, timeout).is_ambiguous());

        let timed_out = io::Error::from(io::ErrorKind::TimedOut);
        assert_eq!(classify_io_error(&timed_out, timeout), ProbeError::Timeout(3000));
    }

    #[cfg(unix)]
    #[test]
    fn test_classify_raw_os_errors() {
        let timeout = Duration::from_secs(1);
        let raw = io::Error::from_raw_os_error(libc::EADDRNOTAVAIL);
        assert_eq!(
            classify_io_error(&raw, timeout).code(),
            ProbeErrorCode::AddressNotAvailable
        );

        let raw = io::Error::from_raw_os_error(libc::EHOSTUNREACH);
        assert_eq!(classify_io_error(&raw, timeout).code(), ProbeErrorCode::Unreachable);
    }

    #[tokio::test]
    async fn test_tcp_probe_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let target = EndpointTarget::tcp("local", "127.0.0.1", port, 1.0);
        let result = TcpProber::default().probe(&target).await;
        assert!(result.success);
        assert_eq!(result.endpoint_id, "local");
        assert!(result.latency_ms.is_some());
        assert_eq!(result.error_code, None);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_is_a_value() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let target = EndpointTarget::tcp("closed", "127.0.0.1", port, 1.0);
        let result = TcpProber::default().probe(&target).await;
        assert!(!result.success);
        assert_eq!(result.error_code, Some(ProbeErrorCode::Refused));
    }

    #[tokio::test]
    async fn test_http_probe() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 512];
                let _ = sock.read(&mut buf).await;
                let _ = sock.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await;
            }
        });

        let target = EndpointTarget::http("http", "127.0.0.1", port, "/generate_204", 0.6);
        let result = TcpProber::default().probe(&target).await;
        assert!(result.success, "{result:?}");
    }

    #[tokio::test]
    async fn test_probe_all_preserves_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });
        let closed = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };

        let targets = vec![
            EndpointTarget::tcp("a", "127.0.0.1", closed, 1.0),
            EndpointTarget::tcp("b", "127.0.0.1", open, 1.0),
        ];
        let results = probe_all(&TcpProber::default(), &targets).await;
        assert_eq!(results[0].endpoint_id, "a");
        assert!(!results[0].success);
        assert!(results[1].success);
        assert!(!results[0].is_ambiguous());
    }
}
