//! Quality classification from probe results.

use serde::{Deserialize, Serialize};

use crate::types::{DnsProbeResult, EndpointProbeResult, Quality};

/// Confidence above which a link can be rated excellent.
pub const EXCELLENT_CONFIDENCE: f64 = 0.8;
/// Confidence above which a link can be rated good.
pub const GOOD_CONFIDENCE: f64 = 0.6;
/// Confidence above which a link is at least fair.
pub const FAIR_CONFIDENCE: f64 = 0.3;

const EXCELLENT_LATENCY_MS: f64 = 100.0;
const GOOD_LATENCY_MS: f64 = 300.0;

/// Weighted fraction of succeeded signals.
///
/// Each item is `(weight, success)`. Returns 0 when the total weight is 0.
pub fn confidence(signals: impl IntoIterator<Item = (f64, bool)>) -> f64 {
    let (ok, total) = signals
        .into_iter()
        .fold((0.0, 0.0), |(ok, total), (weight, success)| {
            let weight = weight.max(0.0);
            (if success { ok + weight } else { ok }, total + weight)
        });

    if total > 0.0 {
        ok / total
    } else {
        0.0
    }
}

/// Map confidence and average latency to a tier.
///
/// `any_signal` is false when nothing at all succeeded; that is always
/// offline regardless of the numbers.
pub fn classify(confidence: f64, avg_latency_ms: Option<f64>, any_signal: bool) -> Quality {
    if !any_signal {
        return Quality::Offline;
    }

    let latency = avg_latency_ms.unwrap_or(f64::INFINITY);
    if confidence > EXCELLENT_CONFIDENCE && latency < EXCELLENT_LATENCY_MS {
        Quality::Excellent
    } else if confidence > GOOD_CONFIDENCE && latency < GOOD_LATENCY_MS {
        Quality::Good
    } else if confidence > FAIR_CONFIDENCE {
        Quality::Fair
    } else {
        Quality::Poor
    }
}

/// Combined verdict of one round of probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub confidence: f64,
    pub avg_latency_ms: Option<f64>,
    pub quality: Quality,
    /// Any endpoint or any DNS lookup succeeded.
    pub is_online: bool,
    pub endpoint_ok: bool,
    pub dns_ok: bool,
    /// A failure was address-not-available and needs a second opinion.
    pub ambiguous: bool,
}

impl QualityReport {
    /// Build a report from endpoint results paired with their weights and
    /// DNS results.
    pub fn from_results(endpoints: &[(f64, EndpointProbeResult)], dns: &[DnsProbeResult]) -> Self {
        let confidence = confidence(endpoints.iter().map(|(w, r)| (*w, r.success)));

        let latencies: Vec<f64> = endpoints
            .iter()
            .filter(|(_, r)| r.success)
            .filter_map(|(_, r)| r.latency_ms)
            .map(|ms| ms as f64)
            .collect();
        let avg_latency_ms = if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        };

        let endpoint_ok = endpoints.iter().any(|(_, r)| r.success);
        let dns_ok = dns.iter().any(|r| r.success);
        let is_online = endpoint_ok || dns_ok;
        let ambiguous = !endpoint_ok && endpoints.iter().any(|(_, r)| r.is_ambiguous());

        Self {
            confidence,
            avg_latency_ms,
            quality: classify(confidence, avg_latency_ms, is_online),
            is_online,
            endpoint_ok,
            dns_ok,
            ambiguous,
        }
    }

    /// Rounded average latency.
    pub fn latency_ms(&self) -> Option<u64> {
        self.avg_latency_ms.map(|ms| ms.round() as u64)
    }

    /// Brief summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "online={} quality={} confidence={:.2} latency={}",
            self.is_online,
            self.quality,
            self.confidence,
            self.latency_ms()
                .map_or_else(|| "n/a".to_string(), |ms| format!("{ms}ms"))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProbeErrorCode;

    fn ok(id: &str, ms: u64) -> EndpointProbeResult {
        EndpointProbeResult::ok(id, ms)
    }

    fn fail(id: &str, code: ProbeErrorCode) -> EndpointProbeResult {
        EndpointProbeResult::failed(id, code)
    }

    fn dns(success: bool) -> DnsProbeResult {
        DnsProbeResult {
            host: "example.com".into(),
            success,
            latency_ms: success.then_some(12),
            resolved_addresses: None,
            error: (!success).then(|| "failed".to_string()),
        }
    }

    #[test]
    fn test_weighted_confidence_scenario() {
        let endpoints = vec![
            (1.0, ok("a", 40)),
            (0.8, ok("b", 60)),
            (0.8, fail("c", ProbeErrorCode::Timeout)),
            (0.6, fail("d", ProbeErrorCode::Refused)),
        ];
        let report = QualityReport::from_results(&endpoints, &[]);

        assert!((report.confidence - 0.5625).abs() < 1e-9);
        assert_eq!(report.quality, Quality::Fair);
        assert!(report.is_online);
        assert_eq!(report.latency_ms(), Some(50));
    }

    #[test]
    fn test_or_reachability() {
        // DNS blocked, raw IP connectivity works
        let report = QualityReport::from_results(&[(1.0, ok("a", 20))], &[dns(false)]);
        assert!(report.is_online);

        // All endpoints blocked, DNS works
        let report =
            QualityReport::from_results(&[(1.0, fail("a", ProbeErrorCode::Timeout))], &[dns(true)]);
        assert!(report.is_online);
        assert_eq!(report.quality, Quality::Poor);

        // Nothing works
        let report =
            QualityReport::from_results(&[(1.0, fail("a", ProbeErrorCode::Timeout))], &[dns(false)]);
        assert!(!report.is_online);
        assert_eq!(report.quality, Quality::Offline);
    }

    #[test]
    fn test_classify_thresholds() {
        assert_eq!(classify(0.9, Some(50.0), true), Quality::Excellent);
        assert_eq!(classify(0.9, Some(150.0), true), Quality::Good);
        assert_eq!(classify(0.7, Some(50.0), true), Quality::Good);
        assert_eq!(classify(0.9, Some(800.0), true), Quality::Fair);
        assert_eq!(classify(0.3, Some(20.0), true), Quality::Poor);
        assert_eq!(classify(1.0, Some(10.0), false), Quality::Offline);
        assert_eq!(classify(0.9, None, true), Quality::Fair);
    }

    #[test]
    fn test_confidence_edge_cases() {
        assert_eq!(confidence(std::iter::empty()), 0.0);
        assert_eq!(confidence([(0.0, true)]), 0.0);
        assert_eq!(confidence([(2.0, true), (2.0, false)]), 0.5);
    }

    #[test]
    fn test_ambiguous_only_without_success() {
        let endpoints = vec![
            (1.0, fail("a", ProbeErrorCode::AddressNotAvailable)),
            (1.0, fail("b", ProbeErrorCode::Timeout)),
        ];
        assert!(QualityReport::from_results(&endpoints, &[]).ambiguous);

        let endpoints = vec![
            (1.0, fail("a", ProbeErrorCode::AddressNotAvailable)),
            (1.0, ok("b", 30)),
        ];
        assert!(!QualityReport::from_results(&endpoints, &[]).ambiguous);
    }
}
