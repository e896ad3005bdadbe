// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! SSRF guard (C15): async URL/IP/DNS validation against blocklists.
//!
//! The caller is expected to pin the outbound connection to one of the
//! resolved IPs this module returns, to prevent a DNS-rebinding race
//! between validation and the actual request.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use hickory_resolver::TokioAsyncResolver;
use url::Url;

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "metadata.google.internal",
    "metadata.google.com",
    "kubernetes.default.svc",
];

#[derive(Debug, Clone, PartialEq)]
pub struct SsrfVerdict {
    pub safe: bool,
    pub reason: Option<String>,
    pub resolved_ips: Vec<IpAddr>,
}

impl SsrfVerdict {
    fn blocked(reason: impl Into<String>) -> Self {
        Self { safe: false, reason: Some(reason.into()), resolved_ips: vec![] }
    }

    fn allowed(resolved_ips: Vec<IpAddr>) -> Self {
        Self { safe: true, reason: None, resolved_ips }
    }
}

pub struct SsrfGuard {
    resolver: TokioAsyncResolver,
}

impl SsrfGuard {
    pub fn new() -> Self {
        Self { resolver: TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|_| TokioAsyncResolver::tokio(Default::default(), Default::default())) }
    }

    pub async fn validate_url(&self, url: &str) -> SsrfVerdict {
        let parsed = match Url::parse(url) {
            Ok(parsed) => parsed,
            Err(e) => return SsrfVerdict::blocked(format!("malformed URL: {}", e)),
        };

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return SsrfVerdict::blocked(format!("scheme must be http or https, got {}", parsed.scheme()));
        }

        let Some(host) = parsed.host_str() else {
            return SsrfVerdict::blocked("URL has no hostname");
        };
        let host_lower = host.to_lowercase();

        if BLOCKED_HOSTNAMES.contains(&host_lower.as_str()) {
            return SsrfVerdict::blocked(format!("hostname {} is blocked", host_lower));
        }

        if let Ok(ip) = host_lower.parse::<IpAddr>() {
            return if is_blocked_ip(&ip) {
                SsrfVerdict::blocked(format!("IP address {} is in a blocked range", ip))
            } else {
                SsrfVerdict::allowed(vec![ip])
            };
        }

        let lookup = match self.resolver.lookup_ip(host_lower.as_str()).await {
            Ok(lookup) => lookup,
            Err(e) => return SsrfVerdict::blocked(format!("DNS resolution failed: {}", e)),
        };

        let resolved: Vec<IpAddr> = lookup.iter().collect();
        if resolved.is_empty() {
            return SsrfVerdict::blocked("DNS resolution returned no addresses");
        }
        if let Some(blocked) = resolved.iter().find(|ip| is_blocked_ip(ip)) {
            return SsrfVerdict::blocked(format!("resolved IP {} is in a blocked range", blocked));
        }

        SsrfVerdict::allowed(resolved)
    }
}

impl Default for SsrfGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_blocked_ipv4(v4),
        IpAddr::V6(v6) => is_blocked_ipv6(v6),
    }
}

fn is_blocked_ipv4(ip: &Ipv4Addr) -> bool {
    if ip.is_loopback() || ip.is_link_local() || ip.is_broadcast() || ip.is_documentation() {
        return true;
    }
    let octets = ip.octets();
    // RFC1918 private ranges.
    if octets[0] == 10 {
        return true;
    }
    if octets[0] == 172 && (16..=31).contains(&octets[1]) {
        return true;
    }
    if octets[0] == 192 && octets[1] == 168 {
        return true;
    }
    // CGNAT 100.64.0.0/10.
    if octets[0] == 100 && (64..=127).contains(&octets[1]) {
        return true;
    }
    // 169.254.0.0/16 link-local (redundant with is_link_local but explicit
    // per §4.13's literal list, including the cloud metadata address).
    if octets[0] == 169 && octets[1] == 254 {
        return true;
    }
    // 224.0.0.0/4 multicast, 240.0.0.0/4 reserved.
    if octets[0] >= 224 {
        return true;
    }
    false
}

fn is_blocked_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() {
        return true;
    }
    let segments = ip.segments();
    // fc00::/7 unique local.
    if (segments[0] & 0xfe00) == 0xfc00 {
        return true;
    }
    // fe80::/10 link-local.
    if (segments[0] & 0xffc0) == 0xfe80 {
        return true;
    }
    // ::ffff:0:0/96 mapped IPv4 — recurse into the embedded address.
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_blocked_ipv4(&v4);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn literal_metadata_ip_is_blocked() {
        let guard = SsrfGuard::new();
        let verdict = guard.validate_url("http://169.254.169.254/latest/meta-data/").await;
        assert!(!verdict.safe);
        assert!(verdict.reason.unwrap().contains("169.254.169.254"));
    }

    #[tokio::test]
    async fn metadata_hostname_is_blocked() {
        let guard = SsrfGuard::new();
        let verdict = guard.validate_url("http://metadata.google.internal/").await;
        assert!(!verdict.safe);
    }

    #[tokio::test]
    async fn non_http_scheme_is_blocked() {
        let guard = SsrfGuard::new();
        let verdict = guard.validate_url("file:///etc/passwd").await;
        assert!(!verdict.safe);
    }

    #[tokio::test]
    async fn private_rfc1918_literal_is_blocked() {
        let guard = SsrfGuard::new();
        for url in ["http://10.0.0.1/", "http://172.16.0.1/", "http://192.168.1.1/"] {
            let verdict = guard.validate_url(url).await;
            assert!(!verdict.safe, "{} should be blocked", url);
        }
    }

    #[test]
    fn ipv4_classification() {
        assert!(is_blocked_ipv4(&"127.0.0.1".parse().unwrap()));
        assert!(is_blocked_ipv4(&"100.64.0.1".parse().unwrap()));
        assert!(!is_blocked_ipv4(&"8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn ipv6_classification() {
        assert!(is_blocked_ipv6(&"::1".parse().unwrap()));
        assert!(is_blocked_ipv6(&"fe80::1".parse().unwrap()));
        assert!(is_blocked_ipv6(&"fc00::1".parse().unwrap()));
        assert!(!is_blocked_ipv6(&"2001:4860:4860::8888".parse().unwrap()));
    }
}
