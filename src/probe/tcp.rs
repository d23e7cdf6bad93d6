//! TCP connect probe implementation.
//!
//! Opens a raw stream to the target host (port 443 unless the address names
//! one) and classifies by connect latency. When the connect fails, a DNS
//! lookup of the host decides which failure message is reported.

use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};

use super::{truncate, CheckResult, Health, Outcome, ProbeError, ProbeSettings, TcpThresholds};
use crate::registry::Target;

/// Run a TCP connect probe against a target.
pub async fn run_tcp_probe(target: &Target, settings: &ProbeSettings) -> CheckResult {
    let (host, port) = match split_host_port(&target.address, settings.tcp_port) {
        Ok(hp) => hp,
        Err(e) => {
            return CheckResult::new(
                target,
                Health::Down,
                Outcome::Error,
                None,
                format!("TCP connection error: {}", truncate(&e.to_string(), 30)),
            )
        }
    };

    let timeout = settings.tcp_timeout;
    let start = Instant::now();
    let attempt = tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port))).await;
    let elapsed_ms = start.elapsed().as_millis() as u64;

    match attempt {
        Ok(Ok(_stream)) => {
            let (health, message) = classify_tcp(elapsed_ms, &settings.tcp);
            CheckResult::new(target, health, Outcome::Connected, Some(elapsed_ms), message)
        }
        Ok(Err(e)) => {
            tracing::debug!(target_name = %target.name, host = %host, port, error = %e, "TCP connect failed");
            let resolved = resolves(&host, port, timeout).await;
            let (outcome, message) = connect_failure(resolved);
            CheckResult::new(target, Health::Down, outcome, Some(elapsed_ms), message)
        }
        Err(_) => CheckResult::new(
            target,
            Health::Down,
            Outcome::Timeout,
            Some(elapsed_ms),
            format!("TCP connection timeout ({}s)", timeout.as_secs()),
        ),
    }
}

/// Classify a successful connect by its latency.
pub fn classify_tcp(elapsed_ms: u64, thresholds: &TcpThresholds) -> (Health, String) {
    if elapsed_ms > thresholds.high_ms {
        (Health::Degraded, format!("High latency ({} ms)", elapsed_ms))
    } else if elapsed_ms > thresholds.elevated_ms {
        (Health::Degraded, format!("Elevated latency ({} ms)", elapsed_ms))
    } else {
        (Health::Operational, format!("TCP connection OK ({} ms)", elapsed_ms))
    }
}

/// Outcome and message for a refused or failed connect.
pub fn connect_failure(resolved: bool) -> (Outcome, String) {
    if resolved {
        (
            Outcome::ConnectionError,
            "TCP connection failed (port blocked or service down)".to_string(),
        )
    } else {
        (Outcome::DnsError, "DNS resolution failed".to_string())
    }
}

async fn resolves(host: &str, port: u16, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, lookup_host((host, port))).await {
        Ok(Ok(mut addrs)) => addrs.next().is_some(),
        _ => false,
    }
}

/// Split an address into host and port.
///
/// Accepts `host`, `host:port`, `[v6]:port`, bare IPv6 literals, and URLs
/// (scheme and path are ignored).
pub fn split_host_port(address: &str, default_port: u16) -> Result<(String, u16), ProbeError> {
    let trimmed = address.trim();
    let rest = trimmed.split_once("://").map(|(_, r)| r).unwrap_or(trimmed);
    let authority = rest.split('/').next().unwrap_or_default();

    let parse_port = |p: &str| {
        p.parse::<u16>()
            .map_err(|_| ProbeError::Config(format!("invalid port in {}", address)))
    };

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| ProbeError::Config(format!("unterminated IPv6 literal in {}", address)))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => parse_port(p)?,
            None if tail.is_empty() => default_port,
            None => return Err(ProbeError::Config(format!("invalid address {}", address))),
        };
        (host.to_string(), port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, p)) if !host.contains(':') => (host.to_string(), parse_port(p)?),
            // Bare IPv6 literal
            Some(_) => (authority.to_string(), default_port),
            None => (authority.to_string(), default_port),
        }
    };

    if host.is_empty() {
        return Err(ProbeError::Config(format!("missing host in {:?}", address)));
    }

    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ProbeMethod;

    fn target(address: &str) -> Target {
        Target {
            name: "Region".to_string(),
            address: address.to_string(),
            method: ProbeMethod::Tcp,
            icon: String::new(),
            collection: "ec2".to_string(),
            group: "americas".to_string(),
            group_name: "Americas Regions".to_string(),
        }
    }

    fn settings(timeout: Duration) -> ProbeSettings {
        ProbeSettings {
            tcp_timeout: timeout,
            jitter: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_tcp_boundaries() {
        let t = TcpThresholds::default();
        assert_eq!(classify_tcp(2000, &t).0, Health::Operational);
        assert_eq!(classify_tcp(2001, &t), (Health::Degraded, "Elevated latency (2001 ms)".to_string()));
        assert_eq!(classify_tcp(5000, &t).0, Health::Degraded);
        assert_eq!(classify_tcp(5001, &t), (Health::Degraded, "High latency (5001 ms)".to_string()));
    }

    #[test]
    fn test_connect_failure_messages() {
        assert_eq!(
            connect_failure(false),
            (Outcome::DnsError, "DNS resolution failed".to_string())
        );
        let (outcome, message) = connect_failure(true);
        assert_eq!(outcome, Outcome::ConnectionError);
        assert!(message.starts_with("TCP connection failed"));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("ec2.us-east-1.amazonaws.com", 443).unwrap(),
            ("ec2.us-east-1.amazonaws.com".to_string(), 443)
        );
        assert_eq!(split_host_port("localhost:8443", 443).unwrap(), ("localhost".to_string(), 8443));
        assert_eq!(split_host_port("https://example.com/path", 443).unwrap(), ("example.com".to_string(), 443));
        assert_eq!(split_host_port("[::1]:9000", 443).unwrap(), ("::1".to_string(), 9000));
        assert_eq!(split_host_port("::1", 443).unwrap(), ("::1".to_string(), 443));
        assert!(split_host_port("", 443).is_err());
        assert!(split_host_port("host:notaport", 443).is_err());
    }

    #[tokio::test]
    async fn test_tcp_probe_connects() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let result = run_tcp_probe(&target(&addr.to_string()), &settings(Duration::from_secs(2))).await;
        assert_eq!(result.status, Health::Operational);
        assert_eq!(result.outcome, Outcome::Connected);
        assert!(result.message.starts_with("TCP connection OK"));
    }

    #[tokio::test]
    async fn test_tcp_probe_refused_but_resolvable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let address = format!("127.0.0.1:{}", port);
        let result = run_tcp_probe(&target(&address), &settings(Duration::from_secs(2))).await;
        assert_eq!(result.status, Health::Down);
        assert_eq!(result.outcome, Outcome::ConnectionError);
        assert_eq!(result.message, "TCP connection failed (port blocked or service down)");
        assert!(result.elapsed_ms.is_some());
    }

    #[tokio::test]
    async fn test_tcp_probe_dns_failure() {
        // .invalid never resolves
        let result = run_tcp_probe(
            &target("statusboard-probe.invalid"),
            &settings(Duration::from_secs(20)),
        )
        .await;
        assert_eq!(result.status, Health::Down);
        assert_eq!(result.message, "DNS resolution failed");
    }

    #[tokio::test]
    async fn test_tcp_probe_bad_address() {
        let result = run_tcp_probe(&target("host:99999"), &settings(Duration::from_secs(1))).await;
        assert_eq!(result.status, Health::Down);
        assert_eq!(result.outcome, Outcome::Error);
        assert_eq!(result.elapsed_ms, None);
        assert!(result.message.starts_with("TCP connection error: "));
        assert!(result.message.chars().count() <= "TCP connection error: ".len() + 30);
    }
}
