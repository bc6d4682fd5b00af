//! Source URL validation.
//
// Rejects anything that could point the fetcher back at the host it runs on:
// non-HTTP schemes, loopback and any-interface addresses, `localhost` names.

use std::net::{IpAddr, SocketAddr};
use url::{Host, Url};

use super::FetchError;

fn invalid(url: &str, reason: impl Into<String>) -> FetchError {
    FetchError::InvalidUrl { url: url.to_string(), reason: reason.into() }
}

/// Loopback or unspecified, including IPv4-mapped IPv6 forms.
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback() || v4.is_unspecified())
        }
    }
}

/// Parse `raw` and check scheme and literal host without touching the network.
pub fn validate_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| invalid(raw, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(raw, format!("unsupported scheme '{}'", other))),
    }

    match url.host() {
        None => return Err(invalid(raw, "missing host")),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            if domain.is_empty() {
                return Err(invalid(raw, "empty host"));
            }
            if domain == "localhost" || domain.ends_with(".localhost") {
                return Err(invalid(raw, format!("host '{}' is not allowed", domain)));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_blocked_ip(IpAddr::V4(ip)) {
                return Err(invalid(raw, format!("address {} is not allowed", ip)));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_blocked_ip(IpAddr::V6(ip)) {
                return Err(invalid(raw, format!("address {} is not allowed", ip)));
            }
        }
    }

    Ok(url)
}

/// Resolve a domain host and make sure it maps to at least one address, none blocked.
///
/// Literal IP hosts were already checked by [`validate_url`] and pass through.
pub async fn ensure_public_host(url: &Url) -> Result<(), FetchError> {
    let domain = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        _ => return Ok(()),
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let addrs: Vec<_> = tokio::net::lookup_host((domain.as_str(), port))
        .await
        .map_err(|e| invalid(url.as_str(), format!("cannot resolve '{}': {}", domain, e)))?
        .collect();

    if addrs.is_empty() {
        return Err(invalid(url.as_str(), format!("'{}' resolves to no address", domain)));
    }
    if let Some(blocked) = addrs.iter().find(|addr| is_blocked_ip(addr.ip())) {
        return Err(invalid(
            url.as_str(),
            format!("'{}' resolves to blocked address {}", domain, blocked.ip()),
        ));
    }
    Ok(())
}

/// Resolved addresses of `host` with blocked ones removed; an error when none remain.
pub fn public_addrs(
    host: &str,
    addrs: impl IntoIterator<Item = SocketAddr>,
) -> Result<Vec<SocketAddr>, FetchError> {
    let allowed: Vec<SocketAddr> = addrs.into_iter().filter(|addr| !is_blocked_ip(addr.ip())).collect();
    if allowed.is_empty() {
        return Err(invalid(host, format!("'{}' has no public address", host)));
    }
    Ok(allowed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("https://www.airbnb.com/calendar/ical/1.ics" ; "https domain")]
    #[test_case("http://admin.booking.com/hotel/ical.ics?t=abc" ; "http with query")]
    #[test_case("https://93.184.216.34/feed.ics" ; "public ipv4 literal")]
    fn test_accepts_public_urls(raw: &str) {
        assert!(validate_url(raw).is_ok());
    }

    #[test_case("http://127.0.0.1/cal.ics" ; "ipv4 loopback")]
    #[test_case("http://127.8.9.10/cal.ics" ; "ipv4 loopback range")]
    #[test_case("http://0.0.0.0:8000/cal.ics" ; "any interface")]
    #[test_case("http://[::1]/cal.ics" ; "ipv6 loopback")]
    #[test_case("http://[::]/cal.ics" ; "ipv6 unspecified")]
    #[test_case("http://[::ffff:127.0.0.1]/cal.ics" ; "ipv4 mapped loopback")]
    #[test_case("http://localhost:8080/cal.ics" ; "localhost")]
    #[test_case("http://api.LOCALHOST./cal.ics" ; "localhost subdomain")]
    #[test_case("ftp://example.com/cal.ics" ; "ftp scheme")]
    #[test_case("file:///etc/passwd" ; "file scheme")]
    #[test_case("not a url" ; "garbage")]
    #[test_case("" ; "empty")]
    fn test_rejects_unsafe_urls(raw: &str) {
        assert!(matches!(validate_url(raw), Err(FetchError::InvalidUrl { .. })));
    }

    #[test]
    fn test_public_addrs_drops_blocked() {
        let addrs: Vec<SocketAddr> = vec![
            "127.0.0.1:0".parse().unwrap(),
            "93.184.216.34:0".parse().unwrap(),
            "[::ffff:127.0.0.1]:0".parse().unwrap(),
        ];
        let allowed = public_addrs("mixed.example", addrs).unwrap();
        assert_eq!(allowed, vec!["93.184.216.34:0".parse::<SocketAddr>().unwrap()]);
    }

    #[test]
    fn test_public_addrs_rejects_loopback_only() {
        let addrs: Vec<SocketAddr> = vec!["127.0.0.1:0".parse().unwrap(), "[::1]:0".parse().unwrap()];
        assert!(matches!(
            public_addrs("rebind.example", addrs),
            Err(FetchError::InvalidUrl { .. })
        ));
    }

    #[tokio::test]
    async fn test_literal_hosts_skip_resolution() {
        let url = validate_url("https://93.184.216.34/feed.ics").unwrap();
        assert!(ensure_public_host(&url).await.is_ok());
    }
}
