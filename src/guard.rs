use crate::error::{ProxyError, Result};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::warn;
use url::{Host, Url};

/// Validate that an origin URL is safe to fetch (SSRF protection) and return
/// it parsed.
///
/// Accepts only `http://` and `https://` URLs whose host is neither a
/// private/reserved address nor the proxy itself.
///
/// **IP literals** are checked against blocked ranges. **Hostnames** are
/// checked against `localhost` and the incoming request's own host; other
/// names are accepted without DNS resolution — DNS rebinding is a known
/// limitation accepted here, and redirect targets are re-validated per hop by
/// the fetcher.
///
/// `allow_private` relaxes the address-range checks for local development and
/// tests; scheme, host-presence, and self-host checks always apply.
///
/// # Errors
/// [`ProxyError::BadRequest`] for unparsable URLs or disallowed schemes,
/// [`ProxyError::Forbidden`] for blocked hosts.
pub fn ensure_safe_origin(url: &str, request_host: Option<&str>, allow_private: bool) -> Result<Url> {
    let parsed = Url::parse(url)
        .map_err(|_| ProxyError::BadRequest(format!("Invalid url parameter: {url}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ProxyError::BadRequest(format!(
                "Scheme '{scheme}' not allowed, only http/https permitted"
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| ProxyError::BadRequest(format!("No host in URL: {url}")))?;

    // Never let the proxy be pointed at itself, regardless of mode. The
    // incoming Host header may carry a port; without one, the host name
    // alone decides.
    if let Some(own) = request_host {
        let (own_host, own_port) = match own.rsplit_once(':') {
            Some((host, port)) if port.parse::<u16>().is_ok() => {
                (host, port.parse::<u16>().ok())
            }
            _ => (own, None),
        };
        let same_host = parsed
            .host_str()
            .is_some_and(|h| h.eq_ignore_ascii_case(own_host));
        let same_port = match own_port {
            Some(port) => parsed.port_or_known_default() == Some(port),
            None => true,
        };
        if same_host && same_port {
            warn!("SSRF: origin host matches the proxy's own host");
            return Err(ProxyError::Forbidden);
        }
    }

    match host {
        Host::Ipv4(ip) => {
            if !allow_private && is_blocked_ipv4(ip) {
                warn!("SSRF: blocked IPv4 origin");
                return Err(ProxyError::Forbidden);
            }
        }
        Host::Ipv6(ip) => {
            if !allow_private && is_blocked_ipv6(ip) {
                warn!("SSRF: blocked IPv6 origin");
                return Err(ProxyError::Forbidden);
            }
            // IPv4-mapped/compatible/NAT64 bypass vectors
            if !allow_private
                && let Some(embedded_v4) = extract_embedded_ipv4(ip)
                && is_blocked_ipv4(embedded_v4)
            {
                warn!("SSRF: blocked IPv4-embedded IPv6 origin");
                return Err(ProxyError::Forbidden);
            }
        }
        Host::Domain(name) => {
            if !allow_private
                && (name.eq_ignore_ascii_case("localhost")
                    || name.to_ascii_lowercase().ends_with(".localhost"))
            {
                warn!("SSRF: blocked localhost origin");
                return Err(ProxyError::Forbidden);
            }
        }
    }

    Ok(parsed)
}

/// Per-hop redirect check used by the fetcher's redirect policy.
///
/// Same rules as [`ensure_safe_origin`] minus the self-host comparison (the
/// request host is not available inside the redirect policy closure).
pub fn is_safe_hop(url: &Url, allow_private: bool) -> bool {
    ensure_safe_origin(url.as_str(), None, allow_private).is_ok()
}

/// Returns `true` for IPv4 addresses in private or reserved ranges.
///
/// Blocked: 0.0.0.0/8, 10.0.0.0/8, 100.64.0.0/10 (CGNAT), 127.0.0.0/8,
/// 169.254.0.0/16 (link-local / cloud metadata), 172.16.0.0/12,
/// 192.0.0.0/24, 192.0.2.0/24, 192.168.0.0/16, 198.18.0.0/15,
/// 198.51.100.0/24, 203.0.113.0/24, 240.0.0.0/4 and broadcast.
fn is_blocked_ipv4(ip: Ipv4Addr) -> bool {
    let o = ip.octets();
    let (a, b, c) = (o[0], o[1], o[2]);

    a == 0
        || a == 10
        || (a == 100 && (b & 0xC0) == 64)
        || a == 127
        || (a == 169 && b == 254)
        || (a == 172 && (16..=31).contains(&b))
        || (a == 192 && b == 0 && c == 0)
        || (a == 192 && b == 0 && c == 2)
        || (a == 192 && b == 168)
        || (a == 198 && (b & 0xFE) == 18)
        || (a == 198 && b == 51 && c == 100)
        || (a == 203 && b == 0 && c == 113)
        || a >= 240
}

/// Returns `true` for IPv6 addresses in private or reserved ranges.
///
/// Blocked: `::`, `::1`, fe80::/10 (link-local), fc00::/7 (unique-local),
/// 2001:db8::/32 (documentation). IPv4-embedded transitional forms are
/// handled by [`extract_embedded_ipv4`].
fn is_blocked_ipv6(ip: Ipv6Addr) -> bool {
    let s = ip.segments();

    ip.is_unspecified()
        || ip.is_loopback()
        || (s[0] & 0xffc0) == 0xfe80
        || (s[0] & 0xfe00) == 0xfc00
        || (s[0] == 0x2001 && s[1] == 0x0db8)
}

/// Extract an embedded IPv4 address from IPv6 transitional formats:
/// `::ffff:x.x.x.x` (IPv4-mapped), `::x.x.x.x` (IPv4-compatible), and the
/// NAT64 prefixes `64:ff9b::/96` / `64:ff9b:1::/48`.
fn extract_embedded_ipv4(ip: Ipv6Addr) -> Option<Ipv4Addr> {
    let segs = ip.segments();
    let bytes = ip.octets();

    if segs[0..5] == [0; 5] && segs[5] == 0xffff {
        return Some(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]));
    }

    // IPv4-compatible (deprecated): all zeros except the last 32 bits, but
    // not :: or ::1 which are native IPv6.
    if segs[0..6] == [0; 6] && (segs[6] != 0 || segs[7] > 1) {
        return Some(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]));
    }

    if segs[0] == 0x0064 && segs[1] == 0xff9b {
        return Some(Ipv4Addr::new(bytes[12], bytes[13], bytes[14], bytes[15]));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(url: &str) -> Result<Url> {
        ensure_safe_origin(url, None, false)
    }

    // --- IPv4 private ranges ---

    #[test]
    fn rejects_loopback_127() {
        assert!(check("http://127.0.0.1/admin").is_err());
        assert!(check("http://127.0.0.99/stream.m3u8").is_err());
        assert!(check("http://127.255.255.255/seg.ts").is_err());
    }

    #[test]
    fn rejects_rfc1918() {
        assert!(check("http://10.0.0.1/stream.m3u8").is_err());
        assert!(check("http://10.255.255.255/seg.ts").is_err());
        assert!(check("http://172.16.0.1/stream.m3u8").is_err());
        assert!(check("http://172.31.255.255/seg.ts").is_err());
        assert!(check("http://192.168.0.1/stream.m3u8").is_err());
        assert!(check("http://192.168.255.255/seg.ts").is_err());
    }

    #[test]
    fn rejects_link_local_metadata() {
        // AWS/GCP/Azure cloud-metadata endpoint
        assert!(check("http://169.254.169.254/latest/meta-data/").is_err());
        assert!(check("http://169.254.0.1/seg.ts").is_err());
    }

    #[test]
    fn rejects_zero_network() {
        assert!(check("http://0.0.0.0/seg.ts").is_err());
        assert!(check("http://0.1.2.3/seg.ts").is_err());
    }

    #[test]
    fn rejects_cgnat_test_nets_class_e() {
        assert!(check("http://100.64.0.1/seg.ts").is_err());
        assert!(check("http://192.0.0.1/seg.ts").is_err());
        assert!(check("http://192.0.2.1/seg.ts").is_err());
        assert!(check("http://198.18.0.1/seg.ts").is_err());
        assert!(check("http://198.51.100.1/seg.ts").is_err());
        assert!(check("http://203.0.113.1/seg.ts").is_err());
        assert!(check("http://240.0.0.1/seg.ts").is_err());
        assert!(check("http://255.255.255.255/seg.ts").is_err());
    }

    // --- IPv6 ---

    #[test]
    fn rejects_ipv6_private() {
        assert!(check("http://[::1]/stream.m3u8").is_err());
        assert!(check("http://[::]/stream.m3u8").is_err());
        assert!(check("http://[fe80::1]/stream.m3u8").is_err());
        assert!(check("http://[fc00::1]/stream.m3u8").is_err());
        assert!(check("http://[fd00::1]/stream.m3u8").is_err());
        assert!(check("http://[2001:db8::1]/stream.m3u8").is_err());
    }

    #[test]
    fn rejects_ipv4_mapped_bypass() {
        assert!(check("http://[::ffff:127.0.0.1]/stream.m3u8").is_err());
        assert!(check("http://[::ffff:169.254.169.254]/stream.m3u8").is_err());
        assert!(check("http://[::ffff:10.0.0.1]/stream.m3u8").is_err());
    }

    #[test]
    fn allows_ipv4_mapped_public() {
        assert!(check("http://[::ffff:8.8.8.8]/stream.m3u8").is_ok());
    }

    // --- Hostnames ---

    #[test]
    fn rejects_localhost_names() {
        assert!(check("http://localhost/stream.m3u8").is_err());
        assert!(check("http://LOCALHOST:8080/stream.m3u8").is_err());
        assert!(check("http://foo.localhost/stream.m3u8").is_err());
    }

    #[test]
    fn rejects_own_host() {
        let err = ensure_safe_origin(
            "https://proxy.example.com/m3u8?url=x",
            Some("proxy.example.com"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::Forbidden));

        let err = ensure_safe_origin(
            "http://proxy.example.com:3000/m3u8?url=x",
            Some("proxy.example.com:3000"),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ProxyError::Forbidden));
    }

    #[test]
    fn different_port_on_same_host_is_allowed() {
        assert!(
            ensure_safe_origin(
                "https://streams.example.com:8443/x.m3u8",
                Some("streams.example.com:3000"),
                false,
            )
            .is_ok()
        );
    }

    #[test]
    fn allows_public_hosts() {
        assert!(check("https://cdn.example.com/stream.m3u8").is_ok());
        assert!(check("http://1.2.3.4/seg.ts").is_ok());
        assert!(check("https://93.184.216.34/stream.m3u8?token=abc").is_ok());
    }

    // --- Schemes / malformed ---

    #[test]
    fn rejects_non_http_schemes() {
        assert!(check("ftp://cdn.example.com/file.ts").is_err());
        assert!(check("file:///etc/passwd").is_err());
        assert!(check("gopher://cdn.example.com/x").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(check("").is_err());
        assert!(check("not-a-url").is_err());
        assert!(check("://missing-scheme").is_err());
    }

    // --- Range boundaries ---

    #[test]
    fn range_boundaries() {
        assert!(check("http://172.15.255.255/seg.ts").is_ok());
        assert!(check("http://172.32.0.0/seg.ts").is_ok());
        assert!(check("http://100.63.255.255/seg.ts").is_ok());
        assert!(check("http://100.128.0.0/seg.ts").is_ok());
    }

    // --- Dev relaxation ---

    #[test]
    fn allow_private_relaxes_ranges_but_not_scheme() {
        assert!(ensure_safe_origin("http://127.0.0.1:9000/x.m3u8", None, true).is_ok());
        assert!(ensure_safe_origin("http://localhost:9000/x.m3u8", None, true).is_ok());
        assert!(ensure_safe_origin("file:///etc/passwd", None, true).is_err());
    }

    // --- Error shape ---

    #[test]
    fn blocked_host_maps_to_forbidden() {
        let err = check("http://127.0.0.1/admin").unwrap_err();
        assert!(matches!(err, ProxyError::Forbidden));
        assert_eq!(err.to_string(), "Forbidden host");
    }
}
