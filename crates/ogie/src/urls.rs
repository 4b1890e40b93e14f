// ABOUTME: URL classification helpers: scheme validation, syntactic private-network detection and normalization.
// ABOUTME: Used at every redirect hop, for cache keys and for per-domain rate-limit buckets.

use std::net::{Ipv4Addr, Ipv6Addr};

use ipnet::{Ipv4Net, Ipv6Net};
use once_cell::sync::Lazy;
use url::{Host, Url};

/// Private and reserved IPv4 ranges that must never be fetched.
static PRIVATE_IPV4_NETS: Lazy<Vec<Ipv4Net>> = Lazy::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.0.0.0/24",
        "192.0.2.0/24",
        "192.168.0.0/16",
        "198.18.0.0/15",
        "198.51.100.0/24",
        "203.0.113.0/24",
        "224.0.0.0/4",
        "240.0.0.0/4",
        "255.255.255.255/32",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

static PRIVATE_IPV6_NETS: Lazy<Vec<Ipv6Net>> = Lazy::new(|| {
    ["fc00::/7", "fe80::/10"]
        .iter()
        .filter_map(|cidr| cidr.parse().ok())
        .collect()
});

const PRIVATE_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "ip6-localhost",
    "ip6-loopback",
];

const INTERNAL_TLDS: &[&str] = &[
    ".local",
    ".internal",
    ".localhost",
    ".test",
    ".example",
    ".invalid",
];

/// True iff `s` parses as an absolute URL whose scheme is exactly http or https.
pub fn is_valid_url(s: &str) -> bool {
    match Url::parse(s) {
        Ok(u) => matches!(u.scheme(), "http" | "https"),
        Err(_) => false,
    }
}

/// True if the URL targets a private, internal or reserved destination.
///
/// Purely syntactic: no DNS lookups are performed. Unparseable input is
/// treated as private.
pub fn is_private_url(s: &str) -> bool {
    let Ok(parsed) = Url::parse(s) else {
        return true;
    };
    match parsed.host() {
        Some(Host::Ipv4(ip)) => is_private_ipv4(&ip),
        Some(Host::Ipv6(ip)) => is_private_ipv6(&ip),
        Some(Host::Domain(domain)) => is_private_host(domain),
        None => true,
    }
}

/// True if the URL is both valid and not private.
pub fn is_safe_url(s: &str) -> bool {
    is_valid_url(s) && !is_private_url(s)
}

/// Classify a raw hostname string.
///
/// IPv4 literals are only recognized in strict dotted-quad form: an octet
/// with a leading zero (`010`) disqualifies the string as an address.
pub fn is_private_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host.as_str());

    if PRIVATE_HOSTNAMES.contains(&host) || INTERNAL_TLDS.iter().any(|tld| host.ends_with(tld)) {
        return true;
    }
    if let Some(ip) = parse_strict_ipv4(host) {
        return is_private_ipv4(&ip);
    }
    if host.contains(':') {
        return match host.parse::<Ipv6Addr>() {
            Ok(ip) => is_private_ipv6(&ip),
            // Something shaped like IPv6 that will not parse is not fetchable either.
            Err(_) => true,
        };
    }
    false
}

fn parse_strict_ipv4(host: &str) -> Option<Ipv4Addr> {
    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() != 4 {
        return None;
    }
    let mut octets = [0u8; 4];
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if part.len() > 1 && part.starts_with('0') {
            return None;
        }
        octets[i] = part.parse().ok()?;
    }
    Some(Ipv4Addr::from(octets))
}

fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    PRIVATE_IPV4_NETS.iter().any(|net| net.contains(ip))
}

fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return true;
    }
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_ipv4(&v4);
    }
    PRIVATE_IPV6_NETS.iter().any(|net| net.contains(ip))
}

/// Resolve a possibly relative URL.
///
/// Absolute http(s) URLs pass through unchanged. Protocol-relative URLs take
/// the base's scheme (https without a base). Relative paths resolve against
/// `base` when given, otherwise they are returned as-is.
pub fn resolve_url(url: &str, base: Option<&str>) -> String {
    if url.is_empty() || has_http_scheme(url) {
        return url.to_string();
    }

    if url.starts_with("//") {
        let scheme = base
            .and_then(|b| Url::parse(b).ok())
            .map(|b| b.scheme().to_string())
            .unwrap_or_else(|| "https".to_string());
        return format!("{}:{}", scheme, url);
    }

    let Some(base) = base else {
        return url.to_string();
    };
    Url::parse(base)
        .and_then(|b| b.join(url))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| url.to_string())
}

fn has_http_scheme(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Canonical form used for cache keys.
///
/// Lowercases scheme and host, drops a bare `/` path, strips one trailing
/// slash when there is no query, and keeps query and fragment. Unparseable
/// input is returned unchanged.
pub fn normalize_url(s: &str) -> String {
    let Ok(parsed) = Url::parse(s) else {
        return s.to_string();
    };
    let mut normalized = format!("{}://{}", parsed.scheme(), host_with_port(&parsed));
    if parsed.path() != "/" {
        normalized.push_str(parsed.path());
    }
    if parsed.query().is_none() && normalized.ends_with('/') {
        normalized.pop();
    }
    if let Some(q) = parsed.query() {
        normalized.push('?');
        normalized.push_str(q);
    }
    if let Some(f) = parsed.fragment() {
        normalized.push('#');
        normalized.push_str(f);
    }
    normalized
}

/// Scheme and host (with any non-default port), used as the per-domain bucket key.
pub fn get_base_url(s: &str) -> String {
    match Url::parse(s) {
        Ok(parsed) => format!("{}://{}", parsed.scheme(), host_with_port(&parsed)),
        Err(_) => s.to_string(),
    }
}

fn host_with_port(u: &Url) -> String {
    let host = u.host_str().unwrap_or_default().to_ascii_lowercase();
    match u.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}
